use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigNotFound,
    ConfigInvalidYaml,
    ConfigInvalidToml,
    ConfigMissingField,
    ConfigInvalidEnum,
    ConfigConflict,

    CompileContradiction,
    CompileInternal,

    RemoteConflict,
    RemoteTransient,
    RemotePermanent,

    PipelineCycle,
    PipelineInvariant,

    InternalIoError,
    InternalJsonError,
}

/// Stage of a run in which an error surfaced. Drives the CLI exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Load,
    Validate,
    Compile,
    Execute,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConfigNotFound => "config.not_found",
            ErrorCode::ConfigInvalidYaml => "config.invalid_yaml",
            ErrorCode::ConfigInvalidToml => "config.invalid_toml",
            ErrorCode::ConfigMissingField => "config.missing_field",
            ErrorCode::ConfigInvalidEnum => "config.invalid_enum",
            ErrorCode::ConfigConflict => "config.conflict",

            ErrorCode::CompileContradiction => "compile.contradiction",
            ErrorCode::CompileInternal => "compile.internal",

            ErrorCode::RemoteConflict => "remote.conflict",
            ErrorCode::RemoteTransient => "remote.transient",
            ErrorCode::RemotePermanent => "remote.permanent",

            ErrorCode::PipelineCycle => "pipeline.cycle",
            ErrorCode::PipelineInvariant => "pipeline.invariant",

            ErrorCode::InternalIoError => "internal.io_error",
            ErrorCode::InternalJsonError => "internal.json_error",
        }
    }

    pub fn stage(&self) -> FailureStage {
        match self {
            ErrorCode::ConfigNotFound
            | ErrorCode::ConfigInvalidYaml
            | ErrorCode::ConfigInvalidToml => FailureStage::Load,
            ErrorCode::ConfigMissingField
            | ErrorCode::ConfigInvalidEnum
            | ErrorCode::ConfigConflict => FailureStage::Validate,
            ErrorCode::CompileContradiction | ErrorCode::CompileInternal => FailureStage::Compile,
            ErrorCode::RemoteConflict
            | ErrorCode::RemoteTransient
            | ErrorCode::RemotePermanent
            | ErrorCode::PipelineCycle
            | ErrorCode::PipelineInvariant => FailureStage::Execute,
            ErrorCode::InternalIoError | ErrorCode::InternalJsonError => FailureStage::Internal,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hint {
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigFieldDetails {
    pub field: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidEnumDetails {
    pub field: String,
    pub value: String,
    pub allowed: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictDetails {
    pub field: String,
    pub problem: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContradictionDetails {
    pub rule: String,
    pub problem: String,
    pub template: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteConflictDetails {
    pub template: String,
    pub matching_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteCallDetails {
    pub endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    pub error: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineDetails {
    pub problem: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub operations: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalErrorDetails {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
    pub details: Value,
    pub hints: Vec<Hint>,
    pub retryable: Option<bool>,
}

pub type Result<T> = std::result::Result<T, Error>;

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Error {}

fn to_details<T: Serialize>(details: T) -> Value {
    serde_json::to_value(details).unwrap_or_else(|_| Value::Object(serde_json::Map::new()))
}

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>, details: Value) -> Self {
        Self {
            code,
            message: message.into(),
            details,
            hints: Vec::new(),
            retryable: None,
        }
    }

    pub fn config_not_found(path: impl Into<String>) -> Self {
        let path = path.into();
        Self::new(
            ErrorCode::ConfigNotFound,
            format!("Release descriptor not found: {}", path),
            to_details(ConfigFieldDetails {
                field: "path".to_string(),
                context: Some(path),
            }),
        )
    }

    pub fn config_invalid_yaml(path: impl Into<String>, error: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::ConfigInvalidYaml,
            "Release descriptor could not be parsed",
            to_details(InternalErrorDetails {
                error: error.into(),
                context: Some(path.into()),
            }),
        )
    }

    pub fn settings_invalid_toml(path: impl Into<String>, error: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::ConfigInvalidToml,
            "Settings file is not valid TOML",
            to_details(InternalErrorDetails {
                error: error.into(),
                context: Some(path.into()),
            }),
        )
    }

    pub fn config_missing_field(field: impl Into<String>, context: Option<String>) -> Self {
        let field = field.into();
        Self::new(
            ErrorCode::ConfigMissingField,
            format!("Missing required field '{}'", field),
            to_details(ConfigFieldDetails { field, context }),
        )
    }

    pub fn config_invalid_enum(
        field: impl Into<String>,
        value: impl Into<String>,
        allowed: &[&str],
    ) -> Self {
        let field = field.into();
        let value = value.into();
        Self::new(
            ErrorCode::ConfigInvalidEnum,
            format!("Invalid value '{}' for '{}'", value, field),
            to_details(InvalidEnumDetails {
                field,
                value,
                allowed: allowed.iter().map(|s| s.to_string()).collect(),
            }),
        )
    }

    pub fn config_conflict(
        field: impl Into<String>,
        problem: impl Into<String>,
        id: Option<String>,
    ) -> Self {
        let problem = problem.into();
        Self::new(
            ErrorCode::ConfigConflict,
            problem.clone(),
            to_details(ConflictDetails {
                field: field.into(),
                problem,
                id,
            }),
        )
    }

    pub fn compile_contradiction(
        template: impl Into<String>,
        rule: impl Into<String>,
        problem: impl Into<String>,
    ) -> Self {
        let problem = problem.into();
        Self::new(
            ErrorCode::CompileContradiction,
            problem.clone(),
            to_details(ContradictionDetails {
                rule: rule.into(),
                problem,
                template: template.into(),
            }),
        )
    }

    pub fn compile_internal(problem: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::CompileInternal,
            "Plan compilation reached an inconsistent state",
            to_details(InternalErrorDetails {
                error: problem.into(),
                context: None,
            }),
        )
    }

    pub fn remote_conflict(template: impl Into<String>, matching_ids: Vec<String>) -> Self {
        let template = template.into();
        Self::new(
            ErrorCode::RemoteConflict,
            format!(
                "More than one template named '{}' exists; refusing to guess which to replace",
                template
            ),
            to_details(RemoteConflictDetails {
                template,
                matching_ids,
            }),
        )
        .with_hint("Remove the duplicate templates by hand, then re-run")
    }

    pub fn remote_transient(
        endpoint: impl Into<String>,
        status: Option<u16>,
        error: impl Into<String>,
    ) -> Self {
        let mut err = Self::new(
            ErrorCode::RemoteTransient,
            "Release API call failed (transient)",
            to_details(RemoteCallDetails {
                endpoint: endpoint.into(),
                status,
                error: error.into(),
            }),
        );
        err.retryable = Some(true);
        err
    }

    pub fn remote_permanent(
        endpoint: impl Into<String>,
        status: Option<u16>,
        error: impl Into<String>,
    ) -> Self {
        let mut err = Self::new(
            ErrorCode::RemotePermanent,
            "Release API call failed",
            to_details(RemoteCallDetails {
                endpoint: endpoint.into(),
                status,
                error: error.into(),
            }),
        );
        err.retryable = Some(false);
        err
    }

    pub fn pipeline_cycle(operations: Vec<String>) -> Self {
        Self::new(
            ErrorCode::PipelineCycle,
            "Plan dependencies contain a cycle",
            to_details(PipelineDetails {
                problem: "cycle".to_string(),
                operations,
            }),
        )
    }

    pub fn pipeline_invariant(problem: impl Into<String>, operations: Vec<String>) -> Self {
        let problem = problem.into();
        Self::new(
            ErrorCode::PipelineInvariant,
            problem.clone(),
            to_details(PipelineDetails {
                problem,
                operations,
            }),
        )
    }

    pub fn internal_io(error: impl Into<String>, context: Option<String>) -> Self {
        Self::new(
            ErrorCode::InternalIoError,
            "IO error",
            to_details(InternalErrorDetails {
                error: error.into(),
                context,
            }),
        )
    }

    pub fn internal_json(error: impl Into<String>, context: Option<String>) -> Self {
        Self::new(
            ErrorCode::InternalJsonError,
            "JSON error",
            to_details(InternalErrorDetails {
                error: error.into(),
                context,
            }),
        )
    }

    pub fn with_hint(mut self, message: impl Into<String>) -> Self {
        self.hints.push(Hint {
            message: message.into(),
        });
        self
    }

    /// Adds an identifying key to the details object (operation, phase, template).
    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        match self.details {
            Value::Object(ref mut map) => {
                map.insert(key.to_string(), value.into());
            }
            _ => {
                let mut map = serde_json::Map::new();
                map.insert(key.to_string(), value.into());
                self.details = Value::Object(map);
            }
        }
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable.unwrap_or(false)
    }

    pub fn stage(&self) -> FailureStage {
        self.code.stage()
    }
}
