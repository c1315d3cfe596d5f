//! Template-level variables: package versions, change management and the
//! bookkeeping variables the runtime scripts read.

use serde_json::{json, Value};

use super::tasks::environment_variable;
use crate::config::{
    PackageMode, PhaseName, PhaseSelectionMode, ReleaseConfig, ResolutionMode, VariableSeed,
};
use crate::plan::{VariableKind, VariableSpec};

pub const DELIVERABLES_KEY: &str = "release_deliverables";
pub const CHANGE_TITLE_KEY: &str = "change_title";
pub const CHANGE_DESCRIPTION_KEY: &str = "change_description";
pub const BENCH_CHANGE_ID_KEY: &str = "bench_change_id";
pub const PHASE_CHOICE_KEY: &str = "phase_choice";

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedVariable {
    pub spec: VariableSpec,
    pub required: bool,
}

impl PlannedVariable {
    fn required(spec: VariableSpec) -> Self {
        Self {
            spec,
            required: true,
        }
    }

    fn optional(spec: VariableSpec) -> Self {
        Self {
            spec,
            required: false,
        }
    }
}

pub fn string_variable(key: impl Into<String>, label: impl Into<String>, value: Value) -> VariableSpec {
    VariableSpec {
        key: key.into(),
        kind: VariableKind::String,
        label: label.into(),
        value,
        requires_value: false,
        show_on_start: false,
        possible_values: Vec::new(),
    }
}

fn prompted(mut spec: VariableSpec, requires_value: bool) -> VariableSpec {
    spec.requires_value = requires_value;
    spec.show_on_start = true;
    spec
}

fn version_variable(package: &str) -> VariableSpec {
    prompted(
        string_variable(
            format!("{}_version", package),
            format!("{} version", package),
            json!(""),
        ),
        true,
    )
}

/// Package-version variables.
pub fn package_versions(cfg: &ReleaseConfig) -> Vec<VariableSpec> {
    match cfg.package_mode {
        PackageMode::String if !cfg.packages.is_empty() => {
            let names: Vec<&str> = cfg.packages.keys().map(String::as_str).collect();
            vec![prompted(
                string_variable(
                    DELIVERABLES_KEY,
                    "Deliverables to deploy (name:version, comma separated)",
                    json!(names.join(",")),
                ),
                true,
            )]
        }
        PackageMode::String => Vec::new(),
        PackageMode::Listbox => match cfg.packages.len() {
            0 => Vec::new(),
            1 if cfg.phases == [PhaseName::Dev] => Vec::new(),
            _ => cfg.packages.keys().map(|name| version_variable(name)).collect(),
        },
    }
}

/// Change-record variables, only when a production-class phase exists.
pub fn change_management(cfg: &ReleaseConfig) -> Vec<VariableSpec> {
    if !cfg.has_production_class() {
        return Vec::new();
    }

    let requires_value = !cfg.has_any_phase(&[PhaseName::Dev, PhaseName::Uat]);
    let mut vars = vec![
        prompted(
            string_variable(CHANGE_TITLE_KEY, "Change title", json!("")),
            requires_value,
        ),
        prompted(
            string_variable(CHANGE_DESCRIPTION_KEY, "Change description", json!("")),
            requires_value,
        ),
    ];

    let has_bench = cfg.has_phase(PhaseName::Bench);
    let has_production = cfg.has_phase(PhaseName::Production);
    let bench_change_required = if has_production && cfg.phases.len() == 1 {
        Some(true)
    } else if has_production && has_bench && cfg.phases.len() > 1 {
        Some(false)
    } else {
        None
    };
    if let Some(required) = bench_change_required {
        vars.push(prompted(
            string_variable(BENCH_CHANGE_ID_KEY, "Change id used on BENCH", json!("")),
            required,
        ));
    }

    vars
}

fn environment_variables(cfg: &ReleaseConfig) -> Vec<VariableSpec> {
    cfg.phases
        .iter()
        .filter(|phase| **phase != PhaseName::Build)
        .map(|phase| {
            let key = environment_variable(*phase);
            let label = format!("{} environment", phase);
            let choices = cfg.environments_for(*phase);
            match choices {
                [] => string_variable(key, label, json!(phase.default_environment())),
                [single] => string_variable(key, label, json!(single)),
                many => {
                    let values: Vec<String> = many
                        .iter()
                        .map(|entry| entry.split(';').next().unwrap_or(entry).to_string())
                        .collect();
                    VariableSpec {
                        kind: VariableKind::ListBox,
                        possible_values: values.clone(),
                        ..prompted(string_variable(key, label, json!(values[0])), true)
                    }
                }
            }
        })
        .collect()
}

fn state_variable(cfg: &ReleaseConfig) -> VariableSpec {
    let packages: Vec<&str> = cfg.packages.keys().map(String::as_str).collect();
    let phases: Vec<&str> = cfg.phases.iter().map(PhaseName::as_str).collect();
    VariableSpec {
        kind: VariableKind::MapStringString,
        ..string_variable(
            super::scripts::STATE_VARIABLE,
            "Release state",
            json!({
                "list_package": packages.join(","),
                "list_auto_undeploy": cfg.auto_undeploy_packages().join(","),
                "list_phase": phases.join(","),
                "list_env_BENCH": cfg.multi_bench_environments.join(","),
            }),
        )
    }
}

/// Supporting variables read by the runtime scripts and task payloads.
pub fn bookkeeping(cfg: &ReleaseConfig) -> Vec<PlannedVariable> {
    let mut out = Vec::new();

    for (key, seed) in &cfg.release_variables {
        let spec = match seed {
            VariableSeed::Date => string_variable(key.clone(), key.clone(), Value::Null),
            VariableSeed::Text(text) => {
                prompted(string_variable(key.clone(), key.clone(), json!(text)), true)
            }
            VariableSeed::Empty => prompted(string_variable(key.clone(), key.clone(), json!("")), true),
        };
        out.push(PlannedVariable::required(spec));
    }

    for (name, spec) in &cfg.packages {
        if spec.resolution_mode == ResolutionMode::NameFromBuildSystem {
            out.push(PlannedVariable::required(string_variable(
                format!("{}_deploy_id", name),
                format!("{} deployment id", name),
                json!(""),
            )));
        }
    }

    out.extend(environment_variables(cfg).into_iter().map(PlannedVariable::required));

    let selectable: Vec<String> = cfg
        .phases
        .iter()
        .filter(|phase| **phase != PhaseName::Build)
        .map(|phase| phase.to_string())
        .collect();
    if cfg.phase_selection_mode == PhaseSelectionMode::OneList && cfg.phases.len() > 1 {
        out.push(PlannedVariable::required(VariableSpec {
            kind: VariableKind::ListBox,
            possible_values: selectable.clone(),
            ..prompted(
                string_variable(
                    PHASE_CHOICE_KEY,
                    "Phase to run",
                    json!(selectable.first().cloned().unwrap_or_default()),
                ),
                true,
            )
        }));
    }

    out.push(PlannedVariable::required(state_variable(cfg)));
    out.push(PlannedVariable::required(string_variable(
        "application_id",
        "Application code",
        json!(cfg.application_id),
    )));
    out.push(PlannedVariable::optional(string_variable(
        "email_owner_release",
        "Change owner e-mail",
        json!(""),
    )));

    if let Some(token) = cfg.jenkins.as_ref().and_then(|j| j.api_token.as_ref()) {
        out.push(PlannedVariable::required(VariableSpec {
            kind: VariableKind::Password,
            ..string_variable("jenkins_api_token", "Jenkins API token", json!(token))
        }));
    }

    out
}
