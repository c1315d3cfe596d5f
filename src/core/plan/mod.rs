//! Inert plan data produced by the compiler and consumed by the executor.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::config::PhaseName;
use crate::error::{Error, Result};

pub const DYNAMIC_PHASE_TITLE: &str = "dynamic_release";
const CHANGE_PHASE_PREFIX: &str = "CREATE_CHANGE_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(pub usize);

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    CreateTemplate,
    DeletePhaseDefault,
    CreatePhase,
    CreateGate,
    CreateTask,
    CreateVariable,
    CreateCleanupScript,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::CreateTemplate => "create_template",
            OperationKind::DeletePhaseDefault => "delete_phase_default",
            OperationKind::CreatePhase => "create_phase",
            OperationKind::CreateGate => "create_gate",
            OperationKind::CreateTask => "create_task",
            OperationKind::CreateVariable => "create_variable",
            OperationKind::CreateCleanupScript => "create_cleanup_script",
        }
    }
}

/// A phase the plan creates. Production-class phases get a change-record
/// sub-phase ahead of the main one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PhaseKey {
    Release(PhaseName),
    ChangeRecord(PhaseName),
    Dynamic,
}

impl PhaseKey {
    pub fn title(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for PhaseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhaseKey::Release(phase) => write!(f, "{}", phase),
            PhaseKey::ChangeRecord(phase) => write!(f, "{}{}", CHANGE_PHASE_PREFIX, phase),
            PhaseKey::Dynamic => f.write_str(DYNAMIC_PHASE_TITLE),
        }
    }
}

impl FromStr for PhaseKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s == DYNAMIC_PHASE_TITLE {
            return Ok(PhaseKey::Dynamic);
        }
        if let Some(rest) = s.strip_prefix(CHANGE_PHASE_PREFIX) {
            return PhaseName::from_str("phase", rest).map(PhaseKey::ChangeRecord);
        }
        PhaseName::from_str("phase", s).map(PhaseKey::Release)
    }
}

impl Serialize for PhaseKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PhaseKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(|e: Error| serde::de::Error::custom(e.message))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VariableKind {
    #[serde(rename = "xlrelease.StringVariable")]
    String,
    #[serde(rename = "xlrelease.ListStringVariable")]
    ListBox,
    #[serde(rename = "xlrelease.PasswordStringVariable")]
    Password,
    #[serde(rename = "xlrelease.MapStringStringVariable")]
    MapStringString,
    #[serde(rename = "xlrelease.BooleanVariable")]
    Boolean,
    #[serde(rename = "xlrelease.DateVariable")]
    Date,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableSpec {
    pub key: String,
    pub kind: VariableKind,
    pub label: String,
    pub value: serde_json::Value,
    pub requires_value: bool,
    pub show_on_start: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub possible_values: Vec<String>,
}

/// A task handed to the orchestrator as-is, apart from the container id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPayload {
    pub title: String,
    pub task_type: String,
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precondition: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum Payload {
    Template {
        folder_path: String,
        name: String,
    },
    DeleteDefaultPhases,
    Phase {
        title: String,
        /// Index to move the phase to once created. `None` appends.
        position: Option<usize>,
    },
    Gate {
        title: String,
        condition: Option<String>,
    },
    Task(TaskPayload),
    Variable(VariableSpec),
    Script {
        title: String,
        body: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub id: OperationId,
    pub kind: OperationKind,
    /// Phase this operation belongs to. Variables keep it for grouping only.
    pub target_phase: Option<PhaseKey>,
    pub payload: Payload,
    pub depends_on: BTreeSet<OperationId>,
    pub required: bool,
}

impl Operation {
    /// Short identifying label used in logs and errors.
    pub fn label(&self) -> String {
        let name = match &self.payload {
            Payload::Template { name, .. } => name.as_str(),
            Payload::DeleteDefaultPhases => "default phases",
            Payload::Phase { title, .. } => title.as_str(),
            Payload::Gate { title, .. } => title.as_str(),
            Payload::Task(task) => task.title.as_str(),
            Payload::Variable(var) => var.key.as_str(),
            Payload::Script { title, .. } => title.as_str(),
        };
        format!("{} {} '{}'", self.id, self.kind.as_str(), name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub operations: Vec<Operation>,
    pub phase_index: BTreeMap<PhaseKey, OperationId>,
}

impl Plan {
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn get(&self, id: OperationId) -> Option<&Operation> {
        self.operations.get(id.0).filter(|op| op.id == id)
    }

    pub fn template_name(&self) -> Option<&str> {
        self.operations.iter().find_map(|op| match &op.payload {
            Payload::Template { name, .. } => Some(name.as_str()),
            _ => None,
        })
    }

    pub fn operations_in(&self, phase: PhaseKey) -> impl Iterator<Item = &Operation> {
        self.operations
            .iter()
            .filter(move |op| op.target_phase == Some(phase))
    }

    pub fn count_kind(&self, kind: OperationKind) -> usize {
        self.operations.iter().filter(|op| op.kind == kind).count()
    }

    pub fn variables(&self) -> impl Iterator<Item = &VariableSpec> {
        self.operations.iter().filter_map(|op| match &op.payload {
            Payload::Variable(var) => Some(var),
            _ => None,
        })
    }

    pub fn variable(&self, key: &str) -> Option<&VariableSpec> {
        self.variables().find(|var| var.key == key)
    }

    /// Titles of tasks, gates and scripts inside a phase, in emission order.
    pub fn titles_in(&self, phase: PhaseKey) -> Vec<&str> {
        self.operations_in(phase)
            .filter_map(|op| match &op.payload {
                Payload::Gate { title, .. } | Payload::Script { title, .. } => Some(title.as_str()),
                Payload::Task(task) => Some(task.title.as_str()),
                _ => None,
            })
            .collect()
    }

    /// SHA-256 over the canonical JSON of the operations and phase index.
    pub fn fingerprint(&self) -> Result<String> {
        let canonical = serde_json::to_vec(self)
            .map_err(|e| Error::internal_json(e.to_string(), Some("fingerprint plan".into())))?;
        Ok(format!("{:x}", Sha256::digest(&canonical)))
    }
}

/// Append-only plan construction. Ids are dense and assigned in push order.
#[derive(Debug, Default)]
pub struct PlanBuilder {
    plan: Plan,
}

impl PlanBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(
        &mut self,
        kind: OperationKind,
        target_phase: Option<PhaseKey>,
        payload: Payload,
        depends_on: impl IntoIterator<Item = OperationId>,
        required: bool,
    ) -> OperationId {
        let id = OperationId(self.plan.operations.len());
        self.plan.operations.push(Operation {
            id,
            kind,
            target_phase,
            payload,
            depends_on: depends_on.into_iter().collect(),
            required,
        });
        id
    }

    /// Pushes a phase creation and records it in the phase index.
    pub fn push_phase(
        &mut self,
        key: PhaseKey,
        position: Option<usize>,
        depends_on: impl IntoIterator<Item = OperationId>,
    ) -> Result<OperationId> {
        if self.plan.phase_index.contains_key(&key) {
            return Err(Error::compile_internal(format!("phase {} emitted twice", key)));
        }
        let id = self.push(
            OperationKind::CreatePhase,
            Some(key),
            Payload::Phase {
                title: key.title(),
                position,
            },
            depends_on,
            true,
        );
        self.plan.phase_index.insert(key, id);
        Ok(id)
    }

    pub fn finish(self) -> Plan {
        self.plan
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.plan.operations.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_keys_round_trip_through_titles() {
        for key in [
            PhaseKey::Release(PhaseName::Uat),
            PhaseKey::ChangeRecord(PhaseName::Production),
            PhaseKey::Dynamic,
        ] {
            assert_eq!(key.title().parse::<PhaseKey>().unwrap(), key);
        }
        assert_eq!(
            PhaseKey::ChangeRecord(PhaseName::Bench).title(),
            "CREATE_CHANGE_BENCH"
        );
    }

    #[test]
    fn builder_assigns_dense_ids_and_indexes_phases() {
        let mut builder = PlanBuilder::new();
        let template = builder.push(
            OperationKind::CreateTemplate,
            None,
            Payload::Template {
                folder_path: "Applications/R".into(),
                name: "R".into(),
            },
            [],
            true,
        );
        let dev = builder
            .push_phase(PhaseKey::Release(PhaseName::Dev), None, [template])
            .unwrap();
        let plan = builder.finish();

        assert_eq!(template, OperationId(0));
        assert_eq!(dev, OperationId(1));
        assert_eq!(plan.phase_index[&PhaseKey::Release(PhaseName::Dev)], dev);
        assert_eq!(plan.template_name(), Some("R"));
        assert!(plan.get(dev).unwrap().depends_on.contains(&template));
    }

    #[test]
    fn duplicate_phase_is_an_internal_error() {
        let mut builder = PlanBuilder::new();
        builder.push_phase(PhaseKey::Dynamic, Some(0), []).unwrap();
        let err = builder.push_phase(PhaseKey::Dynamic, Some(0), []).unwrap_err();
        assert_eq!(err.code.as_str(), "compile.internal");
    }

    #[test]
    fn plans_serialize_with_phase_titles_as_keys() {
        let mut builder = PlanBuilder::new();
        builder
            .push_phase(PhaseKey::ChangeRecord(PhaseName::Bench), None, [])
            .unwrap();
        let plan = builder.finish();
        let json = serde_json::to_value(&plan).unwrap();
        assert_eq!(json["phaseIndex"]["CREATE_CHANGE_BENCH"], 0);
        assert_eq!(plan.fingerprint().unwrap().len(), 64);
    }
}
