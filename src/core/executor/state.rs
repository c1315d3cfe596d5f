//! Run-scoped bookkeeping, owned by the executor and mutated only at the
//! layer barrier.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::api::CreatedTemplate;
use crate::error::{Error, Result};
use crate::plan::{Operation, OperationId, OperationKind, Payload, PhaseKey};

/// Resolved request for one operation, ready to hand to a worker.
#[derive(Debug, Clone)]
pub(crate) enum Request {
    Template {
        folder_path: String,
        name: String,
    },
    DeletePhases {
        ids: Vec<String>,
    },
    Phase {
        template_id: String,
        title: String,
        position: Option<usize>,
    },
    Gate {
        phase_id: String,
        title: String,
        condition: Option<String>,
    },
    Task {
        phase_id: String,
        task: crate::plan::TaskPayload,
    },
    Script {
        phase_id: String,
        title: String,
        body: String,
    },
    Variable {
        template_id: String,
        variable: crate::plan::VariableSpec,
    },
}

#[derive(Debug, Clone)]
pub(crate) enum Response {
    Template(CreatedTemplate),
    Created(String),
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Succeeded { remote_id: Option<String> },
    FailedOptional { error: String },
    Failed { error: String },
    Skipped,
}

#[derive(Debug, Clone)]
pub struct OperationRecord {
    pub outcome: Outcome,
    pub duration: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseMarker {
    pub remote_id: String,
    pub tasks_created: usize,
}

#[derive(Debug, Default)]
pub struct ExecutionState {
    template_id: Option<String>,
    default_phase_ids: Vec<String>,
    markers: BTreeMap<PhaseKey, PhaseMarker>,
    records: BTreeMap<OperationId, OperationRecord>,
}

impl ExecutionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn template_id(&self) -> Option<&str> {
        self.template_id.as_deref()
    }

    pub fn phase_id(&self, key: PhaseKey) -> Option<&str> {
        self.markers.get(&key).map(|m| m.remote_id.as_str())
    }

    pub fn markers(&self) -> &BTreeMap<PhaseKey, PhaseMarker> {
        &self.markers
    }

    pub fn records(&self) -> &BTreeMap<OperationId, OperationRecord> {
        &self.records
    }

    pub fn record(&self, id: OperationId) -> Option<&OperationRecord> {
        self.records.get(&id)
    }

    fn require_template(&self, op: &Operation) -> Result<String> {
        self.template_id.clone().ok_or_else(|| {
            Error::pipeline_invariant(
                format!("{} dispatched before the template exists", op.label()),
                vec![op.label()],
            )
        })
    }

    fn require_phase(&self, op: &Operation) -> Result<String> {
        op.target_phase
            .and_then(|key| self.phase_id(key))
            .map(str::to_string)
            .ok_or_else(|| {
                Error::pipeline_invariant(
                    format!("{} dispatched before its phase exists", op.label()),
                    vec![op.label()],
                )
            })
    }

    /// Builds the request for an operation from what earlier layers produced.
    pub(crate) fn request_for(&self, op: &Operation) -> Result<Request> {
        Ok(match &op.payload {
            Payload::Template { folder_path, name } => Request::Template {
                folder_path: folder_path.clone(),
                name: name.clone(),
            },
            Payload::DeleteDefaultPhases => Request::DeletePhases {
                ids: self.default_phase_ids.clone(),
            },
            Payload::Phase { title, position } => Request::Phase {
                template_id: self.require_template(op)?,
                title: title.clone(),
                position: *position,
            },
            Payload::Gate { title, condition } => Request::Gate {
                phase_id: self.require_phase(op)?,
                title: title.clone(),
                condition: condition.clone(),
            },
            Payload::Task(task) => Request::Task {
                phase_id: self.require_phase(op)?,
                task: task.clone(),
            },
            Payload::Script { title, body } => Request::Script {
                phase_id: self.require_phase(op)?,
                title: title.clone(),
                body: body.clone(),
            },
            Payload::Variable(variable) => Request::Variable {
                template_id: self.require_template(op)?,
                variable: variable.clone(),
            },
        })
    }

    pub(crate) fn record_success(&mut self, op: &Operation, response: Response, duration: Duration) {
        let remote_id = match response {
            Response::Template(created) => {
                self.template_id = Some(created.id.clone());
                self.default_phase_ids = created.default_phase_ids;
                Some(created.id)
            }
            Response::Created(id) => Some(id),
            Response::Deleted => None,
        };

        if let (Some(key), Some(id)) = (op.target_phase, remote_id.as_ref()) {
            match op.kind {
                OperationKind::CreatePhase => {
                    self.markers.insert(
                        key,
                        PhaseMarker {
                            remote_id: id.clone(),
                            tasks_created: 0,
                        },
                    );
                }
                OperationKind::CreateGate
                | OperationKind::CreateTask
                | OperationKind::CreateCleanupScript => {
                    if let Some(marker) = self.markers.get_mut(&key) {
                        marker.tasks_created += 1;
                    }
                }
                _ => {}
            }
        }

        self.records.insert(
            op.id,
            OperationRecord {
                outcome: Outcome::Succeeded { remote_id },
                duration,
            },
        );
    }

    pub(crate) fn record_failure(&mut self, op: &Operation, error: &Error, duration: Duration) {
        let outcome = if op.required {
            Outcome::Failed {
                error: error.message.clone(),
            }
        } else {
            Outcome::FailedOptional {
                error: error.message.clone(),
            }
        };
        self.records.insert(op.id, OperationRecord { outcome, duration });
    }

    pub(crate) fn record_skipped(&mut self, id: OperationId) {
        self.records.entry(id).or_insert(OperationRecord {
            outcome: Outcome::Skipped,
            duration: Duration::ZERO,
        });
    }
}
