//! Serializable run results.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;

use super::state::{ExecutionState, Outcome};
use crate::plan::{OperationId, PhaseKey, Plan};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Succeeded,
    FailedOptional,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationReport {
    pub id: OperationId,
    pub kind: &'static str,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<PhaseKey>,
    pub status: OperationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseReport {
    pub phase: PhaseKey,
    pub remote_id: String,
    pub tasks_created: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed_optional: usize,
    pub failed: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionMetrics {
    pub total_ms: u64,
    pub per_kind_ms: BTreeMap<&'static str, u64>,
    pub per_layer_ms: Vec<u64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReport {
    pub run_id: String,
    pub started_at: String,
    pub template_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_url: Option<String>,
    pub layers: usize,
    pub operations: Vec<OperationReport>,
    pub phases: Vec<PhaseReport>,
    pub summary: ExecutionSummary,
    pub metrics: ExecutionMetrics,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// What `plan` prints: the compiled plan and its layering, no remote calls.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanPreview {
    pub template_name: String,
    pub fingerprint: String,
    pub operation_count: usize,
    pub layers: Vec<Vec<OperationId>>,
    pub plan: Plan,
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Timing and identity of a run, gathered by the executor loop.
pub(crate) struct RunContext {
    pub run_id: String,
    pub started_at: String,
    pub template_url: Option<String>,
    pub layers: usize,
    pub per_layer: Vec<Duration>,
    pub total: Duration,
}

impl ExecutionReport {
    pub(crate) fn build(plan: &Plan, state: &ExecutionState, run: RunContext) -> Self {
        let mut summary = ExecutionSummary {
            total: plan.len(),
            ..ExecutionSummary::default()
        };
        let mut per_kind_ms: BTreeMap<&'static str, u64> = BTreeMap::new();
        let mut warnings = Vec::new();

        let operations = plan
            .operations
            .iter()
            .map(|op| {
                let record = state.record(op.id);
                let duration = record.map(|r| r.duration).unwrap_or_default();
                *per_kind_ms.entry(op.kind.as_str()).or_default() += millis(duration);

                let (status, remote_id, error) = match record.map(|r| &r.outcome) {
                    Some(Outcome::Succeeded { remote_id }) => {
                        summary.succeeded += 1;
                        (OperationStatus::Succeeded, remote_id.clone(), None)
                    }
                    Some(Outcome::FailedOptional { error }) => {
                        summary.failed_optional += 1;
                        warnings.push(format!("{}: {}", op.label(), error));
                        (OperationStatus::FailedOptional, None, Some(error.clone()))
                    }
                    Some(Outcome::Failed { error }) => {
                        summary.failed += 1;
                        (OperationStatus::Failed, None, Some(error.clone()))
                    }
                    Some(Outcome::Skipped) | None => {
                        summary.skipped += 1;
                        (OperationStatus::Skipped, None, None)
                    }
                };

                OperationReport {
                    id: op.id,
                    kind: op.kind.as_str(),
                    label: op.label(),
                    phase: op.target_phase,
                    status,
                    remote_id,
                    error,
                    duration_ms: millis(duration),
                }
            })
            .collect();

        let phases = state
            .markers()
            .iter()
            .map(|(key, marker)| PhaseReport {
                phase: *key,
                remote_id: marker.remote_id.clone(),
                tasks_created: marker.tasks_created,
            })
            .collect();

        Self {
            run_id: run.run_id,
            started_at: run.started_at,
            template_name: plan.template_name().unwrap_or_default().to_string(),
            template_id: state.template_id().map(str::to_string),
            template_url: run.template_url,
            layers: run.layers,
            operations,
            phases,
            summary,
            metrics: ExecutionMetrics {
                total_ms: millis(run.total),
                per_kind_ms,
                per_layer_ms: run.per_layer.into_iter().map(millis).collect(),
            },
            warnings,
        }
    }

    pub fn status_of(&self, id: OperationId) -> Option<OperationStatus> {
        self.operations.iter().find(|op| op.id == id).map(|op| op.status)
    }
}
