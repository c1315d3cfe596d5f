//! Runs a compiled [`Plan`] against the Release API.
//!
//! Operations are grouped into dependency layers. A layer is dispatched onto
//! a `JoinSet`, bounded by a semaphore, and fully drained before the next one
//! starts. Workers only return results; all state changes happen at the
//! barrier.

pub mod layers;
pub mod report;
pub mod state;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::api::ReleaseApi;
use crate::error::{Error, Result};
use crate::plan::{Operation, OperationId, Plan};

pub use layers::compute_layers;
pub use report::{
    ExecutionMetrics, ExecutionReport, ExecutionSummary, OperationReport, OperationStatus,
    PhaseReport, PlanPreview,
};
pub use state::{ExecutionState, Outcome, PhaseMarker};

use report::RunContext;
use state::{Request, Response};

pub const DEFAULT_FAN_OUT: usize = 8;

/// Layering and fingerprint of a plan, without any remote call.
pub fn dry_run(plan: &Plan) -> Result<PlanPreview> {
    let layers = compute_layers(plan)?;
    Ok(PlanPreview {
        template_name: plan.template_name().unwrap_or_default().to_string(),
        fingerprint: plan.fingerprint()?,
        operation_count: plan.len(),
        layers,
        plan: plan.clone(),
    })
}

async fn perform<C: ReleaseApi + ?Sized>(client: &C, request: Request) -> Result<Response> {
    match request {
        Request::Template { folder_path, name } => {
            let existing = client.find_templates_by_name(&name).await?;
            match existing.as_slice() {
                [] => {}
                [previous] => {
                    log_status!("execute", "Replacing existing template {}", previous.id);
                    client.delete_template(&previous.id).await?;
                }
                many => {
                    let ids = many.iter().map(|t| t.id.clone()).collect();
                    return Err(Error::remote_conflict(name, ids));
                }
            }
            let created = client.create_template(&folder_path, &name).await?;
            Ok(Response::Template(created))
        }
        Request::DeletePhases { ids } => {
            for id in &ids {
                client.delete_phase(id).await?;
            }
            Ok(Response::Deleted)
        }
        Request::Phase {
            template_id,
            title,
            position,
        } => client
            .create_phase(&template_id, &title, position)
            .await
            .map(Response::Created),
        Request::Gate {
            phase_id,
            title,
            condition,
        } => {
            // Gate and condition are retried independently.
            let gate_id = client.create_gate(&phase_id, &title).await?;
            if let Some(condition) = condition {
                client.add_gate_condition(&gate_id, &condition).await?;
            }
            Ok(Response::Created(gate_id))
        }
        Request::Task { phase_id, task } => client
            .create_task(&phase_id, &task)
            .await
            .map(Response::Created),
        Request::Script {
            phase_id,
            title,
            body,
        } => client
            .create_script_task(&phase_id, &title, &body)
            .await
            .map(Response::Created),
        Request::Variable {
            template_id,
            variable,
        } => client
            .create_variable(&template_id, &variable)
            .await
            .map(Response::Created),
    }
}

/// Adds the identifying keys of the failing operation to a fatal error.
fn enrich(error: Error, op: &Operation, state: &ExecutionState) -> Error {
    let mut error = error
        .with_detail("operation", op.label())
        .with_detail("kind", op.kind.as_str());
    if let Some(phase) = op.target_phase {
        error = error.with_detail("phase", phase.to_string());
    }
    if let Some(template_id) = state.template_id() {
        error = error.with_detail("templateId", template_id);
    }
    error
}

pub struct Executor<C: ?Sized> {
    client: Arc<C>,
    fan_out: usize,
}

impl<C: ReleaseApi + ?Sized + 'static> Executor<C> {
    pub fn new(client: Arc<C>, fan_out: usize) -> Self {
        Self {
            client,
            fan_out: fan_out.max(1),
        }
    }

    /// Executes every layer in order. A required failure stops dispatch of
    /// later layers and is returned with the run summary in its details.
    pub async fn execute(&self, plan: &Plan) -> Result<ExecutionReport> {
        if plan.is_empty() {
            return Err(Error::pipeline_invariant("plan has no operations", Vec::new()));
        }
        let layers = compute_layers(plan)?;
        let run_id = uuid::Uuid::new_v4().to_string();
        let started_at = chrono::Utc::now().to_rfc3339();
        let run_started = Instant::now();

        log_status!(
            "execute",
            "Run {}: {} operations in {} layers (fan-out {})",
            run_id,
            plan.len(),
            layers.len(),
            self.fan_out
        );

        let semaphore = Arc::new(Semaphore::new(self.fan_out));
        let mut state = ExecutionState::new();
        let mut failure: Option<Error> = None;
        let mut per_layer = Vec::with_capacity(layers.len());

        for (index, layer) in layers.iter().enumerate() {
            if failure.is_some() {
                for id in layer {
                    state.record_skipped(*id);
                }
                continue;
            }

            let layer_started = Instant::now();
            let mut workers = JoinSet::new();

            for &id in layer {
                if failure.is_some() {
                    break;
                }
                let op = operation(plan, id)?;
                let request = match state.request_for(op) {
                    Ok(request) => request,
                    Err(err) => {
                        self.settle(op, Err(err), Duration::ZERO, &mut state, &mut failure);
                        continue;
                    }
                };

                let client = Arc::clone(&self.client);
                let semaphore = Arc::clone(&semaphore);
                workers.spawn(async move {
                    let _permit = semaphore.acquire_owned().await.ok();
                    let started = Instant::now();
                    let result = perform(client.as_ref(), request).await;
                    (id, result, started.elapsed())
                });
            }

            while let Some(joined) = workers.join_next().await {
                match joined {
                    Ok((id, result, elapsed)) => {
                        let op = operation(plan, id)?;
                        self.settle(op, result, elapsed, &mut state, &mut failure);
                    }
                    Err(join_error) => {
                        if failure.is_none() {
                            failure = Some(Error::pipeline_invariant(
                                format!("worker task ended abnormally: {}", join_error),
                                Vec::new(),
                            ));
                        }
                    }
                }
            }

            // Anything in this layer that never reported back.
            for id in layer {
                if state.record(*id).is_none() {
                    state.record_skipped(*id);
                }
            }

            let elapsed = layer_started.elapsed();
            log_status!(
                "execute",
                "Layer {}/{} settled in {}ms",
                index + 1,
                layers.len(),
                elapsed.as_millis()
            );
            per_layer.push(elapsed);
        }

        let template_url = state
            .template_id()
            .map(|id| self.client.template_url(id));
        let report = ExecutionReport::build(
            plan,
            &state,
            RunContext {
                run_id,
                started_at,
                template_url,
                layers: layers.len(),
                per_layer,
                total: run_started.elapsed(),
            },
        );

        match failure {
            Some(error) => {
                let partial = serde_json::to_value(&report.summary).unwrap_or_default();
                Err(error.with_detail("summary", partial))
            }
            None => {
                log_status!(
                    "execute",
                    "Run {} finished: {} succeeded, {} optional failures",
                    report.run_id,
                    report.summary.succeeded,
                    report.summary.failed_optional
                );
                Ok(report)
            }
        }
    }

    fn settle(
        &self,
        op: &Operation,
        result: Result<Response>,
        elapsed: Duration,
        state: &mut ExecutionState,
        failure: &mut Option<Error>,
    ) {
        match result {
            Ok(response) => state.record_success(op, response, elapsed),
            Err(err) if !op.required => {
                log_status!("execute", "Optional {} failed: {}", op.label(), err.message);
                state.record_failure(op, &err, elapsed);
            }
            Err(err) => {
                log_status!("execute", "Required {} failed: {}", op.label(), err.message);
                state.record_failure(op, &err, elapsed);
                if failure.is_none() {
                    *failure = Some(enrich(err, op, state));
                }
            }
        }
    }
}

fn operation(plan: &Plan, id: OperationId) -> Result<&Operation> {
    plan.get(id).ok_or_else(|| {
        Error::pipeline_invariant(format!("layer references unknown operation {}", id), Vec::new())
    })
}
