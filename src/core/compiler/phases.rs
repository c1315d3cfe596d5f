//! Per-phase task sequences.
//!
//! Development phases (BUILD, DEV, UAT) are a linear list bracketed by two
//! gates. Production-class phases (BENCH, PRODUCTION) get a change-record
//! sub-phase followed by the main phase, and carry injected technical tasks.

use std::collections::BTreeSet;

use super::tasks::{self, ChangeTransition};
use crate::config::{
    NotificationHook, PhaseName, ReleaseConfig, TaskSpec, TechnicalCategory, TechnicalTaskKind,
};
use crate::error::{Error, Result};
use crate::plan::{OperationId, OperationKind, Payload, PhaseKey, PlanBuilder, TaskPayload};

pub const START_GATE_TITLE: &str = "Validation_release_template";

/// Lifecycle of one phase's change record, as far as the plan drives it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeState {
    NotStarted,
    AwaitingApproval,
    Implementing,
    Closed,
}

impl ChangeState {
    pub fn apply(self, transition: ChangeTransition) -> Result<ChangeState> {
        use ChangeState::*;
        use ChangeTransition::*;

        match (self, transition) {
            (NotStarted, InitialValidation) | (NotStarted, Scheduled) => Ok(AwaitingApproval),
            (AwaitingApproval, Scheduled) => Ok(AwaitingApproval),
            (AwaitingApproval, Implement) => Ok(Implementing),
            (Implementing, Close) => Ok(Closed),
            (state, transition) => Err(Error::compile_internal(format!(
                "change transition {:?} is not valid from {:?}",
                transition, state
            ))),
        }
    }
}

/// Appends operations to one phase, each ordered after the previous one.
pub(crate) struct PhaseBuilder<'a> {
    plan: &'a mut PlanBuilder,
    key: PhaseKey,
    phase_op: OperationId,
    last: OperationId,
    injected: BTreeSet<TechnicalCategory>,
}

impl<'a> PhaseBuilder<'a> {
    pub(crate) fn open(
        plan: &'a mut PlanBuilder,
        key: PhaseKey,
        position: Option<usize>,
        depends_on: impl IntoIterator<Item = OperationId>,
    ) -> Result<Self> {
        let phase_op = plan.push_phase(key, position, depends_on)?;
        Ok(Self {
            plan,
            key,
            phase_op,
            last: phase_op,
            injected: BTreeSet::new(),
        })
    }

    pub(crate) fn phase_op(&self) -> OperationId {
        self.phase_op
    }

    fn push(&mut self, kind: OperationKind, payload: Payload, required: bool) -> OperationId {
        let deps = [self.phase_op, self.last];
        let id = self.plan.push(kind, Some(self.key), payload, deps, required);
        self.last = id;
        id
    }

    pub(crate) fn task(&mut self, payload: TaskPayload) -> OperationId {
        self.push(OperationKind::CreateTask, Payload::Task(payload), true)
    }

    pub(crate) fn optional_task(&mut self, payload: TaskPayload) -> OperationId {
        self.push(OperationKind::CreateTask, Payload::Task(payload), false)
    }

    pub(crate) fn gate(&mut self, title: String, condition: Option<String>) -> OperationId {
        self.push(
            OperationKind::CreateGate,
            Payload::Gate { title, condition },
            true,
        )
    }

    pub(crate) fn script(&mut self, title: &str, body: String, required: bool) -> OperationId {
        self.push(
            OperationKind::CreateCleanupScript,
            Payload::Script {
                title: title.to_string(),
                body,
            },
            required,
        )
    }

    /// Group-level operation that is not a phase task, e.g. a variable owned by the phase.
    pub(crate) fn attach(&mut self, kind: OperationKind, payload: Payload, template: OperationId) {
        self.plan.push(kind, Some(self.key), payload, [template], true);
    }

    /// Emits a technical-task category at most once for this phase.
    fn inject(&mut self, cfg: &ReleaseConfig, phase: PhaseName, category: TechnicalCategory) {
        if !self.injected.insert(category) {
            return;
        }
        for (ordinal, kind) in cfg.technical_tasks.get(category).iter().enumerate() {
            match kind {
                TechnicalTaskKind::OpsGate => {
                    let (title, condition) = tasks::ops_gate_title(phase, category, ordinal);
                    self.gate(title, Some(condition));
                }
                TechnicalTaskKind::DbaApproval | TechnicalTaskKind::DbaFactor => {
                    self.task(tasks::dba_task(phase, category, *kind, ordinal));
                }
            }
        }
    }
}

fn deploy_bounds(tasks: &[TaskSpec]) -> Option<(usize, usize)> {
    let first = tasks.iter().position(TaskSpec::is_tool_deploy)?;
    let last = tasks.iter().rposition(TaskSpec::is_tool_deploy)?;
    Some((first, last))
}

fn emit_auto_undeploy(pb: &mut PhaseBuilder<'_>, cfg: &ReleaseConfig, phase: PhaseName) {
    for (name, spec) in &cfg.packages {
        if spec.auto_undeploy.is_enabled() {
            pb.task(tasks::undeploy(phase, name, spec));
        }
    }
}

fn emit_task(pb: &mut PhaseBuilder<'_>, cfg: &ReleaseConfig, phase: PhaseName, task: &TaskSpec) {
    match task {
        TaskSpec::ToolDeploy { group, packages } => {
            for package in packages {
                if let Some(spec) = cfg.packages.get(package) {
                    pb.task(tasks::deploy(phase, group, package, spec));
                }
            }
        }
        TaskSpec::ControlM { folders } => {
            for folder in folders {
                pb.task(tasks::controlm_order(cfg, phase, folder));
            }
        }
        TaskSpec::LinuxScript { title, script } => {
            pb.task(tasks::remote_script(phase, title, script, false));
        }
        TaskSpec::WindowsScript { title, script } => {
            pb.task(tasks::remote_script(phase, title, script, true));
        }
        TaskSpec::Notify { hook, recipients } => {
            pb.optional_task(tasks::notification(cfg, phase, *hook, recipients));
        }
    }
}

fn emit_notifications(
    pb: &mut PhaseBuilder<'_>,
    cfg: &ReleaseConfig,
    phase: PhaseName,
    wanted: NotificationHook,
) {
    for task in cfg.tasks_for(phase) {
        if let TaskSpec::Notify { hook, recipients } = task {
            if *hook == wanted {
                pb.optional_task(tasks::notification(cfg, phase, *hook, recipients));
            }
        }
    }
}

fn delivery_gate(pb: &mut PhaseBuilder<'_>, phase: PhaseName) {
    pb.gate(
        format!("DEV team: Validate installation in {}", phase),
        Some(format!("DEV team: Validate the delivery in {}", phase)),
    );
}

/// Jenkins jobs run in BUILD, or in DEV when the release has no BUILD phase.
fn runs_build_jobs(cfg: &ReleaseConfig, phase: PhaseName) -> bool {
    match phase {
        PhaseName::Build => true,
        PhaseName::Dev => !cfg.has_phase(PhaseName::Build),
        _ => false,
    }
}

/// Compiles BUILD, DEV or UAT. Returns the phase-creation operation.
pub(crate) fn development(
    plan: &mut PlanBuilder,
    cfg: &ReleaseConfig,
    phase: PhaseName,
    after: &[OperationId],
) -> Result<OperationId> {
    let mut pb = PhaseBuilder::open(plan, PhaseKey::Release(phase), None, after.iter().copied())?;
    let phase_tasks = cfg.tasks_for(phase);

    pb.gate(START_GATE_TITLE.to_string(), None);

    if phase_tasks.iter().any(TaskSpec::is_tool_deploy) {
        pb.task(tasks::user_input(phase));
    }

    if let Some(jenkins) = cfg.jenkins.as_ref().filter(|_| runs_build_jobs(cfg, phase)) {
        for (package, job) in &jenkins.jobs {
            if cfg.packages.contains_key(package) {
                pb.task(tasks::jenkins_build(jenkins, package, job));
            }
        }
    }

    let mut undeploy_done = false;
    for task in phase_tasks {
        if task.is_tool_deploy() && !undeploy_done {
            emit_auto_undeploy(&mut pb, cfg, phase);
            undeploy_done = true;
        }
        emit_task(&mut pb, cfg, phase, task);
    }

    delivery_gate(&mut pb, phase);
    Ok(pb.phase_op())
}

/// Compiles BENCH or PRODUCTION as a change sub-phase plus the main phase.
/// Returns the main phase-creation operation.
pub(crate) fn production(
    plan: &mut PlanBuilder,
    cfg: &ReleaseConfig,
    phase: PhaseName,
    after: &[OperationId],
) -> Result<OperationId> {
    let mut state = ChangeState::NotStarted;

    let change_op = {
        let mut change = PhaseBuilder::open(
            plan,
            PhaseKey::ChangeRecord(phase),
            None,
            after.iter().copied(),
        )?;
        change.task(tasks::create_change(cfg, phase));
        change.gate(format!("Validation creation SNOW ${{{}.sun.id}}", phase), None);

        let standing_change =
            cfg.standard_change_template_id.is_some() && phase == PhaseName::Production;
        if standing_change {
            state = state.apply(ChangeTransition::Scheduled)?;
            change.task(tasks::change_transition(phase, ChangeTransition::Scheduled));
        } else {
            state = state.apply(ChangeTransition::InitialValidation)?;
            change.task(tasks::change_transition(
                phase,
                ChangeTransition::InitialValidation,
            ));
            change.task(tasks::wait_for_approval(phase));
        }
        change.phase_op()
    };

    let mut pb = PhaseBuilder::open(plan, PhaseKey::Release(phase), None, [change_op])?;
    pb.inject(cfg, phase, TechnicalCategory::BeforeDeployment);

    pb.gate(
        format!("OPS TASK : Validation of the SNOW ${{{}.sun.id}}", phase),
        Some(format!("change put in state deploiement ${{{}.sun.id}}", phase)),
    );

    if phase == PhaseName::Bench {
        state = state.apply(ChangeTransition::Scheduled)?;
        pb.task(tasks::change_transition(phase, ChangeTransition::Scheduled));
    }
    state = state.apply(ChangeTransition::Implement)?;
    pb.task(tasks::change_transition(phase, ChangeTransition::Implement));

    pb.script(
        "Lookup change owner e-mail",
        super::scripts::ops_email_lookup(phase),
        false,
    );

    let phase_tasks = cfg.tasks_for(phase);
    let bounds = deploy_bounds(phase_tasks);
    for (index, task) in phase_tasks.iter().enumerate() {
        if matches!(task, TaskSpec::Notify { .. }) {
            continue;
        }
        if bounds.map(|(first, _)| first) == Some(index) {
            pb.inject(cfg, phase, TechnicalCategory::BeforeToolDeploy);
            emit_auto_undeploy(&mut pb, cfg, phase);
        }
        emit_task(&mut pb, cfg, phase, task);
        if bounds.map(|(_, last)| last) == Some(index) {
            pb.inject(cfg, phase, TechnicalCategory::AfterToolDeploy);
        }
    }

    pb.inject(cfg, phase, TechnicalCategory::AfterDeployment);
    emit_notifications(&mut pb, cfg, phase, NotificationHook::Close);
    if phase == PhaseName::Production {
        delivery_gate(&mut pb, phase);
    }
    emit_notifications(&mut pb, cfg, phase, NotificationHook::End);

    state = state.apply(ChangeTransition::Close)?;
    debug_assert_eq!(state, ChangeState::Closed);
    pb.task(tasks::change_transition(phase, ChangeTransition::Close));

    Ok(pb.phase_op())
}
