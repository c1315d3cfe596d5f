//! Turns a validated [`ReleaseConfig`] into an inert [`Plan`].
//!
//! Compilation is synchronous and deterministic: packages and phase tasks
//! are walked in `BTreeMap` order, phases in configured order, and nothing
//! here touches the network. Every contradiction is reported before the
//! first operation is pushed.

pub mod dynamic;
pub(crate) mod phases;
pub mod scripts;
pub(crate) mod tasks;
pub mod variables;
pub mod variant;

use crate::config::{ReleaseConfig, TaskSpec};
use crate::error::{Error, Result};
use crate::plan::{OperationId, OperationKind, Payload, Plan, PlanBuilder};

pub use phases::{ChangeState, START_GATE_TITLE};
pub use tasks::ChangeTransition;
pub use variant::{VariantRule, VariantTable};

/// Compiles with the built-in variant rules.
pub fn compile(cfg: &ReleaseConfig) -> Result<Plan> {
    compile_with(cfg, &VariantTable::builtin())
}

pub fn compile_with(cfg: &ReleaseConfig, variants: &VariantTable) -> Result<Plan> {
    check_preconditions(cfg)?;

    let mut plan = PlanBuilder::new();
    let template = plan.push(
        OperationKind::CreateTemplate,
        None,
        Payload::Template {
            folder_path: cfg.folder_path.clone(),
            name: cfg.name.clone(),
        },
        [],
        true,
    );
    plan.push(
        OperationKind::DeletePhaseDefault,
        None,
        Payload::DeleteDefaultPhases,
        [template],
        false,
    );

    let mut previous: Option<OperationId> = None;
    for phase in &cfg.phases {
        let after: Vec<OperationId> = std::iter::once(template).chain(previous).collect();
        let phase_op = if phase.is_production_class() {
            phases::production(&mut plan, cfg, *phase, &after)?
        } else {
            phases::development(&mut plan, cfg, *phase, &after)?
        };
        previous = Some(phase_op);
    }

    let template_variables = variables::package_versions(cfg)
        .into_iter()
        .chain(variables::change_management(cfg))
        .map(|spec| (spec, true))
        .chain(
            variables::bookkeeping(cfg)
                .into_iter()
                .map(|planned| (planned.spec, planned.required)),
        );
    for (spec, required) in template_variables {
        plan.push(
            OperationKind::CreateVariable,
            None,
            Payload::Variable(spec),
            [template],
            required,
        );
    }

    dynamic::emit(&mut plan, cfg, variants, template)?;

    let plan = plan.finish();
    log_status!(
        "compile",
        "Compiled '{}' into {} operations across {} phases",
        cfg.name,
        plan.len(),
        plan.phase_index.len()
    );
    Ok(plan)
}

/// Structural contradictions the decision tables cannot resolve.
fn check_preconditions(cfg: &ReleaseConfig) -> Result<()> {
    if cfg.packages.is_empty() {
        if let Some(phase) = cfg.phases.iter().find(|p| p.is_production_class()) {
            return Err(Error::compile_contradiction(
                &cfg.name,
                "phase_classification",
                format!("{} requested without any deployable package", phase),
            )
            .with_detail("phase", phase.as_str()));
        }
    }

    for (phase, tasks) in &cfg.phase_tasks {
        for task in tasks {
            if let TaskSpec::ToolDeploy { group, packages } = task {
                if packages.is_empty() {
                    return Err(Error::compile_contradiction(
                        &cfg.name,
                        "tool_deploy",
                        format!("Deploy group '{}' in {} lists no package", group, phase),
                    )
                    .with_detail("phase", phase.as_str()));
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::loader::parse_yaml;
    use crate::config::PhaseName;
    use crate::plan::PhaseKey;

    const DESCRIPTOR: &str = r#"
general_info:
  name_release: Billing
  iua: A7K12
  xlr_folder: Applications/Billing
  phases: [DEV, PRODUCTION]
  template_package_mode: string
template_liste_package:
  App:
    package_build_name: app-${version}
    XLD_application_path: Applications/APP/app
    XLD_environment_path: Environments/<ENV>/app
Phases:
  DEV:
    - xldeploy:
        Deploy: [App]
  PRODUCTION:
    - xldeploy:
        Deploy: [App]
    - email_close_release: [ops@example.org]
"#;

    #[test]
    fn template_comes_first_and_phases_chain() {
        let cfg = parse_yaml(DESCRIPTOR).unwrap();
        let plan = compile(&cfg).unwrap();

        assert_eq!(plan.operations[0].kind, OperationKind::CreateTemplate);
        assert_eq!(plan.operations[1].kind, OperationKind::DeletePhaseDefault);
        assert!(!plan.operations[1].required);

        let dev = plan.phase_index[&PhaseKey::Release(PhaseName::Dev)];
        let change = plan.phase_index[&PhaseKey::ChangeRecord(PhaseName::Production)];
        let prod = plan.phase_index[&PhaseKey::Release(PhaseName::Production)];
        assert!(plan.get(change).unwrap().depends_on.contains(&dev));
        assert!(plan.get(prod).unwrap().depends_on.contains(&change));
    }

    #[test]
    fn production_without_packages_is_contradiction() {
        let doc = "general_info:\n  name_release: R\n  iua: A1\n  xlr_folder: F\n  phases: [PRODUCTION]\n";
        let cfg = parse_yaml(doc).unwrap();
        let err = compile(&cfg).unwrap_err();
        assert_eq!(err.code.as_str(), "compile.contradiction");
        assert_eq!(err.details["rule"], "phase_classification");
    }

    #[test]
    fn compiling_twice_gives_identical_plans() {
        let cfg = parse_yaml(DESCRIPTOR).unwrap();
        let first = compile(&cfg).unwrap();
        let second = compile(&cfg).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.fingerprint().unwrap(), second.fingerprint().unwrap());
    }

    #[test]
    fn variables_depend_on_template_only() {
        let cfg = parse_yaml(DESCRIPTOR).unwrap();
        let plan = compile(&cfg).unwrap();
        for op in plan
            .operations
            .iter()
            .filter(|op| op.kind == OperationKind::CreateVariable && op.target_phase.is_none())
        {
            assert_eq!(op.depends_on.iter().copied().collect::<Vec<_>>(), vec![OperationId(0)]);
        }
    }
}
