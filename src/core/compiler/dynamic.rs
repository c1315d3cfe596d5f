//! The cleanup phase that prunes unused phases, packages and integration
//! tasks when a release starts.
//!
//! Each block is guarded on its own and appended in a fixed order, so
//! leaving one out never changes whether a later one is emitted.

use serde_json::{json, Map, Value};

use super::phases::PhaseBuilder;
use super::scripts::{self, PhasePruning};
use super::variables::string_variable;
use super::variant::VariantTable;
use crate::config::{
    PackageMode, PhaseName, PhaseSelectionMode, ReleaseConfig, ResolutionMode, TaskSpec,
    TechnicalCategory, TemplateKind, VariableSeed,
};
use crate::error::Result;
use crate::plan::{OperationId, OperationKind, Payload, PhaseKey, PlanBuilder, VariableKind, VariableSpec};

pub const BENCH_PREFIX_KEY: &str = "controlm_prefix_BENCH";
pub const TECHNICAL_TASKS_KEY: &str = "technical_tasks";
pub const TECHNICAL_SELECTION_KEY: &str = "technical_task_selection";
pub const BRANCH_NAME_KEY: &str = "branch_name";

/// The dynamic phase is only worth creating when there is something to prune.
pub fn is_required(cfg: &ReleaseConfig) -> bool {
    cfg.technical_tasks.populated_categories() > 1
        || cfg.phases.len() > 1
        || cfg.packages.len() > 1
}

fn package_names(cfg: &ReleaseConfig) -> Vec<&str> {
    cfg.packages.keys().map(String::as_str).collect()
}

fn phases_where(cfg: &ReleaseConfig, keep: impl Fn(PhaseName) -> bool) -> Vec<PhaseName> {
    cfg.phases.iter().copied().filter(|p| keep(*p)).collect()
}

fn has_deploys(cfg: &ReleaseConfig, phase: PhaseName) -> bool {
    cfg.tasks_for(phase).iter().any(TaskSpec::is_tool_deploy)
}

fn has_controlm(cfg: &ReleaseConfig, phase: PhaseName) -> bool {
    cfg.tasks_for(phase)
        .iter()
        .any(|task| matches!(task, TaskSpec::ControlM { .. }))
}

fn pruning_variant(cfg: &ReleaseConfig) -> PhasePruning {
    match (cfg.phase_selection_mode, cfg.package_mode) {
        (PhaseSelectionMode::OneList, PackageMode::String) => PhasePruning::OneListString,
        (PhaseSelectionMode::OneList, PackageMode::Listbox) => PhasePruning::OneListOther,
        (PhaseSelectionMode::MultiList, _) => PhasePruning::MultiList,
    }
}

fn variable(pb: &mut PhaseBuilder<'_>, template: OperationId, spec: VariableSpec) {
    pb.attach(OperationKind::CreateVariable, Payload::Variable(spec), template);
}

fn list_box(key: &str, label: &str, choices: &[&str]) -> VariableSpec {
    VariableSpec {
        kind: VariableKind::ListBox,
        requires_value: true,
        show_on_start: true,
        possible_values: choices.iter().map(|c| c.to_string()).collect(),
        ..string_variable(key, label, json!(choices.first().copied().unwrap_or_default()))
    }
}

fn technical_task_map(cfg: &ReleaseConfig) -> Value {
    let map: Map<String, Value> = TechnicalCategory::ALL
        .iter()
        .filter_map(|category| {
            let kinds = cfg.technical_tasks.get(*category);
            if kinds.is_empty() {
                return None;
            }
            let joined = kinds.iter().map(|k| k.as_str()).collect::<Vec<_>>().join(",");
            Some((category.as_str().to_string(), json!(joined)))
        })
        .collect();
    Value::Object(map)
}

/// Emits the dynamic phase when it is needed. Returns its phase operation.
pub(crate) fn emit(
    plan: &mut PlanBuilder,
    cfg: &ReleaseConfig,
    variants: &VariantTable,
    template: OperationId,
) -> Result<Option<OperationId>> {
    if !is_required(cfg) {
        return Ok(None);
    }

    let mut pb = PhaseBuilder::open(plan, PhaseKey::Dynamic, Some(0), [template])?;
    let packages = package_names(cfg);

    let resolved: Vec<&str> = cfg
        .packages
        .iter()
        .filter(|(_, spec)| spec.resolution_mode == ResolutionMode::NameFromBuildSystem)
        .map(|(name, _)| name.as_str())
        .collect();
    if !resolved.is_empty() {
        pb.script("Resolve deployment ids", scripts::id_resolution(&resolved), true);
    }

    if cfg.phases.len() > 1 {
        if cfg.phase_selection_mode == PhaseSelectionMode::MultiList {
            for phase in &cfg.phases {
                variable(
                    &mut pb,
                    template,
                    VariableSpec {
                        kind: VariableKind::Boolean,
                        show_on_start: true,
                        ..string_variable(phase.as_str(), format!("Run {}", phase), json!(true))
                    },
                );
            }
        }
        pb.script(
            "Prune phases",
            scripts::phase_pruning(pruning_variant(cfg), &cfg.phases),
            true,
        );
    }

    if cfg.package_mode == PackageMode::String && packages.len() > 1 {
        pb.script("Materialize package list", scripts::package_list(&packages), true);
    }

    if cfg.has_phase(PhaseName::Bench) && cfg.multi_bench_environments.len() >= 2 {
        variable(
            &mut pb,
            template,
            string_variable(BENCH_PREFIX_KEY, "ControlM prefix for BENCH", json!("B")),
        );
        pb.script(
            "Resolve BENCH prefix",
            scripts::env_prefix(&cfg.multi_bench_environments),
            true,
        );
    }

    if cfg.jenkins.is_some()
        && packages.len() > 1
        && cfg.has_any_phase(&[PhaseName::Dev, PhaseName::Build])
    {
        let build_phases = phases_where(cfg, |p| matches!(p, PhaseName::Build | PhaseName::Dev));
        pb.script(
            "Prune Jenkins builds",
            scripts::jenkins_pruning(cfg.package_mode, &build_phases, &packages),
            true,
        );
    }

    if cfg.declares_controlm() {
        let multi_bench = cfg.multi_bench_environments.len() >= 3;
        let controlm_phases = phases_where(cfg, |p| has_controlm(cfg, p));
        pb.script(
            "Prune ControlM tasks",
            scripts::controlm_pruning(multi_bench, &controlm_phases),
            true,
        );
    }

    if packages.len() > 1 {
        let deploy_phases = phases_where(cfg, |p| has_deploys(cfg, p));
        let variant = variants
            .detect(&cfg.application_id)
            .filter(|_| cfg.has_phase(PhaseName::Bench));
        match variant {
            Some(rule) => {
                let key = rule.environment_key();
                variable(
                    &mut pb,
                    template,
                    string_variable(key.clone(), format!("{} bench environment", rule.name), json!("")),
                );
                let body = rule.script.clone().unwrap_or_else(|| {
                    scripts::deploy_pruning_variant(&key, &deploy_phases, &packages)
                });
                pb.script("Prune deploy tasks", body, true);
            }
            None => {
                pb.script(
                    "Prune deploy tasks",
                    scripts::deploy_pruning(&deploy_phases, &packages),
                    true,
                );
            }
        }
    }

    if !cfg.technical_tasks.is_empty() {
        variable(
            &mut pb,
            template,
            VariableSpec {
                kind: VariableKind::MapStringString,
                ..string_variable(TECHNICAL_TASKS_KEY, "Technical tasks", technical_task_map(cfg))
            },
        );
        if cfg.has_production_class() {
            let populated: Vec<&str> = TechnicalCategory::ALL
                .iter()
                .filter(|c| !cfg.technical_tasks.get(**c).is_empty())
                .map(|c| c.as_str())
                .collect();
            match cfg.technical_task_mode {
                PackageMode::String => variable(
                    &mut pb,
                    template,
                    VariableSpec {
                        show_on_start: true,
                        ..string_variable(
                            TECHNICAL_SELECTION_KEY,
                            "Technical tasks to keep (comma separated)",
                            json!(populated.join(",")),
                        )
                    },
                ),
                PackageMode::Listbox => {
                    for category in &populated {
                        variable(
                            &mut pb,
                            template,
                            list_box(
                                &format!("technical_{}", category),
                                &format!("Run {} technical tasks", category),
                                &["YES", "NO"],
                            ),
                        );
                    }
                }
            }
            let production_phases = phases_where(cfg, |p| p.is_production_class());
            pb.script(
                "Prune technical tasks",
                scripts::technical_pruning(cfg.technical_task_mode, &production_phases),
                true,
            );
        }
    }

    if cfg.template_kind == TemplateKind::FromBranchName {
        variable(
            &mut pb,
            template,
            VariableSpec {
                show_on_start: true,
                ..string_variable(BRANCH_NAME_KEY, "Source branch", json!(""))
            },
        );
        pb.script("Rename release from branch", scripts::branch_name(&cfg.name), true);
    }

    if cfg.release_variables.values().any(|seed| *seed == VariableSeed::Date) {
        let keys: Vec<&str> = cfg
            .release_variables
            .iter()
            .filter(|(_, seed)| **seed != VariableSeed::Date)
            .map(|(key, _)| key.as_str())
            .collect();
        pb.script("Define release variables", scripts::release_variables(&keys), true);
    }

    Ok(Some(pb.phase_op()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::loader::parse_yaml;
    use crate::plan::Plan;

    const BASE: &str = "general_info:\n  name_release: R\n  iua: A1\n  xlr_folder: F\n";

    fn package(name: &str, mode: &str) -> String {
        format!(
            "  {}:\n    package_build_name: {}-x\n    XLD_application_path: Applications/APP/{}\n    XLD_environment_path: Env/<ENV>\n    mode: {}\n",
            name, name, name, mode
        )
    }

    fn build(doc: &str, variants: &VariantTable) -> Plan {
        let cfg = parse_yaml(doc).unwrap();
        let mut plan = PlanBuilder::new();
        let template = plan.push(
            OperationKind::CreateTemplate,
            None,
            Payload::Template {
                folder_path: "F".into(),
                name: "R".into(),
            },
            [],
            true,
        );
        emit(&mut plan, &cfg, variants, template).unwrap();
        plan.finish()
    }

    #[test]
    fn single_phase_single_package_needs_no_dynamic_phase() {
        let doc = format!(
            "{}  phases: [DEV]\ntemplate_liste_package:\n{}",
            BASE,
            package("A", "CHECK_XLD")
        );
        let plan = build(&doc, &VariantTable::builtin());
        assert_eq!(plan.operations_in(PhaseKey::Dynamic).count(), 0);
        assert!(!plan.phase_index.contains_key(&PhaseKey::Dynamic));
    }

    #[test]
    fn dynamic_phase_is_moved_first_and_scripts_chain() {
        let doc = format!(
            "{}  phases: [DEV, UAT]\n  phase_mode: one_list\ntemplate_liste_package:\n{}{}",
            BASE,
            package("A", "name_from_jenkins"),
            package("B", "CHECK_XLD")
        );
        let plan = build(&doc, &VariantTable::builtin());
        let phase = plan.get(plan.phase_index[&PhaseKey::Dynamic]).unwrap();
        assert!(matches!(phase.payload, Payload::Phase { position: Some(0), .. }));

        assert_eq!(
            plan.titles_in(PhaseKey::Dynamic),
            vec![
                "Resolve deployment ids",
                "Prune phases",
                "Materialize package list",
                "Prune deploy tasks",
            ]
        );
    }

    #[test]
    fn variant_rule_adds_bench_variable() {
        let doc = format!(
            "{}  phases: [BENCH]\ntemplate_liste_package:\n{}{}",
            BASE.replace("A1", "Y88-core"),
            package("A", "CHECK_XLD"),
            package("B", "CHECK_XLD")
        );
        let plan = build(&doc, &VariantTable::builtin());
        assert!(plan.variable("BENCH_Y88").is_some());

        let plan = build(&doc, &VariantTable::empty());
        assert!(plan.variable("BENCH_Y88").is_none());
        assert!(plan.titles_in(PhaseKey::Dynamic).contains(&"Prune deploy tasks"));
    }

    #[test]
    fn technical_pruning_needs_production_class_phase() {
        let doc = format!(
            "{}  phases: [DEV, UAT]\ntechnical_task_list:\n  before_deployment: [task_ops]\n",
            BASE
        );
        let plan = build(&doc, &VariantTable::builtin());
        assert!(plan.variable(TECHNICAL_TASKS_KEY).is_some());
        assert!(!plan
            .titles_in(PhaseKey::Dynamic)
            .contains(&"Prune technical tasks"));
    }

    fn script_body<'a>(plan: &'a Plan, title: &str) -> &'a str {
        plan.operations_in(PhaseKey::Dynamic)
            .find_map(|op| match &op.payload {
                Payload::Script { title: t, body } if t == title => Some(body.as_str()),
                _ => None,
            })
            .unwrap_or_else(|| panic!("no script titled {}", title))
    }

    const JENKINS: &str =
        "jenkins:\n  jenkinsServer: J\n  username: u\n  jenkinsjob:\n    A:\n      jobName: build-a\n";

    #[test]
    fn bench_prefix_needs_two_bench_environments() {
        let doc = format!(
            "{}  phases: [DEV, BENCH]\ntemplate_liste_package:\n{}",
            BASE,
            package("A", "CHECK_XLD")
        );
        let two = format!("{}XLD_ENV_BENCH: [BENCH1, BENCH2;C]\n", doc);
        let plan = build(&two, &VariantTable::builtin());
        assert_eq!(plan.variable(BENCH_PREFIX_KEY).unwrap().value, json!("B"));
        assert_eq!(
            script_body(&plan, "Resolve BENCH prefix"),
            scripts::env_prefix(&["BENCH1".to_string(), "BENCH2;C".to_string()])
        );

        let one = format!("{}XLD_ENV_BENCH: [BENCH1]\n", doc);
        let plan = build(&one, &VariantTable::builtin());
        assert!(plan.variable(BENCH_PREFIX_KEY).is_none());
        assert!(!plan.titles_in(PhaseKey::Dynamic).contains(&"Resolve BENCH prefix"));
    }

    #[test]
    fn jenkins_pruning_follows_package_mode() {
        let packages = format!("{}{}", package("A", "CHECK_XLD"), package("B", "CHECK_XLD"));
        let string = format!(
            "{}  phases: [DEV]\ntemplate_liste_package:\n{}{}",
            BASE, packages, JENKINS
        );
        let plan = build(&string, &VariantTable::builtin());
        assert_eq!(
            script_body(&plan, "Prune Jenkins builds"),
            scripts::jenkins_pruning(PackageMode::String, &[PhaseName::Dev], &["A", "B"])
        );

        let listbox = format!(
            "{}  phases: [DEV]\n  template_package_mode: listbox\ntemplate_liste_package:\n{}{}",
            BASE, packages, JENKINS
        );
        let plan = build(&listbox, &VariantTable::builtin());
        assert_eq!(
            script_body(&plan, "Prune Jenkins builds"),
            scripts::jenkins_pruning(PackageMode::Listbox, &[PhaseName::Dev], &["A", "B"])
        );
    }

    #[test]
    fn jenkins_pruning_needs_a_build_phase() {
        let doc = format!(
            "{}  phases: [UAT, BENCH]\ntemplate_liste_package:\n{}{}{}",
            BASE,
            package("A", "CHECK_XLD"),
            package("B", "CHECK_XLD"),
            JENKINS
        );
        let plan = build(&doc, &VariantTable::builtin());
        assert!(!plan.titles_in(PhaseKey::Dynamic).contains(&"Prune Jenkins builds"));
    }

    #[test]
    fn controlm_pruning_switches_at_three_bench_environments() {
        let doc = format!(
            "{}  phases: [DEV, BENCH]\ntemplate_liste_package:\n{}Phases:\n  DEV:\n    - controlm: [NIGHTLY]\n",
            BASE,
            package("A", "CHECK_XLD")
        );

        let two = format!("{}XLD_ENV_BENCH: [B1, B2]\n", doc);
        let plan = build(&two, &VariantTable::builtin());
        assert_eq!(
            script_body(&plan, "Prune ControlM tasks"),
            scripts::controlm_pruning(false, &[PhaseName::Dev])
        );

        let three = format!("{}XLD_ENV_BENCH: [B1, B2, B3]\n", doc);
        let plan = build(&three, &VariantTable::builtin());
        assert_eq!(
            script_body(&plan, "Prune ControlM tasks"),
            scripts::controlm_pruning(true, &[PhaseName::Dev])
        );
    }

    #[test]
    fn controlm_pruning_needs_a_controlm_task() {
        let doc = format!(
            "{}  phases: [DEV, BENCH]\ntemplate_liste_package:\n{}XLD_ENV_BENCH: [B1, B2, B3]\n",
            BASE,
            package("A", "CHECK_XLD")
        );
        let plan = build(&doc, &VariantTable::builtin());
        assert!(!plan.titles_in(PhaseKey::Dynamic).contains(&"Prune ControlM tasks"));
    }

    #[test]
    fn technical_selection_is_a_string_by_default() {
        let doc = format!(
            "{}  phases: [UAT, PRODUCTION]\ntemplate_liste_package:\n{}technical_task_list:\n  before_deployment: [task_ops]\n  after_deployment: [task_dba_other]\n",
            BASE,
            package("A", "CHECK_XLD")
        );
        let plan = build(&doc, &VariantTable::builtin());

        let selection = plan.variable(TECHNICAL_SELECTION_KEY).unwrap();
        assert_eq!(selection.value, json!("before_deployment,after_deployment"));
        assert!(selection.show_on_start);
        assert!(plan.variable("technical_before_deployment").is_none());
        assert_eq!(
            plan.variable(TECHNICAL_TASKS_KEY).unwrap().value,
            json!({"before_deployment": "task_ops", "after_deployment": "task_dba_other"})
        );
        assert_eq!(
            script_body(&plan, "Prune technical tasks"),
            scripts::technical_pruning(PackageMode::String, &[PhaseName::Production])
        );
    }

    #[test]
    fn technical_selection_in_listbox_mode_asks_per_category() {
        let doc = format!(
            "{}  phases: [UAT, PRODUCTION]\n  technical_task_mode: listbox\ntemplate_liste_package:\n{}technical_task_list:\n  before_deployment: [task_ops]\n  after_deployment: [task_dba_other]\n",
            BASE,
            package("A", "CHECK_XLD")
        );
        let plan = build(&doc, &VariantTable::builtin());

        assert!(plan.variable(TECHNICAL_SELECTION_KEY).is_none());
        for category in ["before_deployment", "after_deployment"] {
            let choice = plan.variable(&format!("technical_{}", category)).unwrap();
            assert_eq!(choice.kind, VariableKind::ListBox);
            assert_eq!(choice.possible_values, vec!["YES", "NO"]);
        }
        assert!(plan.variable("technical_before_xldeploy").is_none());
        assert_eq!(
            script_body(&plan, "Prune technical tasks"),
            scripts::technical_pruning(PackageMode::Listbox, &[PhaseName::Production])
        );
    }

    #[test]
    fn branch_templates_rename_the_release() {
        let doc = format!(
            "{}  type_template: FROM_NAME_BRANCH\n  phases: [DEV, UAT]\ntemplate_liste_package:\n{}",
            BASE,
            package("A", "CHECK_XLD")
        );
        let plan = build(&doc, &VariantTable::builtin());
        let branch = plan.variable(BRANCH_NAME_KEY).unwrap();
        assert!(branch.show_on_start);
        assert_eq!(
            plan.titles_in(PhaseKey::Dynamic).last(),
            Some(&"Rename release from branch")
        );
        assert_eq!(
            script_body(&plan, "Rename release from branch"),
            scripts::branch_name("R")
        );

        let plain = doc.replace("FROM_NAME_BRANCH", "DYNAMIC");
        let plan = build(&plain, &VariantTable::builtin());
        assert!(plan.variable(BRANCH_NAME_KEY).is_none());
    }

    #[test]
    fn date_seed_defines_release_variables_at_start() {
        let doc = format!(
            "{}  phases: [DEV, UAT]\ntemplate_liste_package:\n{}variable_release:\n  Date:\n  ticket: REL-1\n",
            BASE,
            package("A", "CHECK_XLD")
        );
        let plan = build(&doc, &VariantTable::builtin());
        assert_eq!(
            script_body(&plan, "Define release variables"),
            scripts::release_variables(&["ticket"])
        );

        let undated = doc.replace("  Date:\n", "");
        let plan = build(&undated, &VariantTable::builtin());
        assert!(!plan
            .titles_in(PhaseKey::Dynamic)
            .contains(&"Define release variables"));
    }
}
