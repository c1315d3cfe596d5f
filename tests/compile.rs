mod common;

use common::descriptor;
use release_forge::compiler::scripts::{self, PhasePruning};
use release_forge::compiler::variables::{BENCH_CHANGE_ID_KEY, CHANGE_TITLE_KEY, DELIVERABLES_KEY};
use release_forge::compiler::START_GATE_TITLE;
use release_forge::config::PhaseName;
use release_forge::executor::compute_layers;
use release_forge::plan::{OperationKind, Payload, PhaseKey, VariableKind};
use release_forge::{compile, dry_run};

fn release(phases: &str, mode: &str, packages: &[&str], body: &str) -> String {
    let mut doc = format!(
        "general_info:\n  name_release: Billing\n  iua: A7K12\n  xlr_folder: Applications/Billing\n  phases: {}\n  template_package_mode: {}\n",
        phases, mode
    );
    if !packages.is_empty() {
        doc.push_str("template_liste_package:\n");
        for p in packages {
            doc.push_str(&format!(
                "  {p}:\n    package_build_name: {p}-${{version}}\n    XLD_application_path: Applications/APP/{p}\n    XLD_environment_path: Environments/<ENV>/{p}\n"
            ));
        }
    }
    doc.push_str(body);
    doc
}

#[test]
fn listbox_single_package_in_dev_needs_no_version_variable() {
    let plan = compile(&descriptor(&release("[DEV]", "listbox", &["App"], ""))).unwrap();
    assert!(plan.variable("App_version").is_none());

    let plan = compile(&descriptor(&release("[UAT]", "listbox", &["App"], ""))).unwrap();
    assert!(plan.variable("App_version").is_some());
}

#[test]
fn production_alone_requires_bench_change_id() {
    let plan = compile(&descriptor(&release("[PRODUCTION]", "string", &["App"], ""))).unwrap();
    let bench = plan.variable(BENCH_CHANGE_ID_KEY).unwrap();
    assert!(bench.requires_value);
    assert!(plan.variable(CHANGE_TITLE_KEY).unwrap().requires_value);
}

#[test]
fn change_variables_are_optional_alongside_dev() {
    let plan = compile(&descriptor(&release(
        "[DEV, PRODUCTION]",
        "string",
        &["App"],
        "",
    )))
    .unwrap();
    assert!(!plan.variable(CHANGE_TITLE_KEY).unwrap().requires_value);
}

#[test]
fn second_package_makes_the_dynamic_phase_necessary() {
    let plan = compile(&descriptor(&release("[DEV]", "string", &["App"], ""))).unwrap();
    assert_eq!(plan.operations_in(PhaseKey::Dynamic).count(), 0);
    assert!(!plan.phase_index.contains_key(&PhaseKey::Dynamic));

    let plan = compile(&descriptor(&release("[DEV]", "string", &["App", "Batch"], ""))).unwrap();
    let dynamic = plan.phase_index[&PhaseKey::Dynamic];
    assert_eq!(plan.get(dynamic).unwrap().depends_on.len(), 1);
    assert!(plan.operations_in(PhaseKey::Dynamic).count() > 1);
}

#[test]
fn dev_and_production_with_one_package() {
    let doc = release(
        "[DEV, PRODUCTION]",
        "string",
        &["App"],
        "Phases:\n  DEV:\n    - xldeploy:\n        Deploy: [App]\n  PRODUCTION:\n    - xldeploy:\n        Deploy: [App]\n",
    );
    let plan = compile(&descriptor(&doc)).unwrap();

    assert_eq!(plan.operations[0].kind, OperationKind::CreateTemplate);
    let dev = plan.phase_index[&PhaseKey::Release(PhaseName::Dev)];
    let prod_change = plan.phase_index[&PhaseKey::ChangeRecord(PhaseName::Production)];
    let prod = plan.phase_index[&PhaseKey::Release(PhaseName::Production)];
    let dynamic = plan.phase_index[&PhaseKey::Dynamic];
    assert!(dev < prod_change && prod_change < prod && prod < dynamic);

    let titles = plan.titles_in(PhaseKey::Release(PhaseName::Dev));
    assert_eq!(titles.len(), 4);
    assert_eq!(titles[0], START_GATE_TITLE);
    assert_eq!(titles[1], "Deployment inputs DEV");
    assert!(titles[2].starts_with("Deploy App"));
    assert_eq!(titles[3], "DEV team: Validate installation in DEV");

    assert!(plan.variable(DELIVERABLES_KEY).unwrap().requires_value);
    assert!(plan.variable("App_version").is_none());
    assert!(!plan.variable(CHANGE_TITLE_KEY).unwrap().requires_value);

    assert_eq!(plan.titles_in(PhaseKey::Dynamic), vec!["Prune phases"]);
    let pruning = plan
        .operations_in(PhaseKey::Dynamic)
        .find_map(|op| match &op.payload {
            Payload::Script { body, .. } => Some(body.as_str()),
            _ => None,
        })
        .unwrap();
    assert_eq!(
        pruning,
        scripts::phase_pruning(
            PhasePruning::MultiList,
            &[PhaseName::Dev, PhaseName::Production]
        )
    );
    assert_eq!(plan.variable("DEV").unwrap().kind, VariableKind::Boolean);
    assert_eq!(plan.variable("PRODUCTION").unwrap().kind, VariableKind::Boolean);
}

#[test]
fn production_change_flow_runs_in_order() {
    let doc = release(
        "[BENCH, PRODUCTION]",
        "string",
        &["App"],
        "Phases:\n  PRODUCTION:\n    - email_end_release: [team@example.org]\n    - xldeploy:\n        Deploy: [App]\n    - email_close_release: [ops@example.org]\n",
    )
    .replace(
        "  xlr_folder: Applications/Billing\n",
        "  xlr_folder: Applications/Billing\n  Template_standard_id: STD-42\n",
    );
    let plan = compile(&descriptor(&doc)).unwrap();

    assert_eq!(
        plan.titles_in(PhaseKey::ChangeRecord(PhaseName::Bench)),
        vec![
            "Create change BENCH",
            "Validation creation SNOW ${BENCH.sun.id}",
            "Change BENCH Initial validation",
            "Wait approval BENCH",
        ]
    );
    assert_eq!(
        plan.titles_in(PhaseKey::ChangeRecord(PhaseName::Production)),
        vec![
            "Create change PRODUCTION",
            "Validation creation SNOW ${PRODUCTION.sun.id}",
            "Change PRODUCTION Scheduled",
        ]
    );

    let bench = plan.titles_in(PhaseKey::Release(PhaseName::Bench));
    let at = |titles: &[&str], title: &str| titles.iter().position(|t| *t == title).unwrap();
    assert!(at(&bench, "Change BENCH Scheduled") < at(&bench, "Change BENCH Implement"));
    assert!(!bench.contains(&"DEV team: Validate installation in BENCH"));
    assert_eq!(bench.last(), Some(&"Change BENCH Closed"));

    let prod = plan.titles_in(PhaseKey::Release(PhaseName::Production));
    assert!(!prod.contains(&"Change PRODUCTION Scheduled"));
    let close = at(&prod, "Notify close PRODUCTION");
    let gate = at(&prod, "DEV team: Validate installation in PRODUCTION");
    let end = at(&prod, "Notify end PRODUCTION");
    let closed = at(&prod, "Change PRODUCTION Closed");
    assert!(at(&prod, "Change PRODUCTION Implement") < close);
    assert!(close < gate && gate < end && end < closed);
    assert_eq!(closed, prod.len() - 1);
}

#[test]
fn every_non_template_operation_has_a_dependency() {
    let plan = compile(&descriptor(&release(
        "[BUILD, DEV, UAT, BENCH, PRODUCTION]",
        "listbox",
        &["App", "Batch"],
        "",
    )))
    .unwrap();

    for op in &plan.operations[1..] {
        assert!(!op.depends_on.is_empty(), "{} has no dependency", op.label());
        assert!(op.depends_on.iter().all(|dep| dep.0 < op.id.0));
    }
    assert_eq!(plan.count_kind(OperationKind::CreateTemplate), 1);
}

#[test]
fn production_gets_change_record_phase_before_it() {
    let plan = compile(&descriptor(&release(
        "[BENCH, PRODUCTION]",
        "string",
        &["App"],
        "",
    )))
    .unwrap();
    let layers = compute_layers(&plan).unwrap();
    let layer_of = |key: PhaseKey| {
        let id = plan.phase_index[&key];
        layers.iter().position(|layer| layer.contains(&id)).unwrap()
    };
    let bench = layer_of(PhaseKey::Release(PhaseName::Bench));
    let bench_change = layer_of(PhaseKey::ChangeRecord(PhaseName::Bench));
    let prod_change = layer_of(PhaseKey::ChangeRecord(PhaseName::Production));
    let prod = layer_of(PhaseKey::Release(PhaseName::Production));
    assert!(bench_change < bench);
    assert!(bench < prod_change);
    assert!(prod_change < prod);
}

#[test]
fn compilation_is_idempotent() {
    let doc = release(
        "[DEV, UAT, PRODUCTION]",
        "listbox",
        &["App", "Batch", "Front"],
        "Phases:\n  DEV:\n    - xldeploy:\n        Deploy: [App, Batch]\n",
    );
    let cfg = descriptor(&doc);
    let first = dry_run(&compile(&cfg).unwrap()).unwrap();
    let second = dry_run(&compile(&cfg).unwrap()).unwrap();
    assert_eq!(first.fingerprint, second.fingerprint);
    assert_eq!(first.layers, second.layers);
    assert_eq!(first.operation_count, second.operation_count);
}

#[test]
fn descriptor_file_round_trips_through_the_loader() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("release.yaml");
    std::fs::write(
        &path,
        release(
            "[DEV]",
            "string",
            &["App"],
            "Phases:\n  DEV:\n    - xldeploy:\n        Deploy: [App]\n",
        ),
    )
    .unwrap();

    let cfg = release_forge::config::load_validated(&path).unwrap();
    let plan = compile(&cfg).unwrap();
    let titles = plan.titles_in(PhaseKey::Release(PhaseName::Dev));
    assert_eq!(titles.first(), Some(&START_GATE_TITLE));
    assert_eq!(plan.template_name(), Some("Billing"));
}

#[test]
fn missing_descriptor_is_a_load_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = release_forge::config::load_validated(&dir.path().join("absent.yaml")).unwrap_err();
    assert_eq!(err.code.as_str(), "config.not_found");
}

#[test]
fn tool_deploy_technical_tasks_wrap_the_deploy_block_once() {
    let doc = release(
        "[PRODUCTION]",
        "string",
        &["App", "Batch"],
        "technical_task_list:\n  before_xldeploy: [task_ops]\n  after_xldeploy: [task_ops]\nPhases:\n  PRODUCTION:\n    - xldeploy:\n        Front: [App]\n    - controlm: [NIGHTLY]\n    - xldeploy:\n        Back: [Batch]\n",
    );
    let plan = compile(&descriptor(&doc)).unwrap();
    let titles = plan.titles_in(PhaseKey::Release(PhaseName::Production));
    let position = |prefix: &str| {
        let matches: Vec<usize> = titles
            .iter()
            .enumerate()
            .filter(|(_, t)| t.starts_with(prefix))
            .map(|(i, _)| i)
            .collect();
        assert_eq!(matches.len(), 1, "{} emitted {} times", prefix, matches.len());
        matches[0]
    };

    let before = position("task_ops before_xldeploy");
    let after = position("task_ops after_xldeploy");
    assert_eq!(position("Deploy App"), before + 1);
    assert_eq!(position("Deploy Batch") + 1, after);
    assert!(position("ControlM order NIGHTLY") < position("Deploy Batch"));
}
