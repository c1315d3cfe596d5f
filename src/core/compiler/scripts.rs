//! Jython bodies for the script tasks the compiler emits.
//!
//! Bodies run inside the orchestrator at release start. Placeholders use
//! `{{name}}` and are filled by [`render`]; `${...}` is left for the
//! orchestrator's own variable interpolation.

use crate::config::{PackageMode, PhaseName};

pub const STATE_VARIABLE: &str = "release_variables_in_progress";

const HELPERS: &str = r#"def delete_phase(title):
    found = phaseApi.searchPhasesByTitle(title, '${release.id}')
    for phase_id in found:
        phaseApi.deletePhase(str(phase_id))
def delete_tasks(phase, title):
    for task_id in taskApi.searchTasksByTitle(title, phase, '${release.id}'):
        taskApi.deleteTask(str(task_id))
"#;

const ID_RESOLUTION: &str = r#"# resolve deployment ids from build names
for package in [{{packages}}]:
    build_name = releaseVariables.get(package + '_version', '')
    if build_name:
        releaseVariables[package + '_deploy_id'] = build_name.split('/')[-1]
"#;

const PHASE_PRUNING_ONE_LIST_STRING: &str = r#"selected = releaseVariables['phase_choice']
for phase in [{{phases}}]:
    if phase != selected:
        delete_phase(phase)
        delete_phase('CREATE_CHANGE_' + phase)
if releaseVariables['release_deliverables'] == '':
    delete_phase(selected)
"#;

const PHASE_PRUNING_ONE_LIST: &str = r#"selected = releaseVariables['phase_choice']
for phase in [{{phases}}]:
    if phase != selected:
        delete_phase(phase)
        delete_phase('CREATE_CHANGE_' + phase)
"#;

const PHASE_PRUNING_MULTI_LIST: &str = r#"for phase in [{{phases}}]:
    if not releaseVariables.get(phase, False):
        delete_phase(phase)
        delete_phase('CREATE_CHANGE_' + phase)
"#;

const PACKAGE_LIST: &str = r#"chosen = [p.strip() for p in releaseVariables['release_deliverables'].split(',') if p.strip()]
state = releaseVariables['{{state}}']
state['list_package'] = ','.join([p for p in [{{packages}}] if p in chosen])
releaseVariables['{{state}}'] = state
"#;

const ENV_PREFIX: &str = r#"# bench entries are '<ENV>;<PREFIX>', prefix defaults to B
releaseVariables['controlm_prefix_BENCH'] = 'B'
for entry in [{{environments}}]:
    if releaseVariables['env_BENCH'] == entry.split(';')[0] and ';' in entry:
        releaseVariables['controlm_prefix_BENCH'] = entry.split(';')[1]
"#;

const JENKINS_PRUNING_STRING: &str = r#"chosen = releaseVariables['{{state}}']['list_package'].split(',')
for phase in [{{phases}}]:
    for package in [{{packages}}]:
        if package not in chosen:
            delete_tasks(phase, 'Jenkins build ' + package)
"#;

const JENKINS_PRUNING_LISTBOX: &str = r#"for phase in [{{phases}}]:
    for package in [{{packages}}]:
        if releaseVariables.get(package + '_version', '') in ('', 'NO DEPLOY'):
            delete_tasks(phase, 'Jenkins build ' + package)
"#;

const CONTROLM_PRUNING_SINGLE: &str = r#"for phase in [{{phases}}]:
    if not releaseVariables.get('controlm_' + phase, True):
        delete_tasks(phase, 'ControlM order')
"#;

const CONTROLM_PRUNING_MULTI_BENCH: &str = r#"prefix = releaseVariables['controlm_prefix_BENCH']
for phase in [{{phases}}]:
    if not releaseVariables.get('controlm_' + phase, True):
        delete_tasks(phase, 'ControlM order')
for task_id in taskApi.searchTasksByTitle('ControlM order', 'BENCH', '${release.id}'):
    task = taskApi.getTask(str(task_id))
    if not task.title.endswith('[' + prefix + ']'):
        taskApi.deleteTask(str(task_id))
"#;

const DEPLOY_PRUNING: &str = r#"for phase in [{{phases}}]:
    for package in [{{packages}}]:
        if releaseVariables.get(package + '_version', '') in ('', 'NO DEPLOY'):
            delete_tasks(phase, 'Deploy ' + package)
            delete_tasks(phase, 'Undeploy ' + package)
"#;

const DEPLOY_PRUNING_VARIANT: &str = r#"releaseVariables['{{variant_key}}'] = releaseVariables['env_BENCH'].split('_')[0]
for phase in [{{phases}}]:
    for package in [{{packages}}]:
        if releaseVariables.get(package + '_version', '') in ('', 'NO DEPLOY'):
            delete_tasks(phase, 'Deploy ' + package)
            delete_tasks(phase, 'Undeploy ' + package)
"#;

const TECHNICAL_PRUNING_STRING: &str = r#"wanted = releaseVariables['technical_task_selection'].split(',')
for category, kinds in releaseVariables['technical_tasks'].items():
    if category not in wanted:
        for phase in [{{phases}}]:
            for kind in kinds.split(','):
                delete_tasks(phase, kind + ' ' + category)
"#;

const TECHNICAL_PRUNING_LISTBOX: &str = r#"for category, kinds in releaseVariables['technical_tasks'].items():
    if releaseVariables.get('technical_' + category, 'NO') == 'NO':
        for phase in [{{phases}}]:
            for kind in kinds.split(','):
                delete_tasks(phase, kind + ' ' + category)
"#;

const BRANCH_NAME: &str = r#"branch = releaseVariables.get('branch_name', '')
if branch:
    release = getCurrentRelease()
    release.title = '{{name}} ' + branch.split('/')[-1]
    releaseApi.updateRelease(release)
"#;

const RELEASE_VARIABLES: &str = r#"from java.text import SimpleDateFormat
from java.util import Date
releaseVariables['Date'] = SimpleDateFormat('yyyyMMdd').format(Date())
for key in [{{keys}}]:
    releaseVariables[key] = releaseVariables.get(key, '')
"#;

const OPS_EMAIL_LOOKUP: &str = r#"change = releaseVariables['{{phase}}.sun.id']
owner = servicenowApi.getChangeOwner(change)
releaseVariables['email_owner_release'] = userApi.getUser(owner).email
"#;

/// Which phase-pruning body to use. Picked from the phase and package modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhasePruning {
    OneListString,
    OneListOther,
    MultiList,
}

pub fn render(template: &str, values: &[(&str, String)]) -> String {
    values.iter().fold(template.to_string(), |acc, (key, value)| {
        acc.replace(&format!("{{{{{}}}}}", key), value)
    })
}

fn quoted<S: AsRef<str>>(items: &[S]) -> String {
    items
        .iter()
        .map(|item| format!("'{}'", item.as_ref().replace('\'', "\\'")))
        .collect::<Vec<_>>()
        .join(", ")
}

fn phase_names(phases: &[PhaseName]) -> Vec<&'static str> {
    phases.iter().map(PhaseName::as_str).collect()
}

fn with_helpers(body: String) -> String {
    format!("{}{}", HELPERS, body)
}

pub fn id_resolution(packages: &[&str]) -> String {
    render(ID_RESOLUTION, &[("packages", quoted(packages))])
}

pub fn phase_pruning(variant: PhasePruning, phases: &[PhaseName]) -> String {
    let template = match variant {
        PhasePruning::OneListString => PHASE_PRUNING_ONE_LIST_STRING,
        PhasePruning::OneListOther => PHASE_PRUNING_ONE_LIST,
        PhasePruning::MultiList => PHASE_PRUNING_MULTI_LIST,
    };
    with_helpers(render(template, &[("phases", quoted(&phase_names(phases)))]))
}

pub fn package_list(packages: &[&str]) -> String {
    render(
        PACKAGE_LIST,
        &[
            ("packages", quoted(packages)),
            ("state", STATE_VARIABLE.to_string()),
        ],
    )
}

pub fn env_prefix(environments: &[String]) -> String {
    render(ENV_PREFIX, &[("environments", quoted(environments))])
}

pub fn jenkins_pruning(mode: PackageMode, phases: &[PhaseName], packages: &[&str]) -> String {
    let template = match mode {
        PackageMode::String => JENKINS_PRUNING_STRING,
        PackageMode::Listbox => JENKINS_PRUNING_LISTBOX,
    };
    with_helpers(render(
        template,
        &[
            ("phases", quoted(&phase_names(phases))),
            ("packages", quoted(packages)),
            ("state", STATE_VARIABLE.to_string()),
        ],
    ))
}

pub fn controlm_pruning(multi_bench: bool, phases: &[PhaseName]) -> String {
    let template = if multi_bench {
        CONTROLM_PRUNING_MULTI_BENCH
    } else {
        CONTROLM_PRUNING_SINGLE
    };
    with_helpers(render(template, &[("phases", quoted(&phase_names(phases)))]))
}

pub fn deploy_pruning(phases: &[PhaseName], packages: &[&str]) -> String {
    with_helpers(render(
        DEPLOY_PRUNING,
        &[
            ("phases", quoted(&phase_names(phases))),
            ("packages", quoted(packages)),
        ],
    ))
}

pub fn deploy_pruning_variant(
    variant_key: &str,
    phases: &[PhaseName],
    packages: &[&str],
) -> String {
    with_helpers(render(
        DEPLOY_PRUNING_VARIANT,
        &[
            ("variant_key", variant_key.to_string()),
            ("phases", quoted(&phase_names(phases))),
            ("packages", quoted(packages)),
        ],
    ))
}

pub fn technical_pruning(mode: PackageMode, phases: &[PhaseName]) -> String {
    let template = match mode {
        PackageMode::String => TECHNICAL_PRUNING_STRING,
        PackageMode::Listbox => TECHNICAL_PRUNING_LISTBOX,
    };
    with_helpers(render(template, &[("phases", quoted(&phase_names(phases)))]))
}

pub fn branch_name(release_name: &str) -> String {
    render(BRANCH_NAME, &[("name", release_name.replace('\'', "\\'"))])
}

pub fn release_variables(keys: &[&str]) -> String {
    render(RELEASE_VARIABLES, &[("keys", quoted(keys))])
}

pub fn ops_email_lookup(phase: PhaseName) -> String {
    render(OPS_EMAIL_LOOKUP, &[("phase", phase.to_string())])
}
