//! Request payloads for individual tasks.

use serde_json::{json, Map, Value};

use crate::config::{
    ControlmMode, JenkinsJob, JenkinsSpec, NotificationHook, PackageSpec, PhaseName, ReleaseConfig,
    TechnicalCategory, TechnicalTaskKind,
};
use crate::plan::TaskPayload;

/// Change-record transitions driven from the release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeTransition {
    InitialValidation,
    Scheduled,
    Implement,
    Close,
}

impl ChangeTransition {
    pub fn state_label(&self) -> &'static str {
        match self {
            ChangeTransition::InitialValidation => "Initial validation",
            ChangeTransition::Scheduled => "Scheduled",
            ChangeTransition::Implement => "Implement",
            ChangeTransition::Close => "Closed",
        }
    }
}

fn properties(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn webhook(title: String, script_type: &str, body: Value) -> TaskPayload {
    let mut script = properties(body);
    script.insert("type".to_string(), json!(script_type));
    TaskPayload {
        title,
        task_type: "xlrelease.CustomScriptTask".to_string(),
        properties: properties(json!({ "pythonScript": Value::Object(script) })),
        precondition: None,
    }
}

fn change_id(phase: PhaseName) -> String {
    format!("${{{}.sun.id}}", phase)
}

pub fn environment_variable(phase: PhaseName) -> String {
    format!("env_{}", phase)
}

pub fn user_input(phase: PhaseName) -> TaskPayload {
    let variables: Vec<Value> = [
        format!("{}_xldeploy_username", phase),
        format!("{}_xldeploy_password", phase),
        environment_variable(phase),
    ]
    .into_iter()
    .map(|key| json!({ "key": key }))
    .collect();

    TaskPayload {
        title: format!("Deployment inputs {}", phase),
        task_type: "xlrelease.UserInputTask".to_string(),
        properties: properties(json!({
            "description": format!("Credentials and target environment for {}", phase),
            "variables": variables,
        })),
        precondition: None,
    }
}

pub fn jenkins_build(jenkins: &JenkinsSpec, package: &str, job: &JenkinsJob) -> TaskPayload {
    let password = if jenkins.api_token.is_some() {
        "${jenkins_api_token}".to_string()
    } else {
        String::new()
    };
    TaskPayload {
        title: format!("Jenkins build {}", package),
        task_type: jenkins.task_type.clone(),
        properties: properties(json!({
            "jenkinsServer": jenkins.server,
            "username": jenkins.username,
            "password": password,
            "jobName": job.job_name,
            "jobParameters": job.parameters.join("\n"),
        })),
        precondition: job.precondition.clone(),
    }
}

pub fn deploy(phase: PhaseName, group: &str, package: &str, spec: &PackageSpec) -> TaskPayload {
    let category = spec.category().map(|c| c.as_str()).unwrap_or("package");
    let environment = spec
        .xld_environment_path_pattern
        .replace("<ENV>", &format!("${{{}}}", environment_variable(phase)));
    TaskPayload {
        title: format!("Deploy {} ({})", package, category),
        task_type: "xldeploy.Deploy".to_string(),
        properties: properties(json!({
            "server": "XLD",
            "deploymentPackage": format!("{}/${{{}_version}}", spec.xld_application_path, package),
            "deploymentEnvironment": environment,
            "group": group,
            "username": format!("${{{}_xldeploy_username}}", phase),
            "password": format!("${{{}_xldeploy_password}}", phase),
        })),
        precondition: None,
    }
}

pub fn undeploy(phase: PhaseName, package: &str, spec: &PackageSpec) -> TaskPayload {
    let environment = spec
        .xld_environment_path_pattern
        .replace("<ENV>", &format!("${{{}}}", environment_variable(phase)));
    TaskPayload {
        title: format!("Undeploy {}", package),
        task_type: "xldeploy.Undeploy".to_string(),
        properties: properties(json!({
            "server": "XLD",
            "deployedApplication": format!("{}/{}", environment, package),
        })),
        precondition: None,
    }
}

pub fn controlm_order(cfg: &ReleaseConfig, phase: PhaseName, folder: &str) -> TaskPayload {
    let master = cfg
        .packages
        .values()
        .any(|p| p.controlm_mode == ControlmMode::Master);
    let order_mode = if master { "master" } else { "independent" };
    let folder = if phase == PhaseName::Bench && cfg.multi_bench_environments.len() >= 2 {
        format!("${{controlm_prefix_BENCH}}{}", folder)
    } else {
        folder.to_string()
    };
    TaskPayload {
        title: format!("ControlM order {}", folder),
        task_type: "controlm.OrderFolder".to_string(),
        properties: properties(json!({
            "folder": folder,
            "environment": format!("${{{}}}", environment_variable(phase)),
            "orderMode": order_mode,
        })),
        precondition: None,
    }
}

pub fn remote_script(phase: PhaseName, title: &str, script: &str, windows: bool) -> TaskPayload {
    TaskPayload {
        title: title.to_string(),
        task_type: if windows {
            "remoteScript.PowerShell"
        } else {
            "remoteScript.Unix"
        }
        .to_string(),
        properties: properties(json!({
            "script": script,
            "address": format!("${{{}}}", environment_variable(phase)),
        })),
        precondition: None,
    }
}

pub fn notification(
    cfg: &ReleaseConfig,
    phase: PhaseName,
    hook: NotificationHook,
    recipients: &[String],
) -> TaskPayload {
    TaskPayload {
        title: format!("Notify {} {}", hook.as_str(), phase),
        task_type: "xlrelease.NotificationTask".to_string(),
        properties: properties(json!({
            "addresses": recipients,
            "subject": format!("{} - {} {}", cfg.name, phase, hook.as_str()),
            "body": format!("Release ${{release.title}} reached '{}' in {}.", hook.as_str(), phase),
        })),
        precondition: None,
    }
}

pub fn create_change(cfg: &ReleaseConfig, phase: PhaseName) -> TaskPayload {
    webhook(
        format!("Create change {}", phase),
        "webhook.JsonWebhook",
        json!({
            "URL": "${sun_api_url}/change",
            "method": "POST",
            "body": {
                "short_description": "${change_title}",
                "description": "${change_description}",
                "assignment_group": cfg.change_management_approver,
                "standard_template": cfg.standard_change_template_id,
                "application": cfg.application_id,
                "environment": phase.as_str(),
            },
            "jsonPathExpression": "result.number",
            "resultVariable": format!("{}.sun.id", phase),
        }),
    )
}

pub fn change_transition(phase: PhaseName, transition: ChangeTransition) -> TaskPayload {
    webhook(
        format!("Change {} {}", phase, transition.state_label()),
        "webhook.JsonWebhook",
        json!({
            "URL": format!("${{sun_api_url}}/change/{}", change_id(phase)),
            "method": "PATCH",
            "body": { "state": transition.state_label() },
        }),
    )
}

pub fn wait_for_approval(phase: PhaseName) -> TaskPayload {
    webhook(
        format!("Wait approval {}", phase),
        "servicenow.WaitForChangeState",
        json!({
            "changeRequest": change_id(phase),
            "state": "WaitForInitialChangeApproval",
        }),
    )
}

pub fn dba_task(
    phase: PhaseName,
    category: TechnicalCategory,
    kind: TechnicalTaskKind,
    ordinal: usize,
) -> TaskPayload {
    let suffix = if ordinal > 0 {
        format!(" ({})", ordinal + 1)
    } else {
        String::new()
    };
    webhook(
        format!("{} {} {}{}", kind.as_str(), category.as_str(), phase, suffix),
        "servicenow.CreateChangeTask",
        json!({
            "changeRequest": change_id(phase),
            "assignmentGroup": "DBA",
            "taskKind": kind.as_str(),
            "shortDescription": format!("{} {} for {}", kind.as_str(), category.as_str(), phase),
        }),
    )
}

/// Gate title for an operations technical task.
pub fn ops_gate_title(
    phase: PhaseName,
    category: TechnicalCategory,
    ordinal: usize,
) -> (String, String) {
    let suffix = if ordinal > 0 {
        format!(" ({})", ordinal + 1)
    } else {
        String::new()
    };
    (
        format!(
            "{} {} {}{}",
            TechnicalTaskKind::OpsGate.as_str(),
            category.as_str(),
            phase,
            suffix
        ),
        format!("OPS team: {} done for {}", category.as_str(), phase),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AutoUndeploy, ResolutionMode};

    fn spec() -> PackageSpec {
        PackageSpec {
            build_name_pattern: "api-${version}".into(),
            controlm_mode: ControlmMode::Master,
            xld_application_path: "Applications/APP/api".into(),
            xld_environment_path_pattern: "Environments/APP/<ENV>/api".into(),
            auto_undeploy: AutoUndeploy::Disabled,
            resolution_mode: ResolutionMode::CheckDeployTool,
        }
    }

    #[test]
    fn deploy_task_targets_phase_environment() {
        let task = deploy(PhaseName::Uat, "Deploy all", "Api", &spec());
        assert_eq!(task.title, "Deploy Api (APP)");
        assert_eq!(
            task.properties["deploymentEnvironment"],
            "Environments/APP/${env_UAT}/api"
        );
        assert_eq!(
            task.properties["deploymentPackage"],
            "Applications/APP/api/${Api_version}"
        );
    }

    #[test]
    fn transition_tasks_wrap_webhook_script() {
        let task = change_transition(PhaseName::Bench, ChangeTransition::Implement);
        assert_eq!(task.task_type, "xlrelease.CustomScriptTask");
        assert_eq!(task.properties["pythonScript"]["type"], "webhook.JsonWebhook");
        assert_eq!(
            task.properties["pythonScript"]["body"]["state"],
            "Implement"
        );
    }

    #[test]
    fn repeated_technical_tasks_get_distinct_titles() {
        let first = dba_task(
            PhaseName::Production,
            TechnicalCategory::AfterToolDeploy,
            TechnicalTaskKind::DbaFactor,
            0,
        );
        let second = dba_task(
            PhaseName::Production,
            TechnicalCategory::AfterToolDeploy,
            TechnicalTaskKind::DbaFactor,
            1,
        );
        assert_ne!(first.title, second.title);
    }
}
