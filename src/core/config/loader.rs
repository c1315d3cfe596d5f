//! Descriptor loading.
//!
//! Descriptors use the historical key names (`general_info`,
//! `template_liste_package`, `Phases`, ...). They are read into loosely typed
//! raw structs first so that every enum and required field can be reported
//! with a categorized error instead of a bare parser message.

use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::model::{
    AutoUndeploy, ControlmMode, JenkinsJob, JenkinsSpec, NotificationHook, PackageMode,
    PackageSpec, PhaseName, PhaseSelectionMode, ReleaseConfig, ResolutionMode, TaskSpec,
    TechnicalCategory, TechnicalTaskKind, TechnicalTaskLists, TemplateKind, VariableSeed,
};
use crate::error::{Error, Result};

#[derive(Debug, Deserialize)]
struct RawDescriptor {
    general_info: Option<RawGeneralInfo>,
    #[serde(default)]
    template_liste_package: Option<BTreeMap<String, RawPackage>>,
    #[serde(default)]
    jenkins: Option<RawJenkins>,
    #[serde(default)]
    technical_task_list: Option<BTreeMap<String, Option<Vec<String>>>>,
    #[serde(default, rename = "Phases")]
    phases: Option<BTreeMap<String, Option<Vec<BTreeMap<String, Value>>>>>,
    #[serde(default)]
    variable_release: Option<BTreeMap<String, Option<Value>>>,
    #[serde(flatten)]
    extra: BTreeMap<String, Value>,
}

#[derive(Debug, Deserialize)]
struct RawGeneralInfo {
    name_release: Option<String>,
    iua: Option<Value>,
    appli_name: Option<String>,
    xlr_folder: Option<String>,
    type_template: Option<String>,
    phases: Option<Vec<String>>,
    phase_mode: Option<String>,
    template_package_mode: Option<String>,
    technical_task_mode: Option<String>,
    #[serde(rename = "SUN_approuver")]
    sun_approver: Option<String>,
    #[serde(rename = "Template_standard_id")]
    template_standard_id: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawAutoUndeploy {
    Flag(bool),
    After(Vec<String>),
}

#[derive(Debug, Deserialize)]
struct RawPackage {
    package_build_name: Option<String>,
    controlm_mode: Option<String>,
    #[serde(rename = "XLD_application_path")]
    xld_application_path: Option<String>,
    #[serde(rename = "XLD_environment_path")]
    xld_environment_path: Option<String>,
    auto_undeploy: Option<RawAutoUndeploy>,
    mode: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawJenkins {
    #[serde(rename = "jenkinsServer")]
    server: Option<String>,
    #[serde(rename = "taskType")]
    task_type: Option<String>,
    username: Option<String>,
    #[serde(rename = "apiToken", alias = "valueapiToken")]
    api_token: Option<String>,
    #[serde(default, rename = "jenkinsjob")]
    jobs: BTreeMap<String, RawJenkinsJob>,
}

#[derive(Debug, Deserialize)]
struct RawJenkinsJob {
    #[serde(rename = "jobName")]
    job_name: Option<String>,
    #[serde(default)]
    parameters: Vec<Value>,
    precondition: Option<String>,
}

/// Reads a descriptor from disk. `.json` files are parsed as JSON, anything else as YAML.
pub fn load(path: &Path) -> Result<ReleaseConfig> {
    let expanded = expand_path(path);
    let display = expanded.display().to_string();

    let raw = std::fs::read_to_string(&expanded).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::config_not_found(display.clone())
        } else {
            Error::internal_io(e.to_string(), Some(format!("read {}", display)))
        }
    })?;

    let is_json = expanded
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let parsed = if is_json {
        parse_json(&raw)
    } else {
        parse_yaml(&raw)
    };
    parsed.map_err(|err| err.with_detail("path", display))
}

pub fn parse_yaml(content: &str) -> Result<ReleaseConfig> {
    let raw: RawDescriptor = serde_yml::from_str(content)
        .map_err(|e| Error::config_invalid_yaml("<yaml>", e.to_string()))?;
    convert(raw)
}

pub fn parse_json(content: &str) -> Result<ReleaseConfig> {
    let raw: RawDescriptor = serde_json::from_str(content)
        .map_err(|e| Error::config_invalid_yaml("<json>", e.to_string()))?;
    convert(raw)
}

pub(crate) fn expand_path(path: &Path) -> PathBuf {
    let as_str = path.to_string_lossy();
    PathBuf::from(shellexpand::tilde(&as_str).into_owned())
}

fn required(value: Option<String>, field: &str) -> Result<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(Error::config_missing_field(field, None)),
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn string_list(value: &Value, field: &str) -> Result<Vec<String>> {
    match value {
        Value::Array(items) => items
            .iter()
            .map(|item| {
                scalar_to_string(item).ok_or_else(|| {
                    Error::config_conflict(field, "List entries must be scalars", None)
                })
            })
            .collect(),
        Value::Null => Ok(Vec::new()),
        other => scalar_to_string(other)
            .map(|s| vec![s])
            .ok_or_else(|| Error::config_conflict(field, "Expected a list", None)),
    }
}

fn convert(raw: RawDescriptor) -> Result<ReleaseConfig> {
    let general = raw
        .general_info
        .ok_or_else(|| Error::config_missing_field("general_info", None))?;

    let name = required(general.name_release, "general_info.name_release")?;
    let application_id = general
        .iua
        .as_ref()
        .and_then(scalar_to_string)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| Error::config_missing_field("general_info.iua", None))?;
    let folder_path = required(general.xlr_folder, "general_info.xlr_folder")?;

    let template_kind = match general.type_template {
        Some(kind) => TemplateKind::from_str(&kind)?,
        None => TemplateKind::Dynamic,
    };

    let phases = general
        .phases
        .ok_or_else(|| Error::config_missing_field("general_info.phases", None))?
        .iter()
        .map(|p| PhaseName::from_str("general_info.phases", p))
        .collect::<Result<Vec<_>>>()?;

    let phase_selection_mode = match general.phase_mode {
        Some(mode) => PhaseSelectionMode::from_str(&mode)?,
        None => PhaseSelectionMode::MultiList,
    };
    let package_mode = match general.template_package_mode {
        Some(mode) => PackageMode::from_str("general_info.template_package_mode", &mode)?,
        None => PackageMode::String,
    };
    let technical_task_mode = match general.technical_task_mode {
        Some(mode) => PackageMode::from_str("general_info.technical_task_mode", &mode)?,
        None => PackageMode::String,
    };

    let packages = raw
        .template_liste_package
        .unwrap_or_default()
        .into_iter()
        .map(|(name, pkg)| {
            let spec = convert_package(&name, pkg)?;
            Ok((name, spec))
        })
        .collect::<Result<BTreeMap<_, _>>>()?;

    let jenkins = raw.jenkins.map(convert_jenkins).transpose()?;
    let technical_tasks = convert_technical_tasks(raw.technical_task_list.unwrap_or_default())?;

    let mut phase_tasks = BTreeMap::new();
    for (phase, entries) in raw.phases.unwrap_or_default() {
        let phase_name = PhaseName::from_str("Phases", &phase)?;
        let mut tasks = Vec::new();
        for entry in entries.unwrap_or_default() {
            tasks.extend(convert_phase_entry(phase_name, entry)?);
        }
        phase_tasks.insert(phase_name, tasks);
    }

    let release_variables = raw
        .variable_release
        .unwrap_or_default()
        .into_iter()
        .map(|(key, seed)| {
            let seed = if key == "Date" {
                VariableSeed::Date
            } else {
                match seed.as_ref().and_then(scalar_to_string) {
                    Some(text) => VariableSeed::Text(text),
                    None => VariableSeed::Empty,
                }
            };
            (key, seed)
        })
        .collect();

    let mut multi_bench_environments = Vec::new();
    let mut environments = BTreeMap::new();
    for (key, value) in &raw.extra {
        let Some(suffix) = key.strip_prefix("XLD_ENV_") else {
            continue;
        };
        let phase = PhaseName::from_str(key, suffix)?;
        let list = string_list(value, key)?;
        if phase == PhaseName::Bench {
            multi_bench_environments = list;
        } else {
            environments.insert(phase, list);
        }
    }

    Ok(ReleaseConfig {
        name,
        application_id,
        application_name: general.appli_name,
        folder_path,
        template_kind,
        phases,
        phase_selection_mode,
        package_mode,
        technical_task_mode,
        packages,
        jenkins,
        technical_tasks,
        phase_tasks,
        change_management_approver: general.sun_approver,
        standard_change_template_id: general
            .template_standard_id
            .as_ref()
            .and_then(scalar_to_string)
            .filter(|s| !s.trim().is_empty()),
        release_variables,
        multi_bench_environments,
        environments,
    })
}

fn convert_package(name: &str, raw: RawPackage) -> Result<PackageSpec> {
    let field = |key: &str| format!("template_liste_package.{}.{}", name, key);

    let controlm_mode = match raw.controlm_mode.as_deref().map(str::trim) {
        None | Some("master") => ControlmMode::Master,
        Some("Independant") | Some("independent") => ControlmMode::Independent,
        Some(other) => {
            return Err(Error::config_invalid_enum(
                field("controlm_mode"),
                other,
                &["master", "Independant"],
            ))
        }
    };

    let resolution_mode = match raw.mode.as_deref().map(str::trim) {
        None | Some("CHECK_XLD") => ResolutionMode::CheckDeployTool,
        Some("name_from_jenkins") => ResolutionMode::NameFromBuildSystem,
        Some(other) => {
            return Err(Error::config_invalid_enum(
                field("mode"),
                other,
                &["CHECK_XLD", "name_from_jenkins"],
            ))
        }
    };

    let auto_undeploy = match raw.auto_undeploy {
        None | Some(RawAutoUndeploy::Flag(false)) => AutoUndeploy::Disabled,
        Some(RawAutoUndeploy::Flag(true)) => AutoUndeploy::Enabled,
        Some(RawAutoUndeploy::After(list)) if list.is_empty() => AutoUndeploy::Disabled,
        Some(RawAutoUndeploy::After(list)) => AutoUndeploy::After(list),
    };

    Ok(PackageSpec {
        build_name_pattern: required(raw.package_build_name, &field("package_build_name"))?,
        controlm_mode,
        xld_application_path: required(raw.xld_application_path, &field("XLD_application_path"))?,
        xld_environment_path_pattern: required(
            raw.xld_environment_path,
            &field("XLD_environment_path"),
        )?,
        auto_undeploy,
        resolution_mode,
    })
}

fn convert_jenkins(raw: RawJenkins) -> Result<JenkinsSpec> {
    let jobs = raw
        .jobs
        .into_iter()
        .map(|(package, job)| {
            let job_name = required(job.job_name, &format!("jenkins.jenkinsjob.{}.jobName", package))?;
            let parameters = job.parameters.iter().filter_map(scalar_to_string).collect();
            Ok((
                package,
                JenkinsJob {
                    job_name,
                    parameters,
                    precondition: job.precondition,
                },
            ))
        })
        .collect::<Result<BTreeMap<_, _>>>()?;

    Ok(JenkinsSpec {
        server: required(raw.server, "jenkins.jenkinsServer")?,
        task_type: raw.task_type.unwrap_or_else(|| "jenkins.Build".to_string()),
        username: required(raw.username, "jenkins.username")?,
        api_token: raw.api_token.filter(|t| !t.is_empty()),
        jobs,
    })
}

fn convert_technical_tasks(
    raw: BTreeMap<String, Option<Vec<String>>>,
) -> Result<TechnicalTaskLists> {
    let mut lists = TechnicalTaskLists::default();
    for (key, entries) in raw {
        let category = TechnicalCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == key)
            .ok_or_else(|| {
                Error::config_invalid_enum(
                    "technical_task_list",
                    key.clone(),
                    &[
                        "before_deployment",
                        "before_xldeploy",
                        "after_xldeploy",
                        "after_deployment",
                    ],
                )
            })?;
        let field = format!("technical_task_list.{}", key);
        for entry in entries.unwrap_or_default() {
            lists
                .get_mut(category)
                .push(TechnicalTaskKind::from_str(&field, &entry)?);
        }
    }
    Ok(lists)
}

fn convert_phase_entry(phase: PhaseName, entry: BTreeMap<String, Value>) -> Result<Vec<TaskSpec>> {
    let mut tasks = Vec::new();
    for (key, value) in entry {
        let field = format!("Phases.{}.{}", phase, key);
        match key.as_str() {
            "xldeploy" | "seq_xldeploy" => {
                let Value::Object(groups) = value else {
                    return Err(Error::config_conflict(
                        field,
                        "Deploy entries map a group title to a package list",
                        None,
                    ));
                };
                for (group, packages) in groups {
                    tasks.push(TaskSpec::ToolDeploy {
                        packages: string_list(&packages, &field)?,
                        group,
                    });
                }
            }
            "controlm" | "XLR_task_controlm" => tasks.push(TaskSpec::ControlM {
                folders: string_list(&value, &field)?,
            }),
            "launch_script_linux" | "launch_script_windows" => {
                let title = value
                    .get("title")
                    .and_then(scalar_to_string)
                    .ok_or_else(|| Error::config_missing_field(format!("{}.title", field), None))?;
                let script = value
                    .get("script")
                    .and_then(scalar_to_string)
                    .ok_or_else(|| Error::config_missing_field(format!("{}.script", field), None))?;
                tasks.push(if key == "launch_script_linux" {
                    TaskSpec::LinuxScript { title, script }
                } else {
                    TaskSpec::WindowsScript { title, script }
                });
            }
            "email_close_release" => tasks.push(TaskSpec::Notify {
                hook: NotificationHook::Close,
                recipients: string_list(&value, &field)?,
            }),
            "email_end_release" => tasks.push(TaskSpec::Notify {
                hook: NotificationHook::End,
                recipients: string_list(&value, &field)?,
            }),
            other => {
                return Err(Error::config_invalid_enum(
                    format!("Phases.{}", phase),
                    other,
                    &[
                        "xldeploy",
                        "controlm",
                        "launch_script_linux",
                        "launch_script_windows",
                        "email_close_release",
                        "email_end_release",
                    ],
                ))
            }
        }
    }
    Ok(tasks)
}
