//! Typed release descriptor.
//!
//! Everything the compiler reads lives here. Values are produced by
//! [`super::loader`] and checked by [`super::validate`]; the compiler treats
//! them as read-only and well-formed.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum PhaseName {
    #[serde(rename = "BUILD")]
    Build,
    #[serde(rename = "DEV")]
    Dev,
    #[serde(rename = "UAT")]
    Uat,
    #[serde(rename = "BENCH")]
    Bench,
    #[serde(rename = "PRODUCTION")]
    Production,
}

impl PhaseName {
    pub const ALL: [PhaseName; 5] = [
        PhaseName::Build,
        PhaseName::Dev,
        PhaseName::Uat,
        PhaseName::Bench,
        PhaseName::Production,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseName::Build => "BUILD",
            PhaseName::Dev => "DEV",
            PhaseName::Uat => "UAT",
            PhaseName::Bench => "BENCH",
            PhaseName::Production => "PRODUCTION",
        }
    }

    pub fn from_str(field: &str, s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BUILD" => Ok(PhaseName::Build),
            "DEV" => Ok(PhaseName::Dev),
            "UAT" => Ok(PhaseName::Uat),
            "BENCH" => Ok(PhaseName::Bench),
            "PRODUCTION" => Ok(PhaseName::Production),
            _ => Err(Error::config_invalid_enum(
                field,
                s,
                &["BUILD", "DEV", "UAT", "BENCH", "PRODUCTION"],
            )),
        }
    }

    /// Bench and Production carry a change record; the others are development phases.
    pub fn is_production_class(&self) -> bool {
        matches!(self, PhaseName::Bench | PhaseName::Production)
    }

    /// Environment code used when a phase has no configured environment list.
    pub fn default_environment(&self) -> &'static str {
        match self {
            PhaseName::Build => "BLD",
            PhaseName::Dev => "DEV",
            PhaseName::Uat => "UAT",
            PhaseName::Bench => "BCH",
            PhaseName::Production => "PRD",
        }
    }
}

impl fmt::Display for PhaseName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateKind {
    Dynamic,
    Static,
    /// Release name derived from the source branch at release start.
    FromBranchName,
}

impl TemplateKind {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "DYNAMIC" => Ok(TemplateKind::Dynamic),
            "STATIC" => Ok(TemplateKind::Static),
            "FROM_NAME_BRANCH" => Ok(TemplateKind::FromBranchName),
            other => Err(Error::config_invalid_enum(
                "general_info.type_template",
                other,
                &["DYNAMIC", "STATIC", "FROM_NAME_BRANCH"],
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseSelectionMode {
    OneList,
    MultiList,
}

impl PhaseSelectionMode {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "one_list" => Ok(PhaseSelectionMode::OneList),
            "multi_list" => Ok(PhaseSelectionMode::MultiList),
            other => Err(Error::config_invalid_enum(
                "general_info.phase_mode",
                other,
                &["one_list", "multi_list"],
            )),
        }
    }
}

/// How package versions are chosen at release start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageMode {
    String,
    Listbox,
}

impl PackageMode {
    pub fn from_str(field: &str, s: &str) -> Result<Self> {
        match s.trim() {
            "string" => Ok(PackageMode::String),
            "listbox" => Ok(PackageMode::Listbox),
            other => Err(Error::config_invalid_enum(field, other, &["string", "listbox"])),
        }
    }
}

pub type TechnicalTaskMode = PackageMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlmMode {
    Master,
    Independent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionMode {
    /// Version is checked against the deploy tool's repository.
    CheckDeployTool,
    /// Deployment id comes from the build system's output name.
    NameFromBuildSystem,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoUndeploy {
    Disabled,
    Enabled,
    /// Undeploy once the listed packages are gone.
    After(Vec<String>),
}

impl AutoUndeploy {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, AutoUndeploy::Disabled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageCategory {
    Application,
    Script,
    Library,
    Interface,
}

impl PackageCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            PackageCategory::Application => "APP",
            PackageCategory::Script => "Scripts",
            PackageCategory::Library => "SDK",
            PackageCategory::Interface => "Interfaces",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageSpec {
    pub build_name_pattern: String,
    pub controlm_mode: ControlmMode,
    pub xld_application_path: String,
    pub xld_environment_path_pattern: String,
    pub auto_undeploy: AutoUndeploy,
    pub resolution_mode: ResolutionMode,
}

impl PackageSpec {
    /// Category inferred from the deploy-tool application path segments.
    pub fn category(&self) -> Option<PackageCategory> {
        let segments: Vec<&str> = self.xld_application_path.split('/').collect();
        [
            PackageCategory::Application,
            PackageCategory::Script,
            PackageCategory::Library,
            PackageCategory::Interface,
        ]
        .into_iter()
        .find(|category| {
            segments
                .iter()
                .any(|segment| segment.eq_ignore_ascii_case(category.as_str()))
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JenkinsJob {
    pub job_name: String,
    pub parameters: Vec<String>,
    pub precondition: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JenkinsSpec {
    pub server: String,
    pub task_type: String,
    pub username: String,
    pub api_token: Option<String>,
    /// Keyed by package name.
    pub jobs: BTreeMap<String, JenkinsJob>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TechnicalCategory {
    BeforeDeployment,
    BeforeToolDeploy,
    AfterToolDeploy,
    AfterDeployment,
}

impl TechnicalCategory {
    pub const ALL: [TechnicalCategory; 4] = [
        TechnicalCategory::BeforeDeployment,
        TechnicalCategory::BeforeToolDeploy,
        TechnicalCategory::AfterToolDeploy,
        TechnicalCategory::AfterDeployment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TechnicalCategory::BeforeDeployment => "before_deployment",
            TechnicalCategory::BeforeToolDeploy => "before_xldeploy",
            TechnicalCategory::AfterToolDeploy => "after_xldeploy",
            TechnicalCategory::AfterDeployment => "after_deployment",
        }
    }
}

/// Archetype of an injected technical task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TechnicalTaskKind {
    OpsGate,
    DbaApproval,
    DbaFactor,
}

impl TechnicalTaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TechnicalTaskKind::OpsGate => "task_ops",
            TechnicalTaskKind::DbaApproval => "task_dba_other",
            TechnicalTaskKind::DbaFactor => "task_dba_factor",
        }
    }

    pub fn from_str(field: &str, s: &str) -> Result<Self> {
        match s.trim() {
            "task_ops" => Ok(TechnicalTaskKind::OpsGate),
            "task_dba_other" => Ok(TechnicalTaskKind::DbaApproval),
            "task_dba_factor" => Ok(TechnicalTaskKind::DbaFactor),
            other => Err(Error::config_invalid_enum(
                field,
                other,
                &["task_ops", "task_dba_other", "task_dba_factor"],
            )),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TechnicalTaskLists {
    pub before_deployment: Vec<TechnicalTaskKind>,
    pub before_tool_deploy: Vec<TechnicalTaskKind>,
    pub after_tool_deploy: Vec<TechnicalTaskKind>,
    pub after_deployment: Vec<TechnicalTaskKind>,
}

impl TechnicalTaskLists {
    pub fn get(&self, category: TechnicalCategory) -> &[TechnicalTaskKind] {
        match category {
            TechnicalCategory::BeforeDeployment => &self.before_deployment,
            TechnicalCategory::BeforeToolDeploy => &self.before_tool_deploy,
            TechnicalCategory::AfterToolDeploy => &self.after_tool_deploy,
            TechnicalCategory::AfterDeployment => &self.after_deployment,
        }
    }

    pub fn get_mut(&mut self, category: TechnicalCategory) -> &mut Vec<TechnicalTaskKind> {
        match category {
            TechnicalCategory::BeforeDeployment => &mut self.before_deployment,
            TechnicalCategory::BeforeToolDeploy => &mut self.before_tool_deploy,
            TechnicalCategory::AfterToolDeploy => &mut self.after_tool_deploy,
            TechnicalCategory::AfterDeployment => &mut self.after_deployment,
        }
    }

    pub fn populated_categories(&self) -> usize {
        TechnicalCategory::ALL
            .iter()
            .filter(|c| !self.get(**c).is_empty())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.populated_categories() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationHook {
    Close,
    End,
}

impl NotificationHook {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationHook::Close => "close",
            NotificationHook::End => "end",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum TaskSpec {
    ToolDeploy { group: String, packages: Vec<String> },
    ControlM { folders: Vec<String> },
    LinuxScript { title: String, script: String },
    WindowsScript { title: String, script: String },
    Notify { hook: NotificationHook, recipients: Vec<String> },
}

impl TaskSpec {
    pub fn is_tool_deploy(&self) -> bool {
        matches!(self, TaskSpec::ToolDeploy { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableSeed {
    /// Computed at release start by the release-variable definition script.
    Date,
    Text(String),
    Empty,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseConfig {
    pub name: String,
    pub application_id: String,
    pub application_name: Option<String>,
    pub folder_path: String,
    pub template_kind: TemplateKind,
    pub phases: Vec<PhaseName>,
    pub phase_selection_mode: PhaseSelectionMode,
    pub package_mode: PackageMode,
    pub technical_task_mode: TechnicalTaskMode,
    pub packages: BTreeMap<String, PackageSpec>,
    pub jenkins: Option<JenkinsSpec>,
    pub technical_tasks: TechnicalTaskLists,
    pub phase_tasks: BTreeMap<PhaseName, Vec<TaskSpec>>,
    pub change_management_approver: Option<String>,
    pub standard_change_template_id: Option<String>,
    pub release_variables: BTreeMap<String, VariableSeed>,
    pub multi_bench_environments: Vec<String>,
    /// Selectable environments per phase, other than the multi-bench list.
    pub environments: BTreeMap<PhaseName, Vec<String>>,
}

impl ReleaseConfig {
    pub fn has_phase(&self, phase: PhaseName) -> bool {
        self.phases.contains(&phase)
    }

    pub fn has_any_phase(&self, phases: &[PhaseName]) -> bool {
        phases.iter().any(|p| self.has_phase(*p))
    }

    pub fn has_production_class(&self) -> bool {
        self.phases.iter().any(PhaseName::is_production_class)
    }

    pub fn tasks_for(&self, phase: PhaseName) -> &[TaskSpec] {
        self.phase_tasks
            .get(&phase)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn declares_controlm(&self) -> bool {
        self.phase_tasks
            .values()
            .flatten()
            .any(|task| matches!(task, TaskSpec::ControlM { .. }))
    }

    /// Environment choices for a phase. Bench uses the multi-bench list when it is set.
    pub fn environments_for(&self, phase: PhaseName) -> &[String] {
        if phase == PhaseName::Bench && !self.multi_bench_environments.is_empty() {
            return &self.multi_bench_environments;
        }
        self.environments
            .get(&phase)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn auto_undeploy_packages(&self) -> Vec<&str> {
        self.packages
            .iter()
            .filter(|(_, spec)| spec.auto_undeploy.is_enabled())
            .map(|(name, _)| name.as_str())
            .collect()
    }
}
