//! Release API capabilities.
//!
//! The executor depends on four narrow traits rather than one client type.
//! [`http::HttpClient`] implements all of them against the orchestrator's REST
//! API; [`retry::RetryingClient`] wraps any implementation with backoff.

pub mod http;
pub mod retry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::plan::{TaskPayload, VariableSpec};

pub use http::HttpClient;
pub use retry::{RetryPolicy, RetryingClient};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateRef {
    pub id: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedTemplate {
    pub id: String,
    /// Phases the orchestrator adds to every new template.
    #[serde(default)]
    pub default_phase_ids: Vec<String>,
}

#[async_trait]
pub trait TemplateApi: Send + Sync {
    /// Templates whose title matches `name` exactly.
    async fn find_templates_by_name(&self, name: &str) -> Result<Vec<TemplateRef>>;
    async fn delete_template(&self, id: &str) -> Result<()>;
    async fn create_template(&self, folder_path: &str, name: &str) -> Result<CreatedTemplate>;
}

#[async_trait]
pub trait PhaseApi: Send + Sync {
    async fn create_phase(
        &self,
        template_id: &str,
        title: &str,
        position: Option<usize>,
    ) -> Result<String>;
    async fn delete_phase(&self, id: &str) -> Result<()>;
}

#[async_trait]
pub trait TaskApi: Send + Sync {
    async fn create_task(&self, phase_id: &str, task: &TaskPayload) -> Result<String>;
    async fn create_gate(&self, phase_id: &str, title: &str) -> Result<String>;
    /// Attaches a checklist condition to an existing gate.
    async fn add_gate_condition(&self, gate_id: &str, title: &str) -> Result<()>;
    async fn create_script_task(&self, phase_id: &str, title: &str, body: &str) -> Result<String>;
}

#[async_trait]
pub trait VariableApi: Send + Sync {
    async fn create_variable(&self, template_id: &str, variable: &VariableSpec) -> Result<String>;
}

/// Everything the executor needs from the orchestrator.
pub trait ReleaseApi: TemplateApi + PhaseApi + TaskApi + VariableApi {
    /// Browser URL of a template.
    fn template_url(&self, template_id: &str) -> String;
}

/// `Applications/Folder1/Release2` becomes `<ui>/#/templates/Folder1-Release2`.
pub fn template_url(ui_base: &str, template_id: &str) -> String {
    let short = template_id
        .strip_prefix("Applications/")
        .unwrap_or(template_id)
        .replace('/', "-");
    format!("{}/#/templates/{}", ui_base.trim_end_matches('/'), short)
}
