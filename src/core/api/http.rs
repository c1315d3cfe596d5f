//! REST client for the release orchestrator.
//!
//! Every call is classified on failure: timeouts, connection errors, 429 and
//! 5xx are transient, any other 4xx is permanent.

use async_trait::async_trait;
use reqwest::{Client, Method, Response};
use serde_json::{json, Map, Value};

use super::{CreatedTemplate, PhaseApi, ReleaseApi, TaskApi, TemplateApi, TemplateRef, VariableApi};
use crate::config::Settings;
use crate::error::{Error, Result};
use crate::plan::{TaskPayload, VariableKind, VariableSpec};

fn http_error(endpoint: &str, e: reqwest::Error) -> Error {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        Error::remote_transient(endpoint, None, format!("HTTP request failed: {}", e))
    } else {
        Error::remote_permanent(endpoint, None, format!("HTTP request failed: {}", e))
    }
}

fn api_error(endpoint: &str, status: u16, body: &str) -> Error {
    let message = format!("API error: HTTP {}: {}", status, body.trim());
    if is_transient_status(status) {
        Error::remote_transient(endpoint, Some(status), message)
    } else {
        Error::remote_permanent(endpoint, Some(status), message)
    }
}

pub fn is_transient_status(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

async fn parse_json_response(endpoint: &str, response: Response) -> Result<Value> {
    let status = response.status();
    let body = response.text().await.map_err(|e| http_error(endpoint, e))?;

    if !status.is_success() {
        return Err(api_error(endpoint, status.as_u16(), &body));
    }
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }

    serde_json::from_str(&body).map_err(|e| {
        Error::internal_json(
            format!("Invalid JSON response: {}", e),
            Some(endpoint.to_string()),
        )
    })
}

fn id_of(endpoint: &str, value: &Value) -> Result<String> {
    value
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            Error::remote_permanent(endpoint, None, "Response carries no 'id' field")
        })
}

fn variable_body(variable: &VariableSpec) -> Result<Value> {
    let kind = serde_json::to_value(variable.kind)
        .map_err(|e| Error::internal_json(e.to_string(), Some("variable type".into())))?;
    let mut body = json!({
        "id": Value::Null,
        "type": kind,
        "key": variable.key,
        "label": variable.label,
        "requiresValue": variable.requires_value,
        "showOnReleaseStart": variable.show_on_start,
    });
    if !variable.value.is_null() {
        body["value"] = variable.value.clone();
    }
    if variable.kind == VariableKind::ListBox && !variable.possible_values.is_empty() {
        body["valueProvider"] = json!({
            "@type": "xlrelease.ListOfStringValueProviderConfiguration",
            "values": variable.possible_values,
        });
    }
    Ok(body)
}

fn task_body(task: &TaskPayload) -> Value {
    let mut body: Map<String, Value> = task.properties.clone();
    body.insert("id".into(), Value::Null);
    body.insert("type".into(), json!(task.task_type));
    body.insert("title".into(), json!(task.title));
    if let Some(precondition) = &task.precondition {
        body.insert("precondition".into(), json!(precondition));
    }
    Value::Object(body)
}

/// Release orchestrator client over HTTP basic auth.
pub struct HttpClient {
    client: Client,
    base_url: String,
    ui_url: String,
    username: String,
    password: String,
}

impl HttpClient {
    pub fn new(settings: &Settings) -> Result<Self> {
        if settings.api_url.trim().is_empty() {
            return Err(Error::config_missing_field("api_url", Some("settings".into())));
        }

        let client = Client::builder()
            .timeout(settings.request_timeout())
            .build()
            .map_err(|e| Error::internal_io(e.to_string(), Some("build HTTP client".into())))?;

        let base_url = format!("{}/", settings.api_url.trim_end_matches('/'));
        let ui_url = settings.ui_url.clone().unwrap_or_else(|| {
            base_url
                .trim_end_matches('/')
                .trim_end_matches("/api/v1")
                .to_string()
        });

        Ok(Self {
            client,
            base_url,
            ui_url,
            username: settings.username.clone(),
            password: settings.password.clone(),
        })
    }

    async fn request(
        &self,
        method: Method,
        endpoint: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
    ) -> Result<Value> {
        let url = format!("{}{}", self.base_url, endpoint);
        let mut request = self.client.request(method, &url);
        if !query.is_empty() {
            request = request.query(query);
        }
        if !self.username.is_empty() {
            request = request.basic_auth(&self.username, Some(&self.password));
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| http_error(endpoint, e))?;
        parse_json_response(endpoint, response).await
    }

    async fn get(&self, endpoint: &str, query: &[(&str, &str)]) -> Result<Value> {
        self.request(Method::GET, endpoint, query, None).await
    }

    async fn post(&self, endpoint: &str, query: &[(&str, &str)], body: &Value) -> Result<Value> {
        self.request(Method::POST, endpoint, query, Some(body)).await
    }

    async fn delete(&self, endpoint: &str) -> Result<Value> {
        self.request(Method::DELETE, endpoint, &[], None).await
    }

    async fn folder_id(&self, folder_path: &str) -> Result<String> {
        let endpoint = "folders/find";
        let folder = self.get(endpoint, &[("byPath", folder_path)]).await?;
        id_of(endpoint, &folder)
    }
}

#[async_trait]
impl TemplateApi for HttpClient {
    async fn find_templates_by_name(&self, name: &str) -> Result<Vec<TemplateRef>> {
        let found = self.get("templates", &[("title", name)]).await?;
        let entries = found.as_array().cloned().unwrap_or_default();
        Ok(entries
            .iter()
            .filter_map(|entry| {
                let id = entry.get("id")?.as_str()?;
                let title = entry.get("title")?.as_str()?;
                Some(TemplateRef {
                    id: id.to_string(),
                    title: title.to_string(),
                })
            })
            .filter(|template| template.title == name)
            .collect())
    }

    async fn delete_template(&self, id: &str) -> Result<()> {
        self.delete(&format!("templates/{}", id)).await.map(|_| ())
    }

    async fn create_template(&self, folder_path: &str, name: &str) -> Result<CreatedTemplate> {
        let folder = self.folder_id(folder_path).await?;
        let endpoint = "templates/";
        let created = self
            .post(
                endpoint,
                &[("folderId", folder.as_str())],
                &json!({
                    "id": Value::Null,
                    "type": "xlrelease.Release",
                    "title": name,
                    "status": "TEMPLATE",
                    "scheduledStartDate": chrono::Utc::now().to_rfc3339(),
                }),
            )
            .await?;

        let default_phase_ids = created
            .get("phases")
            .and_then(Value::as_array)
            .map(|phases| {
                phases
                    .iter()
                    .filter_map(|p| p.get("id").and_then(Value::as_str).map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        Ok(CreatedTemplate {
            id: id_of(endpoint, &created)?,
            default_phase_ids,
        })
    }
}

#[async_trait]
impl PhaseApi for HttpClient {
    async fn create_phase(
        &self,
        template_id: &str,
        title: &str,
        position: Option<usize>,
    ) -> Result<String> {
        let endpoint = format!("phases/{}/phase", template_id);
        let position = position.map(|p| p.to_string());
        let query: Vec<(&str, &str)> = position
            .as_deref()
            .map(|p| vec![("position", p)])
            .unwrap_or_default();
        let created = self
            .post(&endpoint, &query, &json!({ "type": "xlrelease.Phase", "title": title }))
            .await?;
        id_of(&endpoint, &created)
    }

    async fn delete_phase(&self, id: &str) -> Result<()> {
        self.delete(&format!("phases/{}", id)).await.map(|_| ())
    }
}

#[async_trait]
impl TaskApi for HttpClient {
    async fn create_task(&self, phase_id: &str, task: &TaskPayload) -> Result<String> {
        let endpoint = format!("tasks/{}/tasks", phase_id);
        let created = self.post(&endpoint, &[], &task_body(task)).await?;
        id_of(&endpoint, &created)
    }

    async fn create_gate(&self, phase_id: &str, title: &str) -> Result<String> {
        let endpoint = format!("tasks/{}/tasks", phase_id);
        let gate = self
            .post(
                &endpoint,
                &[],
                &json!({ "id": Value::Null, "type": "xlrelease.GateTask", "title": title }),
            )
            .await?;
        id_of(&endpoint, &gate)
    }

    async fn add_gate_condition(&self, gate_id: &str, title: &str) -> Result<()> {
        self.post(
            &format!("tasks/{}/conditions", gate_id),
            &[],
            &json!({ "title": title, "checked": false }),
        )
        .await
        .map(|_| ())
    }

    async fn create_script_task(&self, phase_id: &str, title: &str, body: &str) -> Result<String> {
        let endpoint = format!("tasks/{}/tasks", phase_id);
        let created = self
            .post(
                &endpoint,
                &[],
                &json!({
                    "id": Value::Null,
                    "type": "xlrelease.ScriptTask",
                    "title": title,
                    "script": body,
                }),
            )
            .await?;
        id_of(&endpoint, &created)
    }
}

#[async_trait]
impl VariableApi for HttpClient {
    async fn create_variable(&self, template_id: &str, variable: &VariableSpec) -> Result<String> {
        let endpoint = format!("templates/{}/variables", template_id);
        let created = self.post(&endpoint, &[], &variable_body(variable)?).await?;
        id_of(&endpoint, &created)
    }
}

impl ReleaseApi for HttpClient {
    fn template_url(&self, template_id: &str) -> String {
        super::template_url(&self.ui_url, template_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(is_transient_status(503));
        assert!(is_transient_status(429));
        assert!(!is_transient_status(404));
        assert!(api_error("templates", 502, "").is_retryable());
        assert!(!api_error("templates", 409, "exists").is_retryable());
        assert_eq!(api_error("templates", 400, "").code.as_str(), "remote.permanent");
    }

    #[test]
    fn list_variables_carry_value_provider() {
        let spec = VariableSpec {
            key: "env_UAT".into(),
            kind: VariableKind::ListBox,
            label: "UAT environment".into(),
            value: json!("UAT1"),
            requires_value: true,
            show_on_start: true,
            possible_values: vec!["UAT1".into(), "UAT2".into()],
        };
        let body = variable_body(&spec).unwrap();
        assert_eq!(body["type"], "xlrelease.ListStringVariable");
        assert_eq!(body["showOnReleaseStart"], true);
        assert_eq!(body["valueProvider"]["values"][1], "UAT2");
    }

    #[test]
    fn task_body_merges_properties() {
        let mut properties = Map::new();
        properties.insert("script".into(), json!("echo ok"));
        let body = task_body(&TaskPayload {
            title: "Smoke".into(),
            task_type: "remoteScript.Unix".into(),
            properties,
            precondition: Some("True".into()),
        });
        assert_eq!(body["type"], "remoteScript.Unix");
        assert_eq!(body["script"], "echo ok");
        assert_eq!(body["precondition"], "True");
    }

    #[test]
    fn ui_url_defaults_to_api_host() {
        let settings = Settings {
            api_url: "https://xlr.example.org/api/v1".into(),
            ..Settings::default()
        };
        let client = HttpClient::new(&settings).unwrap();
        assert_eq!(
            client.template_url("Applications/Folder1/Release7"),
            "https://xlr.example.org/#/templates/Folder1-Release7"
        );
    }
}
