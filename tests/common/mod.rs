#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use release_forge::api::{
    CreatedTemplate, PhaseApi, ReleaseApi, TaskApi, TemplateApi, TemplateRef, VariableApi,
};
use release_forge::config::loader::parse_yaml;
use release_forge::config::ReleaseConfig;
use release_forge::plan::{TaskPayload, VariableSpec};
use release_forge::{Error, Result};

pub const TEMPLATE_ID: &str = "Applications/Folder1/Release1";

pub fn descriptor(yaml: &str) -> ReleaseConfig {
    parse_yaml(yaml).expect("descriptor parses")
}

#[derive(Debug, Clone)]
pub struct Call {
    pub method: &'static str,
    pub target: String,
    pub started: Instant,
    pub finished: Instant,
}

/// In-memory orchestrator that records every call.
#[derive(Default)]
pub struct FakeApi {
    calls: Mutex<Vec<Call>>,
    existing: Mutex<Vec<TemplateRef>>,
    failing: HashSet<String>,
    transient_failures: Mutex<HashMap<String, usize>>,
    delay: Duration,
    next_id: AtomicUsize,
}

impl FakeApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_existing(self, ids: &[&str]) -> Self {
        *self.existing.lock().unwrap() = ids
            .iter()
            .map(|id| TemplateRef {
                id: id.to_string(),
                title: "R".into(),
            })
            .collect();
        self
    }

    /// Every call targeting `title` fails permanently.
    pub fn failing(mut self, title: &str) -> Self {
        self.failing.insert(title.to_string());
        self
    }

    /// The first `times` calls targeting `title` fail with a transient error.
    pub fn flaky(self, title: &str, times: usize) -> Self {
        self.transient_failures
            .lock()
            .unwrap()
            .insert(title.to_string(), times);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn methods(&self) -> Vec<&'static str> {
        self.calls().into_iter().map(|c| c.method).collect()
    }

    pub fn targets(&self, method: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.method == method)
            .map(|c| c.target)
            .collect()
    }

    async fn call(&self, method: &'static str, target: &str) -> Result<String> {
        let started = Instant::now();
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.calls.lock().unwrap().push(Call {
            method,
            target: target.to_string(),
            started,
            finished: Instant::now(),
        });

        {
            let mut flaky = self.transient_failures.lock().unwrap();
            if let Some(left) = flaky.get_mut(target) {
                if *left > 0 {
                    *left -= 1;
                    return Err(Error::remote_transient(method, Some(503), "unavailable"));
                }
            }
        }
        if self.failing.contains(target) {
            return Err(Error::remote_permanent(method, Some(400), "rejected"));
        }

        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(format!("{}/Item{}", TEMPLATE_ID, n))
    }
}

#[async_trait]
impl TemplateApi for FakeApi {
    async fn find_templates_by_name(&self, name: &str) -> Result<Vec<TemplateRef>> {
        self.call("find_templates", name).await?;
        Ok(self.existing.lock().unwrap().clone())
    }

    async fn delete_template(&self, id: &str) -> Result<()> {
        self.call("delete_template", id).await.map(|_| ())
    }

    async fn create_template(&self, _folder_path: &str, name: &str) -> Result<CreatedTemplate> {
        self.call("create_template", name).await?;
        Ok(CreatedTemplate {
            id: TEMPLATE_ID.to_string(),
            default_phase_ids: vec![format!("{}/Phase0", TEMPLATE_ID)],
        })
    }
}

#[async_trait]
impl PhaseApi for FakeApi {
    async fn create_phase(
        &self,
        _template_id: &str,
        title: &str,
        _position: Option<usize>,
    ) -> Result<String> {
        self.call("create_phase", title).await
    }

    async fn delete_phase(&self, id: &str) -> Result<()> {
        self.call("delete_phase", id).await.map(|_| ())
    }
}

#[async_trait]
impl TaskApi for FakeApi {
    async fn create_task(&self, _phase_id: &str, task: &TaskPayload) -> Result<String> {
        self.call("create_task", &task.title).await
    }

    async fn create_gate(&self, _phase_id: &str, title: &str) -> Result<String> {
        self.call("create_gate", title).await
    }

    async fn add_gate_condition(&self, _gate_id: &str, title: &str) -> Result<()> {
        self.call("add_gate_condition", title).await.map(|_| ())
    }

    async fn create_script_task(&self, _phase_id: &str, title: &str, _body: &str) -> Result<String> {
        self.call("create_script", title).await
    }
}

#[async_trait]
impl VariableApi for FakeApi {
    async fn create_variable(&self, _template_id: &str, variable: &VariableSpec) -> Result<String> {
        self.call("create_variable", &variable.key).await
    }
}

impl ReleaseApi for FakeApi {
    fn template_url(&self, template_id: &str) -> String {
        release_forge::api::template_url("http://release.test", template_id)
    }
}
