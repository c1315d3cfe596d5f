//! Exponential backoff for transient Release API failures.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use super::{CreatedTemplate, PhaseApi, ReleaseApi, TaskApi, TemplateApi, TemplateRef, VariableApi};
use crate::config::RetrySettings;
use crate::error::Result;
use crate::plan::{TaskPayload, VariableSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&RetrySettings::default())
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            initial_delay: Duration::from_millis(settings.initial_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
        }
    }

    /// Single attempt, no backoff.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay after the given failed attempt, counting from zero.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Runs `call` until it succeeds, fails permanently, or attempts run out.
    pub async fn run<T, F, Fut>(&self, label: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt + 1 < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    attempt += 1;
                    log_status!(
                        "retry",
                        "{} failed (attempt {}/{}), retrying in {}ms: {}",
                        label,
                        attempt,
                        self.max_attempts,
                        delay.as_millis(),
                        err.message
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    return Err(err.with_detail("attempts", attempt + 1));
                }
            }
        }
    }
}

/// Applies a [`RetryPolicy`] to every call of the wrapped client.
pub struct RetryingClient<C> {
    inner: C,
    policy: RetryPolicy,
}

impl<C> RetryingClient<C> {
    pub fn new(inner: C, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }
}

#[async_trait]
impl<C: TemplateApi> TemplateApi for RetryingClient<C> {
    async fn find_templates_by_name(&self, name: &str) -> Result<Vec<TemplateRef>> {
        let inner = &self.inner;
        self.policy
            .run("find templates", move || inner.find_templates_by_name(name))
            .await
    }

    async fn delete_template(&self, id: &str) -> Result<()> {
        let inner = &self.inner;
        self.policy
            .run("delete template", move || inner.delete_template(id))
            .await
    }

    async fn create_template(&self, folder_path: &str, name: &str) -> Result<CreatedTemplate> {
        let inner = &self.inner;
        self.policy
            .run("create template", move || inner.create_template(folder_path, name))
            .await
    }
}

#[async_trait]
impl<C: PhaseApi> PhaseApi for RetryingClient<C> {
    async fn create_phase(
        &self,
        template_id: &str,
        title: &str,
        position: Option<usize>,
    ) -> Result<String> {
        let inner = &self.inner;
        self.policy
            .run("create phase", move || {
                inner.create_phase(template_id, title, position)
            })
            .await
    }

    async fn delete_phase(&self, id: &str) -> Result<()> {
        let inner = &self.inner;
        self.policy
            .run("delete phase", move || inner.delete_phase(id))
            .await
    }
}

#[async_trait]
impl<C: TaskApi> TaskApi for RetryingClient<C> {
    async fn create_task(&self, phase_id: &str, task: &TaskPayload) -> Result<String> {
        let inner = &self.inner;
        self.policy
            .run("create task", move || inner.create_task(phase_id, task))
            .await
    }

    async fn create_gate(&self, phase_id: &str, title: &str) -> Result<String> {
        let inner = &self.inner;
        self.policy
            .run("create gate", move || inner.create_gate(phase_id, title))
            .await
    }

    async fn add_gate_condition(&self, gate_id: &str, title: &str) -> Result<()> {
        let inner = &self.inner;
        self.policy
            .run("add gate condition", move || {
                inner.add_gate_condition(gate_id, title)
            })
            .await
    }

    async fn create_script_task(&self, phase_id: &str, title: &str, body: &str) -> Result<String> {
        let inner = &self.inner;
        self.policy
            .run("create script", move || {
                inner.create_script_task(phase_id, title, body)
            })
            .await
    }
}

#[async_trait]
impl<C: VariableApi> VariableApi for RetryingClient<C> {
    async fn create_variable(&self, template_id: &str, variable: &VariableSpec) -> Result<String> {
        let inner = &self.inner;
        self.policy
            .run("create variable", move || {
                inner.create_variable(template_id, variable)
            })
            .await
    }
}

impl<C: ReleaseApi> ReleaseApi for RetryingClient<C> {
    fn template_url(&self, template_id: &str) -> String {
        self.inner.template_url(template_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    #[test]
    fn delay_doubles_up_to_the_cap() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_millis(500));
        assert_eq!(policy.delay_for(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(4), Duration::from_millis(8000));
        assert_eq!(policy.delay_for(40), Duration::from_millis(8000));
    }

    #[tokio::test]
    async fn transient_errors_are_retried_until_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = fast(4)
            .run("lookup", move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(Error::remote_transient("lookup", Some(503), "busy"))
                } else {
                    Ok(7)
                }
            })
            .await
            .unwrap();
        assert_eq!(result, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let err = fast(4)
            .run("lookup", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(Error::remote_permanent("lookup", Some(400), "bad"))
            })
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(err.details["attempts"], 1);
    }

    #[tokio::test]
    async fn attempts_are_capped() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let err = fast(3)
            .run("lookup", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(Error::remote_transient("lookup", None, "timeout"))
            })
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(err.code.as_str(), "remote.transient");
    }
}
