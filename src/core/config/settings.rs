//! Runtime settings for talking to the release orchestrator.
//!
//! Read from `~/.config/release-forge/settings.toml` when present, then
//! overridden from `RELEASE_FORGE_*` environment variables.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

pub const DEFAULT_SETTINGS_PATH: &str = "~/.config/release-forge/settings.toml";
const MAX_FAN_OUT: usize = 32;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_api_url")]
    pub api_url: String,

    #[serde(default)]
    pub username: String,

    #[serde(default, skip_serializing)]
    pub password: String,

    /// Public UI root used to build template links. Falls back to the API host.
    #[serde(default)]
    pub ui_url: Option<String>,

    #[serde(default = "default_fan_out")]
    pub fan_out: usize,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub variants: Vec<VariantRuleConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

/// Application-variant rule as written in the settings file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantRuleConfig {
    pub name: String,
    pub pattern: String,
    #[serde(default)]
    pub script: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            username: String::new(),
            password: String::new(),
            ui_url: None,
            fan_out: default_fan_out(),
            request_timeout_secs: default_request_timeout_secs(),
            retry: RetrySettings::default(),
            variants: Vec::new(),
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_api_url() -> String {
    "http://localhost:5516/api/v1/".to_string()
}

fn default_fan_out() -> usize {
    8
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    4
}

fn default_initial_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    8_000
}

impl Settings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn effective_fan_out(&self) -> usize {
        self.fan_out.clamp(1, MAX_FAN_OUT)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| Error::settings_invalid_toml("settings.toml", e.to_string()))
    }

    /// Loads settings from an explicit path, or the default path when it exists.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(p) => (super::loader::expand_path(p), true),
            None => (
                PathBuf::from(shellexpand::tilde(DEFAULT_SETTINGS_PATH).into_owned()),
                false,
            ),
        };

        let mut settings = if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|e| {
                Error::internal_io(e.to_string(), Some(format!("read {}", path.display())))
            })?;
            Self::parse(&content).map_err(|e| e.with_detail("path", path.display().to_string()))?
        } else if explicit {
            return Err(Error::config_not_found(path.display().to_string()));
        } else {
            Self::default()
        };

        settings.apply_env(|key| std::env::var(key).ok())?;
        Ok(settings)
    }

    /// Applies `RELEASE_FORGE_*` overrides through the given lookup.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("RELEASE_FORGE_API_URL") {
            self.api_url = url;
        }
        if let Some(user) = lookup("RELEASE_FORGE_USERNAME") {
            self.username = user;
        }
        if let Some(password) = lookup("RELEASE_FORGE_PASSWORD") {
            self.password = password;
        }
        if let Some(raw) = lookup("RELEASE_FORGE_FAN_OUT") {
            self.fan_out = raw.trim().parse().map_err(|_| {
                Error::config_invalid_enum("RELEASE_FORGE_FAN_OUT", raw.clone(), &["1..=32"])
            })?;
        }
        Ok(())
    }
}
