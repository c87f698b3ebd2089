//! Configuration loading from TOML with environment variable overrides.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs. Every
//! field has a default, so a missing file or section is not an error. The
//! agent token is referenced by env-var name and resolved at runtime.

use anyhow::{Context, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use crate::engine::context::RetryPolicy;
use crate::engine::heartbeat::HeartbeatConfig;
use crate::gateway::http::DEFAULT_BASE_URL;
use crate::storage::DEFAULT_JOURNAL_FILE;
use crate::strategy::guardrail::SafetyConfig;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub agent: AgentConfig,
    pub heartbeat: HeartbeatConfig,
    pub safety: SafetyConfig,
    pub retry: RetryPolicy,
    pub dashboard: DashboardConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AgentConfig {
    pub name: String,
    pub api_base: String,
    /// Name of the env var holding the agent token.
    pub token_env: String,
    pub request_timeout_secs: u64,
    pub journal_path: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "market-predictor".to_string(),
            api_base: DEFAULT_BASE_URL.to_string(),
            token_env: "CLAWDPREDICT_AGENT_TOKEN".to_string(),
            request_timeout_secs: 30,
            journal_path: DEFAULT_JOURNAL_FILE.to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DashboardConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 8080,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file, falling back to defaults when
    /// the file does not exist, then apply environment overrides.
    pub fn load(path: &str) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {path}"))?;
            Self::from_toml(&contents)
                .with_context(|| format!("Failed to parse config file: {path}"))?
        } else {
            info!(path, "No config file found, using defaults");
            Self::default()
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Apply the recognised environment overrides. Unparseable values are
    /// ignored with a warning.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("PREDICTION_DRY_RUN") {
            match parse_bool(&v) {
                Some(b) => {
                    self.safety.dry_run_mode = b;
                    if b {
                        info!("Dry run mode enabled via environment");
                    }
                }
                None => warn!(value = %v, "Ignoring invalid PREDICTION_DRY_RUN"),
            }
        }
        if let Some(v) = lookup("MIN_CONFIDENCE_THRESHOLD") {
            match v.trim().parse::<f64>() {
                Ok(t) => self.safety.min_confidence_threshold = t,
                Err(_) => warn!(value = %v, "Ignoring invalid MIN_CONFIDENCE_THRESHOLD"),
            }
        }
        if let Some(v) = lookup("HEARTBEAT_INTERVAL_MINUTES") {
            match v.trim().parse::<u64>() {
                Ok(m) => self.heartbeat.interval_minutes = m,
                Err(_) => warn!(value = %v, "Ignoring invalid HEARTBEAT_INTERVAL_MINUTES"),
            }
        }
        if let Some(v) = lookup("HEARTBEAT_CATEGORIES") {
            self.heartbeat.categories = v
                .split(',')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(v) = lookup("MIN_EDGE") {
            match v.trim().parse::<f64>() {
                Ok(e) => self.heartbeat.min_edge = e,
                Err(_) => warn!(value = %v, "Ignoring invalid MIN_EDGE"),
            }
        }
        if let Some(v) = lookup("AUTO_PREDICT") {
            match parse_bool(&v) {
                Some(b) => self.heartbeat.auto_predict = b,
                None => warn!(value = %v, "Ignoring invalid AUTO_PREDICT"),
            }
        }
        if let Some(v) = lookup("CLAWDPREDICT_API_BASE") {
            if !v.trim().is_empty() {
                self.agent.api_base = v.trim().to_string();
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.safety.validate().context("Invalid [safety] section")?;
        self.heartbeat.validate().context("Invalid [heartbeat] section")?;
        self.retry.validate().context("Invalid [retry] section")?;
        if self.agent.request_timeout_secs == 0 {
            anyhow::bail!("agent.request_timeout_secs must be positive");
        }
        Ok(())
    }

    /// The agent token, if its env var is set.
    pub fn agent_token(&self) -> Option<SecretString> {
        std::env::var(&self.agent.token_env)
            .ok()
            .filter(|t| !t.trim().is_empty())
            .map(SecretString::new)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
