//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing.
//! Sensitive values wrapped in secrecy::SecretString to prevent log leaks.
//! Operational tuning (eviction thresholds, queue capacities, default
//! budgets) comes from an optional TOML file pointed at by
//! `DRAFTSMITH_TUNING`; these are deliberately configuration, not constants.

use crate::error::{Error, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug)]
pub struct Config {
    pub anthropic_api_key: SecretString,
    pub bind_addr: String,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    pub tuning: Tuning,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    /// In production, systemd EnvironmentFile provides the vars.
    pub fn from_env() -> Result<Self> {
        let tuning = match std::env::var("DRAFTSMITH_TUNING") {
            Ok(path) => Tuning::from_file(&path)?,
            Err(_) => Tuning::default(),
        };

        Ok(Self {
            anthropic_api_key: SecretString::from(required_var("ANTHROPIC_API_KEY")?),
            bind_addr: std::env::var("DRAFTSMITH_BIND_ADDR")
                .unwrap_or_else(|_| "127.0.0.1:8600".to_string()),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            tuning,
        })
    }
}

/// Operational knobs with sensible defaults.
///
/// The heartbeat threshold and per-observer queue capacity govern how
/// aggressively misbehaving observers are evicted; the default budgets
/// apply to tasks whose create request leaves limits unset.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Tuning {
    /// Seconds without a heartbeat before an observer is evicted.
    pub heartbeat_max_idle_secs: u64,
    /// How often the gateway scans for stale observers.
    pub eviction_interval_secs: u64,
    /// Capacity of each observer's bounded outbound queue.
    pub observer_queue_capacity: usize,
    /// Default per-task token budget.
    pub default_max_tokens: u64,
    /// Default per-task spend budget.
    pub default_max_cost_usd: f64,
    /// Default hard deadline for a task.
    pub default_time_limit_secs: u64,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            heartbeat_max_idle_secs: 300,
            eviction_interval_secs: 60,
            observer_queue_capacity: 256,
            default_max_tokens: 100_000,
            default_max_cost_usd: 5.0,
            default_time_limit_secs: 1800,
        }
    }
}

impl Tuning {
    /// Load tuning from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read tuning file {}: {e}", path.display())))?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("bad tuning file {}: {e}", path.display())))
    }

    pub fn heartbeat_max_idle(&self) -> Duration {
        Duration::from_secs(self.heartbeat_max_idle_secs)
    }

    pub fn eviction_interval(&self) -> Duration {
        Duration::from_secs(self.eviction_interval_secs)
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}
