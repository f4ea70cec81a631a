//! Engine configuration: defaults, an optional YAML file and environment overrides.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const ENV_LOCK_TIMEOUT_MS: &str = "PROCFLOW_LOCK_TIMEOUT_MS";
pub const ENV_MAX_STEPS: &str = "PROCFLOW_MAX_STEPS";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How long an operation waits for an instance lock before `InstanceBusy`.
    pub lock_timeout_ms: u64,
    /// Token moves allowed in one run before it is rolled back.
    pub max_steps_per_run: usize,
    /// Append `RuntimeEvent`s to the store.
    pub record_events: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 5_000,
            max_steps_per_run: 10_000,
            record_events: true,
        }
    }
}

impl EngineConfig {
    /// Load from a YAML file; missing fields take their defaults.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
        Self::from_yaml(&content).with_context(|| format!("Parsing {}", path.display()))
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Apply `PROCFLOW_*` overrides from the process environment.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(raw) = lookup(ENV_LOCK_TIMEOUT_MS) {
            self.lock_timeout_ms = raw
                .trim()
                .parse()
                .with_context(|| format!("{ENV_LOCK_TIMEOUT_MS}={raw}"))?;
        }
        if let Some(raw) = lookup(ENV_MAX_STEPS) {
            self.max_steps_per_run = raw
                .trim()
                .parse()
                .with_context(|| format!("{ENV_MAX_STEPS}={raw}"))?;
        }
        Ok(self)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}
