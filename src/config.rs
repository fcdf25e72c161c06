//! Runtime configuration.
//!
//! Merge priority (high → low):
//!
//! 1. Environment variables (`WEFT_WORKERS`, `WEFT_IDLE_TIMEOUT_MS`,
//!    `WEFT_ENABLE_STATS`)
//! 2. Config file (JSON)
//! 3. Default values

use std::path::Path;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Number of pooled worker threads.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Idle timeout for worker queue polling, in milliseconds.
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    /// Statistics collection enabled.
    #[serde(default)]
    pub enable_stats: bool,
}

fn default_workers() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn default_idle_timeout_ms() -> u64 {
    10
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            idle_timeout_ms: default_idle_timeout_ms(),
            enable_stats: false,
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file, then apply environment
    /// overrides on top.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.with_env_overrides()
    }

    /// Default configuration with environment overrides applied.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_overrides()
    }

    /// Apply `WEFT_*` environment variable overrides.
    pub fn with_env_overrides(mut self) -> Result<Self, ConfigError> {
        if let Some(v) = env_parse::<usize>("WEFT_WORKERS")? {
            self.workers = v;
        }
        if let Some(v) = env_parse::<u64>("WEFT_IDLE_TIMEOUT_MS")? {
            self.idle_timeout_ms = v;
        }
        if let Some(v) = env_parse::<bool>("WEFT_ENABLE_STATS")? {
            self.enable_stats = v;
        }
        Ok(self)
    }

    /// Idle timeout as a [`Duration`].
    #[inline]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// Number of pooled workers, always at least one.
    #[inline]
    pub fn effective_workers(&self) -> usize {
        self.workers.max(1)
    }
}

fn env_parse<T: std::str::FromStr>(var: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(var) {
        Ok(value) => value
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv {
                var: var.to_string(),
                value,
            }),
        Err(_) => Ok(None),
    }
}
