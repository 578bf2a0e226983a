//! # Engine Configuration
//!
//! Persisted at `<runtime_dir>/config.json`. Every field has a default so a
//! partial or missing file still yields a usable configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::state::io::{get_runtime_path, load_or_default, write_json};

/// Retry and quality policy of the execution pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub max_attempts: u32,
    /// Linear backoff unit: attempt `n` waits `n * base_delay_ms`
    pub base_delay_ms: u64,
    /// Instructions longer than this many chars are truncated
    pub truncate_threshold: usize,
    /// Minimum critic score for an attempt to pass
    pub critic_threshold: u8,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            truncate_threshold: 12_000,
            critic_threshold: 80,
        }
    }
}

impl PipelineConfig {
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.base_delay_ms.saturating_mul(attempt as u64))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub max_entries: usize,
    pub cleanup_interval_secs: u64,
    /// Write long-lived namespaces to `<runtime_dir>/cache.json`
    pub persist: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 500,
            cleanup_interval_secs: 300,
            persist: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub max_recovery_attempts: u32,
    /// Handler that receives diagnostic tasks when a run fails
    pub debug_handler: String,
    /// Output phrases that end a sequential swarm early
    pub completion_markers: Vec<String>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_recovery_attempts: 3,
            debug_handler: "debugger".to_string(),
            completion_markers: vec![
                "task complete".to_string(),
                "implementation finished".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Glob patterns added to the built-in critical-file list
    pub extra_critical_globs: Vec<String>,
}

/// Top-level configuration for one engine instance
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub pipeline: PipelineConfig,
    pub cache: CacheConfig,
    pub coordinator: CoordinatorConfig,
    pub risk: RiskConfig,
}

impl EngineConfig {
    /// Load `<runtime_dir>/config.json`, then apply environment overrides
    pub fn load() -> Self {
        Self::load_from(&get_runtime_path().join("config.json"))
    }

    pub fn load_from(path: &Path) -> Self {
        let mut config: Self = load_or_default(path).into_inner();
        config.apply_env();
        config
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        write_json(path, self)
    }

    fn apply_env(&mut self) {
        if let Ok(raw) = std::env::var("CONDUCTOR_MAX_ATTEMPTS") {
            match raw.parse::<u32>() {
                Ok(n) if n > 0 => self.pipeline.max_attempts = n,
                _ => tracing::warn!(value = %raw, "Ignoring invalid CONDUCTOR_MAX_ATTEMPTS"),
            }
        }
    }
}
