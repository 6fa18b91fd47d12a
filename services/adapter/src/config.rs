//! Adapter configuration
//!
//! Policy constants (queue wait window, health-check thresholds, worker
//! count) live here rather than in the components so they can be tuned
//! per deployment. Every section has a `Default` matching the values the
//! feed adapter has historically run with.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Configuration for the priority work queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Longest a consumer waits on empty lanes before re-checking cancellation.
    pub max_blocking_wait_ms: u64,
}

impl QueueConfig {
    pub fn max_blocking_wait(&self) -> Duration {
        Duration::from_millis(self.max_blocking_wait_ms)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_blocking_wait_ms: 20_000,
        }
    }
}

/// Configuration for individual stream listeners.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Push a `suspend` downstream before every snapshot resynchronisation,
    /// not only on abnormal disconnects.
    pub suspend_before_resync: bool,
}

/// Configuration for the periodic stream health check.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// How often every listener is checked.
    pub interval_ms: u64,
    /// How long a listener may lag behind the feed without receiving a
    /// message before it is resynchronised.
    pub max_delay_ms: u64,
}

impl HealthCheckConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval_ms: 60_000,
            max_delay_ms: 30_000,
        }
    }
}

/// Configuration for the worker pool draining the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub workers: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { workers: 4 }
    }
}

/// Root adapter configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    pub queue: QueueConfig,
    pub listener: ListenerConfig,
    pub health: HealthCheckConfig,
    pub worker: WorkerConfig,
}

impl AdapterConfig {
    /// Parse and validate configuration from a JSON document.
    ///
    /// Missing sections and fields fall back to their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: AdapterConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue.max_blocking_wait_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "queue.max_blocking_wait_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.health.interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "health.interval_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.worker.workers == 0 {
            return Err(ConfigError::Invalid {
                field: "worker.workers",
                reason: "at least one worker is required".to_string(),
            });
        }
        Ok(())
    }
}
