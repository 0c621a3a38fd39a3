//! Engine configuration.
//!
//! Defaults can be overridden from a YAML file, from environment variables,
//! or with the builder methods.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cluster::{DEFAULT_CLUSTER_ADDRESS, DEFAULT_WORKER_COUNT};
use crate::executor::{DEFAULT_PATCH_SIZE, DEFAULT_POOL_CAPACITY};

/// Errors that can occur while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    /// IO error while reading a config file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The config file is not valid YAML for this schema.
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Configuration for an [`Engine`](super::Engine).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// `host:port` of the cluster scheduler.
    pub cluster_address: String,
    /// Units in flight per batch run.
    pub patch_size: usize,
    /// Groups per dispatch and cluster worker slots.
    pub worker_count: usize,
    /// Blocking units running at once across the whole engine.
    pub thread_pool_capacity: usize,
    /// Per-unit deadline in seconds; none when absent or 0.
    pub task_timeout_secs: Option<u64>,
    /// How long shutdown waits for in-flight blocking units.
    pub shutdown_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cluster_address: DEFAULT_CLUSTER_ADDRESS.to_string(),
            patch_size: DEFAULT_PATCH_SIZE,
            worker_count: DEFAULT_WORKER_COUNT,
            thread_pool_capacity: DEFAULT_POOL_CAPACITY,
            task_timeout_secs: None,
            shutdown_timeout_secs: 30,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `FANOUT_CLUSTER_ADDRESS`: cluster address (default: localhost:9010)
    /// - `FANOUT_PATCH_SIZE`: units in flight per batch (default: 8)
    /// - `FANOUT_WORKER_COUNT`: groups per dispatch (default: 4)
    /// - `FANOUT_THREAD_POOL_CAPACITY`: blocking pool size (default: 32)
    /// - `FANOUT_TASK_TIMEOUT_SECS`: per-unit timeout (default: none)
    /// - `FANOUT_SHUTDOWN_TIMEOUT_SECS`: pool drain timeout (default: 30)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a variable does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().merge_env()
    }

    /// Loads a YAML file; missing keys keep their defaults.
    ///
    /// ```yaml
    /// cluster_address: "scheduler.internal:9010"
    /// patch_size: 16
    /// worker_count: 8
    /// task_timeout_secs: 30
    /// ```
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Io` or `ConfigError::Yaml` on unreadable input.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parses YAML configuration text.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Overrides fields with any `FANOUT_*` environment variables that are set.
    pub fn merge_env(mut self) -> Result<Self, ConfigError> {
        if let Ok(val) = std::env::var("FANOUT_CLUSTER_ADDRESS") {
            self.cluster_address = val;
        }

        if let Ok(val) = std::env::var("FANOUT_PATCH_SIZE") {
            self.patch_size = parse_env_value(&val, "FANOUT_PATCH_SIZE")?;
        }

        if let Ok(val) = std::env::var("FANOUT_WORKER_COUNT") {
            self.worker_count = parse_env_value(&val, "FANOUT_WORKER_COUNT")?;
        }

        if let Ok(val) = std::env::var("FANOUT_THREAD_POOL_CAPACITY") {
            self.thread_pool_capacity = parse_env_value(&val, "FANOUT_THREAD_POOL_CAPACITY")?;
        }

        if let Ok(val) = std::env::var("FANOUT_TASK_TIMEOUT_SECS") {
            self.task_timeout_secs = Some(parse_env_value(&val, "FANOUT_TASK_TIMEOUT_SECS")?);
        }

        if let Ok(val) = std::env::var("FANOUT_SHUTDOWN_TIMEOUT_SECS") {
            self.shutdown_timeout_secs = parse_env_value(&val, "FANOUT_SHUTDOWN_TIMEOUT_SECS")?;
        }

        Ok(self)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cluster_address.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "cluster_address cannot be empty".to_string(),
            ));
        }

        if self.patch_size == 0 {
            return Err(ConfigError::ValidationFailed(
                "patch_size must be greater than 0".to_string(),
            ));
        }

        if self.worker_count == 0 {
            return Err(ConfigError::ValidationFailed(
                "worker_count must be greater than 0".to_string(),
            ));
        }

        if self.thread_pool_capacity == 0 {
            return Err(ConfigError::ValidationFailed(
                "thread_pool_capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Per-unit deadline. A value of 0 means no deadline, same as absent.
    pub fn task_timeout(&self) -> Option<Duration> {
        self.task_timeout_secs
            .filter(|&secs| secs > 0)
            .map(Duration::from_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Builder method to set the cluster address.
    pub fn with_cluster_address(mut self, address: impl Into<String>) -> Self {
        self.cluster_address = address.into();
        self
    }

    /// Builder method to set the patch size.
    pub fn with_patch_size(mut self, patch_size: usize) -> Self {
        self.patch_size = patch_size;
        self
    }

    /// Builder method to set the worker count.
    pub fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    /// Builder method to set the blocking pool capacity.
    pub fn with_thread_pool_capacity(mut self, capacity: usize) -> Self {
        self.thread_pool_capacity = capacity;
        self
    }

    /// Builder method to set the per-unit timeout.
    pub fn with_task_timeout_secs(mut self, secs: u64) -> Self {
        self.task_timeout_secs = Some(secs);
        self
    }

    /// Builder method to set the shutdown timeout.
    pub fn with_shutdown_timeout_secs(mut self, secs: u64) -> Self {
        self.shutdown_timeout_secs = secs;
        self
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}
