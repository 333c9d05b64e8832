//! Configuration for the worker pool and the dispatcher.
//!
//! Both configs deserialize from JSON with every field optional, and expose
//! `with_*` builders for programmatic use:
//!
//! ```
//! use pooled_bus::{DispatcherConfig, PoolConfig};
//!
//! let pool = PoolConfig::from_json(r#"{ "workers": 4 }"#).unwrap();
//! assert_eq!(pool.workers, 4);
//! assert_eq!(pool.name, "worker");
//!
//! let dispatcher = DispatcherConfig::default()
//!     .with_name("orders")
//!     .with_max_pending(1024);
//! assert_eq!(dispatcher.max_pending, Some(1024));
//! ```

use serde::{Deserialize, Serialize};

/// Error raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("worker pool needs at least one worker")]
    ZeroWorkers,
    #[error("max_pending must be greater than zero when set")]
    ZeroCapacity,
    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Worker pool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Thread name prefix; workers are named `{name}-{index}`.
    pub name: String,
    /// Number of worker threads.
    pub workers: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            name: "worker".to_string(),
            workers: num_cpus::get().max(1),
        }
    }
}

impl PoolConfig {
    /// Config with an explicit worker count and the default name.
    pub fn new(workers: usize) -> Self {
        Self {
            workers,
            ..Self::default()
        }
    }

    /// Parse a JSON document. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Set the thread name prefix.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the number of workers.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        Ok(())
    }
}

/// Dispatcher configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Name of the dedicated drain thread (unused when hosted on a pool,
    /// apart from logging).
    pub name: String,
    /// Upper bound on queued envelopes. `None` means unbounded.
    pub max_pending: Option<usize>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            name: "dispatcher".to_string(),
            max_pending: None,
        }
    }
}

impl DispatcherConfig {
    /// Parse a JSON document. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Set the drain thread name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Bound the queue; publishes beyond the bound are rejected.
    pub fn with_max_pending(mut self, limit: usize) -> Self {
        self.max_pending = Some(limit);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_pending == Some(0) {
            return Err(ConfigError::ZeroCapacity);
        }
        Ok(())
    }
}
