use std::io;

use crate::config::ConfigError;

/// Error type for worker pool operations.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// The pool is stopping or stopped; the task was not queued.
    #[error("worker pool is shutting down; task rejected")]
    Stopped,
    /// The queue lock was poisoned.
    #[error("worker pool lock poisoned during {0}")]
    Poisoned(&'static str),
    /// The OS refused to start a worker thread.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] io::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
}
