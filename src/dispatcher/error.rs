use std::io;

use super::EventKind;
use crate::config::ConfigError;
use crate::pool::PoolError;

/// Error returned by dispatcher operations.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The dispatcher is stopping or stopped; the event was not queued.
    #[error("dispatcher is shutting down; event rejected")]
    Stopped,
    /// The configured `max_pending` bound was reached.
    #[error("dispatcher queue is full ({limit} pending)")]
    QueueFull { limit: usize },
    #[error("dispatcher lock poisoned during {0}")]
    Poisoned(&'static str),
    /// The OS refused to start the drain thread.
    #[error("failed to spawn drain thread: {0}")]
    Spawn(#[source] io::Error),
    /// The worker pool would not accept the drain loop.
    #[error("worker pool cannot host the drain loop: {0}")]
    PoolUnavailable(#[source] PoolError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Failure of a single handler invocation.
///
/// Faults are logged and counted by the drain loop; they never stop it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandlerFault {
    /// The handler expected a different payload type than was published.
    #[error("{kind}: handler expects {expected} but payload is {found}")]
    TypeMismatch {
        kind: EventKind,
        expected: &'static str,
        found: &'static str,
    },
    /// A fallible handler returned an error.
    #[error("{kind}: handler failed: {message}")]
    Failed { kind: EventKind, message: String },
}
