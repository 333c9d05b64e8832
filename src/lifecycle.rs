use std::fmt;

use serde::Serialize;

/// Lifecycle shared by the dispatcher and the worker pool.
///
/// Transitions only move forward: `Running → Stopping → Stopped`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    /// Accepting new work; workers actively consuming.
    #[default]
    Running,
    /// Stop requested. No new work is accepted, queued work still drains.
    Stopping,
    /// Terminal. Every worker context has been joined.
    Stopped,
}

impl Lifecycle {
    pub fn is_running(self) -> bool {
        self == Lifecycle::Running
    }

    /// Whether new work may be queued in this state.
    pub fn accepts_work(self) -> bool {
        self.is_running()
    }

    /// Advance to `next`, ignoring attempts to move backwards.
    pub(crate) fn advance(&mut self, next: Lifecycle) -> bool {
        if next > *self {
            *self = next;
            true
        } else {
            false
        }
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lifecycle::Running => write!(f, "running"),
            Lifecycle::Stopping => write!(f, "stopping"),
            Lifecycle::Stopped => write!(f, "stopped"),
        }
    }
}
