use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Statistics from the worker pool.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Number of worker threads the pool was started with.
    pub workers: usize,
    /// Tasks accepted by `enqueue`.
    pub submitted: u64,
    /// Tasks that ran to completion.
    pub completed: u64,
    /// Tasks that panicked.
    pub panicked: u64,
    /// Tasks refused because the pool was stopping.
    pub rejected: u64,
}

#[derive(Default)]
pub(crate) struct PoolCounters {
    pub(crate) submitted: AtomicU64,
    pub(crate) completed: AtomicU64,
    pub(crate) panicked: AtomicU64,
    pub(crate) rejected: AtomicU64,
}

impl PoolCounters {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn snapshot(&self, workers: usize) -> PoolStats {
        // Finished before accepted: completed + panicked never exceeds submitted.
        PoolStats {
            workers,
            completed: self.completed.load(Ordering::Acquire),
            panicked: self.panicked.load(Ordering::Acquire),
            submitted: self.submitted.load(Ordering::Acquire),
            rejected: self.rejected.load(Ordering::Acquire),
        }
    }
}
