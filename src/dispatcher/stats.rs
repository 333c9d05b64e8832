use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Statistics from the dispatcher.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    /// Events accepted by `publish`.
    pub published: u64,
    /// Events refused (stopping or queue full).
    pub rejected: u64,
    /// Envelopes popped by the drain loop.
    pub dispatched: u64,
    /// Handler invocations that completed successfully.
    pub delivered: u64,
    /// Envelopes whose kind had no subscribers.
    pub unrouted: u64,
    /// Handler invocations skipped because the payload type did not match.
    pub type_mismatches: u64,
    /// Fallible handlers that returned an error.
    pub handler_failures: u64,
    /// Handler invocations that panicked.
    pub handler_panics: u64,
}

#[derive(Default)]
pub(crate) struct DispatchCounters {
    pub(crate) published: AtomicU64,
    pub(crate) rejected: AtomicU64,
    pub(crate) dispatched: AtomicU64,
    pub(crate) delivered: AtomicU64,
    pub(crate) unrouted: AtomicU64,
    pub(crate) type_mismatches: AtomicU64,
    pub(crate) handler_failures: AtomicU64,
    pub(crate) handler_panics: AtomicU64,
}

impl DispatchCounters {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::AcqRel);
    }

    /// Downstream counters are read before upstream ones, so a snapshot
    /// never shows more envelopes dispatched than published.
    pub(crate) fn snapshot(&self) -> DispatchStats {
        DispatchStats {
            delivered: self.delivered.load(Ordering::Acquire),
            unrouted: self.unrouted.load(Ordering::Acquire),
            type_mismatches: self.type_mismatches.load(Ordering::Acquire),
            handler_failures: self.handler_failures.load(Ordering::Acquire),
            handler_panics: self.handler_panics.load(Ordering::Acquire),
            dispatched: self.dispatched.load(Ordering::Acquire),
            published: self.published.load(Ordering::Acquire),
            rejected: self.rejected.load(Ordering::Acquire),
        }
    }
}
