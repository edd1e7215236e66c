//! Counters kept by the bus and the snapshot handed to callers.

use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time view of the bus counters
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BusStats {
    /// Commands whose handler chain completed without error
    pub commands_handled: u64,
    /// Commands whose handler chain failed or panicked
    pub commands_failed: u64,
    /// Commands rejected by the validation gate
    pub commands_rejected: u64,
    /// Async commands still queued when the pool was torn down
    pub commands_discarded: u64,
    pub workers_started: u64,
    pub workers_retired: u64,
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    pub(crate) commands_handled: AtomicU64,
    pub(crate) commands_failed: AtomicU64,
    pub(crate) commands_rejected: AtomicU64,
    pub(crate) commands_discarded: AtomicU64,
    pub(crate) workers_started: AtomicU64,
    pub(crate) workers_retired: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> BusStats {
        BusStats {
            commands_handled: self.commands_handled.load(Ordering::Relaxed),
            commands_failed: self.commands_failed.load(Ordering::Relaxed),
            commands_rejected: self.commands_rejected.load(Ordering::Relaxed),
            commands_discarded: self.commands_discarded.load(Ordering::Relaxed),
            workers_started: self.workers_started.load(Ordering::Relaxed),
            workers_retired: self.workers_retired.load(Ordering::Relaxed),
        }
    }
}
