//! Progress reporting for long-running backfill tasks.
//!
//! A progress sink is observability only: it never allows cancellation.
//! A task either commits in full or is rolled back in full.

use std::sync::atomic::{AtomicU64, Ordering};

/// Sink a task action reports backfill progress into.
///
/// Counters are monotonic: `set_total` announces the expected amount of
/// work once, `advance` ticks completed units. Implementations use interior
/// mutability so the sink can be shared behind `&self`.
pub trait ProgressSink: Send + Sync {
    fn set_total(&self, total: u64);
    fn advance(&self);
}

/// Discards all progress. Used when no observer is attached.
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn set_total(&self, _total: u64) {}
    fn advance(&self) {}
}

/// Atomic total/current pair readable by an external observer.
#[derive(Default)]
pub struct CountingProgress {
    total: AtomicU64,
    current: AtomicU64,
}

impl CountingProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn current(&self) -> u64 {
        self.current.load(Ordering::Relaxed)
    }
}

impl ProgressSink for CountingProgress {
    fn set_total(&self, total: u64) {
        self.total.store(total, Ordering::Relaxed);
    }

    fn advance(&self) {
        self.current.fetch_add(1, Ordering::Relaxed);
    }
}
