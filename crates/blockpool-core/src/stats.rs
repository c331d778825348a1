//! Atomic pool statistics for lock-free usage tracking.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Statistics for pool usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Successful allocations.
    pub allocations: u64,
    /// Successful deallocations.
    pub deallocations: u64,
    /// Times the out-of-memory handler was invoked.
    pub oom_events: u64,
    /// Allocations that failed after escalation.
    pub failures: u64,
    /// Highest number of simultaneously live blocks.
    pub peak_live: usize,
}

/// Atomic pool statistics, updated outside the allocator lock.
pub struct AtomicPoolStats {
    allocations: AtomicU64,
    deallocations: AtomicU64,
    oom_events: AtomicU64,
    failures: AtomicU64,
    peak_live: AtomicUsize,
}

impl AtomicPoolStats {
    /// Create new zeroed stats.
    pub const fn new() -> Self {
        Self {
            allocations: AtomicU64::new(0),
            deallocations: AtomicU64::new(0),
            oom_events: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            peak_live: AtomicUsize::new(0),
        }
    }

    /// Take a snapshot of current stats.
    pub fn snapshot(&self) -> PoolStats {
        PoolStats {
            allocations: self.allocations.load(Ordering::Relaxed),
            deallocations: self.deallocations.load(Ordering::Relaxed),
            oom_events: self.oom_events.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            peak_live: self.peak_live.load(Ordering::Relaxed),
        }
    }

    /// Reset all counters.
    pub fn reset(&self) {
        self.allocations.store(0, Ordering::Relaxed);
        self.deallocations.store(0, Ordering::Relaxed);
        self.oom_events.store(0, Ordering::Relaxed);
        self.failures.store(0, Ordering::Relaxed);
        self.peak_live.store(0, Ordering::Relaxed);
    }

    /// Count an allocation that left `live` blocks outstanding.
    pub fn record_allocation(&self, live: usize) {
        self.allocations.fetch_add(1, Ordering::Relaxed);
        self.peak_live.fetch_max(live, Ordering::Relaxed);
    }

    /// Increment deallocation counter.
    pub fn record_deallocation(&self) {
        self.deallocations.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment out-of-memory handler counter.
    pub fn record_oom(&self) {
        self.oom_events.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment failed allocation counter.
    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }
}

impl Default for AtomicPoolStats {
    fn default() -> Self {
        Self::new()
    }
}
