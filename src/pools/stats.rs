//! Pool checkout statistics
//!
//! Counters are process-local: each process that attaches a pool keeps its
//! own view of the checkouts it performed.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Snapshot of a pool's checkout activity
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Number of slots in the pool
    pub slot_count: usize,
    /// Slots checked out by this process and not yet reclaimed
    pub currently_held: usize,
    /// Highest `currently_held` ever observed
    pub peak_held: usize,
    /// Successful `get_buffer` calls
    pub checkouts: u64,
    /// Successful `reclaim` calls
    pub reclaims: u64,
    /// `get_buffer` calls that gave up on their deadline
    pub timeouts: u64,
}

impl PoolStats {
    /// Fraction of checkout attempts that timed out (0.0 to 1.0)
    pub fn timeout_rate(&self) -> f64 {
        let attempts = self.checkouts + self.timeouts;
        if attempts == 0 {
            return 0.0;
        }
        self.timeouts as f64 / attempts as f64
    }

    /// Fraction of the pool held by this process (0.0 to 1.0)
    pub fn utilization(&self) -> f64 {
        if self.slot_count == 0 {
            return 0.0;
        }
        self.currently_held as f64 / self.slot_count as f64
    }
}

/// Thread-safe counters behind [`PoolStats`]
#[derive(Debug)]
pub struct AtomicPoolStats {
    slot_count: usize,
    currently_held: AtomicUsize,
    peak_held: AtomicUsize,
    checkouts: AtomicU64,
    reclaims: AtomicU64,
    timeouts: AtomicU64,
}

impl AtomicPoolStats {
    pub fn new(slot_count: usize) -> Self {
        Self {
            slot_count,
            currently_held: AtomicUsize::new(0),
            peak_held: AtomicUsize::new(0),
            checkouts: AtomicU64::new(0),
            reclaims: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
        }
    }

    /// Record a successful checkout
    pub fn record_checkout(&self) {
        self.checkouts.fetch_add(1, Ordering::Relaxed);
        let held = self.currently_held.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_held.fetch_max(held, Ordering::Relaxed);
    }

    /// Record a successful reclaim.
    ///
    /// A slot checked out by another process may be reclaimed here, so the
    /// held count saturates at zero.
    pub fn record_reclaim(&self) {
        self.reclaims.fetch_add(1, Ordering::Relaxed);
        let _ = self
            .currently_held
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |held| {
                Some(held.saturating_sub(1))
            });
    }

    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PoolStats {
        PoolStats {
            slot_count: self.slot_count,
            currently_held: self.currently_held.load(Ordering::Relaxed),
            peak_held: self.peak_held.load(Ordering::Relaxed),
            checkouts: self.checkouts.load(Ordering::Relaxed),
            reclaims: self.reclaims.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
        }
    }

    /// Reset all counters
    pub fn reset(&self) {
        self.currently_held.store(0, Ordering::Relaxed);
        self.peak_held.store(0, Ordering::Relaxed);
        self.checkouts.store(0, Ordering::Relaxed);
        self.reclaims.store(0, Ordering::Relaxed);
        self.timeouts.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peak_tracks_highest_held() {
        let stats = AtomicPoolStats::new(4);
        stats.record_checkout();
        stats.record_checkout();
        stats.record_reclaim();
        stats.record_checkout();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.currently_held, 2);
        assert_eq!(snapshot.peak_held, 2);
        assert_eq!(snapshot.checkouts, 3);
        assert_eq!(snapshot.reclaims, 1);
        assert_eq!(snapshot.utilization(), 0.5);
    }

    #[test]
    fn test_reclaim_saturates() {
        let stats = AtomicPoolStats::new(1);
        stats.record_reclaim();
        assert_eq!(stats.snapshot().currently_held, 0);
    }

    #[test]
    fn test_timeout_rate() {
        let stats = AtomicPoolStats::new(1);
        assert_eq!(stats.snapshot().timeout_rate(), 0.0);
        stats.record_checkout();
        stats.record_timeout();
        assert_eq!(stats.snapshot().timeout_rate(), 0.5);

        stats.reset();
        assert_eq!(stats.snapshot(), PoolStats { slot_count: 1, ..Default::default() });
    }
}
