//! Aggregate Pipeline Counters
//!
//! The write pipelines never fail a submission because one unit went bad —
//! a task that exhausts its retries is committed as an empty placeholder
//! and *counted*. These counters are the operator-visible surface for
//! that policy: after an import, `failed > 0` is what tells you to go
//! look at the logs.
//!
//! Counters are plain relaxed atomics: every value is monotonic and
//! independently meaningful, so no cross-counter consistency is needed.

use std::sync::atomic::{AtomicU64, Ordering};

/// Shared counters for one pipeline instance.
#[derive(Debug, Default)]
pub struct PipelineStats {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    retries: AtomicU64,
    keyframes: AtomicU64,
    diff_units: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
}

macro_rules! counter {
    ($inc:ident, $field:ident) => {
        pub(crate) fn $inc(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
        }
    };
}

impl PipelineStats {
    counter!(inc_submitted, submitted);
    counter!(inc_completed, completed);
    counter!(inc_failed, failed);
    counter!(inc_retries, retries);
    counter!(inc_keyframes, keyframes);
    counter!(inc_diff_units, diff_units);
    counter!(inc_cache_hits, cache_hits);
    counter!(inc_cache_misses, cache_misses);

    /// Consistent-enough copy of the counters for reporting.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            keyframes: self.keyframes.load(Ordering::Relaxed),
            diff_units: self.diff_units.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of a pipeline's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub retries: u64,
    pub keyframes: u64,
    pub diff_units: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let stats = PipelineStats::default();
        stats.inc_submitted();
        stats.inc_submitted();
        stats.inc_completed();
        stats.inc_failed();

        let snap = stats.snapshot();
        assert_eq!(snap.submitted, 2);
        assert_eq!(snap.completed, 1);
        assert_eq!(snap.failed, 1);
        assert_eq!(snap.retries, 0);
    }
}
