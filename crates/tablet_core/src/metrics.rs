//! Metrics and counters.
//!
//! Components report numbers through a [`MetricsRecorder`] supplied by the
//! embedding process. [`TabletStats`] keeps cheap running totals that can be
//! read while commits and cleans run.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Wall time of a successful commit, in microseconds.
pub const COMMIT_LATENCY_US: &str = "commit.latency_us";
/// Conflicts retried by one commit.
pub const COMMIT_RETRY_COUNT: &str = "commit.retry_count";
/// Id of the version a commit published.
pub const COMMIT_VERSION_ID: &str = "commit.version_id";
/// Wall time of a segment dump, in microseconds.
pub const DUMP_LATENCY_US: &str = "dump.latency_us";
/// Items written by one segment dump.
pub const DUMP_ITEM_COUNT: &str = "dump.item_count";
/// Segments removed by one clean pass.
pub const CLEAN_REMOVED_SEGMENTS: &str = "clean.removed_segments";
/// Versions removed by one clean pass.
pub const CLEAN_REMOVED_VERSIONS: &str = "clean.removed_versions";
/// Fences removed by one clean pass.
pub const CLEAN_REMOVED_FENCES: &str = "clean.removed_fences";

/// Sink for named numeric samples.
pub trait MetricsRecorder: Send + Sync {
    /// Records `value` under `name`.
    fn record(&self, name: &str, value: i64);
}

/// Discards every sample.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsRecorder for NoopMetrics {
    fn record(&self, _name: &str, _value: i64) {}
}

/// Keeps every sample in memory.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    samples: Mutex<BTreeMap<String, Vec<i64>>>,
}

impl InMemoryMetrics {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All samples recorded under `name`, oldest first.
    #[must_use]
    pub fn samples(&self, name: &str) -> Vec<i64> {
        self.samples.lock().get(name).cloned().unwrap_or_default()
    }

    /// Most recent sample under `name`.
    #[must_use]
    pub fn last(&self, name: &str) -> Option<i64> {
        self.samples.lock().get(name).and_then(|v| v.last().copied())
    }
}

impl MetricsRecorder for InMemoryMetrics {
    fn record(&self, name: &str, value: i64) {
        self.samples
            .lock()
            .entry(name.to_string())
            .or_default()
            .push(value);
    }
}

/// Running totals for one tablet.
#[derive(Debug, Default)]
pub struct TabletStats {
    commits: AtomicU64,
    commit_conflicts: AtomicU64,
    commit_failures: AtomicU64,
    cleans: AtomicU64,
    removed_segments: AtomicU64,
    removed_versions: AtomicU64,
    removed_fences: AtomicU64,
}

impl TabletStats {
    /// Creates zeroed stats.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_commit(&self, conflicts: u64) {
        self.commits.fetch_add(1, Ordering::Relaxed);
        self.commit_conflicts.fetch_add(conflicts, Ordering::Relaxed);
    }

    pub(crate) fn record_commit_failure(&self, conflicts: u64) {
        self.commit_failures.fetch_add(1, Ordering::Relaxed);
        self.commit_conflicts.fetch_add(conflicts, Ordering::Relaxed);
    }

    pub(crate) fn record_clean(&self, segments: u64, versions: u64, fences: u64) {
        self.cleans.fetch_add(1, Ordering::Relaxed);
        self.removed_segments.fetch_add(segments, Ordering::Relaxed);
        self.removed_versions.fetch_add(versions, Ordering::Relaxed);
        self.removed_fences.fetch_add(fences, Ordering::Relaxed);
    }

    /// Returns a point-in-time copy of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            commits: self.commits.load(Ordering::Relaxed),
            commit_conflicts: self.commit_conflicts.load(Ordering::Relaxed),
            commit_failures: self.commit_failures.load(Ordering::Relaxed),
            cleans: self.cleans.load(Ordering::Relaxed),
            removed_segments: self.removed_segments.load(Ordering::Relaxed),
            removed_versions: self.removed_versions.load(Ordering::Relaxed),
            removed_fences: self.removed_fences.load(Ordering::Relaxed),
        }
    }
}

/// Plain copy of [`TabletStats`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Successful commits.
    pub commits: u64,
    /// Id conflicts seen by commits, retried or not.
    pub commit_conflicts: u64,
    /// Commits that published nothing.
    pub commit_failures: u64,
    /// Completed clean passes.
    pub cleans: u64,
    /// Segments removed by cleans.
    pub removed_segments: u64,
    /// Versions removed by cleans.
    pub removed_versions: u64,
    /// Fences removed by cleans.
    pub removed_fences: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_keeps_samples_in_order() {
        let metrics = InMemoryMetrics::new();
        metrics.record(COMMIT_VERSION_ID, 3);
        metrics.record(COMMIT_VERSION_ID, 4);
        assert_eq!(metrics.samples(COMMIT_VERSION_ID), vec![3, 4]);
        assert_eq!(metrics.last(COMMIT_VERSION_ID), Some(4));
        assert_eq!(metrics.last(DUMP_LATENCY_US), None);
    }

    #[test]
    fn stats_snapshot() {
        let stats = TabletStats::new();
        stats.record_commit(2);
        stats.record_commit_failure(3);
        stats.record_clean(4, 2, 1);

        let snap = stats.snapshot();
        assert_eq!(snap.commits, 1);
        assert_eq!(snap.commit_failures, 1);
        assert_eq!(snap.commit_conflicts, 5);
        assert_eq!(snap.removed_segments, 4);
    }

    #[test]
    fn concurrent_recording() {
        use std::sync::Arc;
        use std::thread;

        let metrics = Arc::new(InMemoryMetrics::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let m = Arc::clone(&metrics);
                thread::spawn(move || {
                    for _ in 0..50 {
                        m.record(DUMP_ITEM_COUNT, i);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(metrics.samples(DUMP_ITEM_COUNT).len(), 400);
    }
}
