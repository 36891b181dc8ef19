//! Stress tests for the tablet core.
//!
//! These tests verify commit and dump behavior under concurrent writers.

use crate::fixtures::{sample_items, TestTablet};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tablet_core::version::list_versions;
use tablet_core::{
    CommitOptions, CoreResult, Fence, IdGenerator, IdMaskType, RangeInfo, TabletCommitter,
    TabletData, ThreadPoolExecutor, VersionId,
};
use tablet_storage::{Directory, InMemoryDirectory};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total operations: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Operations per thread.
    pub operations: usize,
    /// Number of concurrent threads.
    pub threads: usize,
    /// Items written per dumped segment.
    pub items_per_segment: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 50,
            threads: 4,
            items_per_segment: 8,
        }
    }
}

impl StressConfig {
    /// Retry budget large enough for every writer to lose every race once.
    fn retry_count(&self) -> u32 {
        u32::try_from(self.threads * self.operations + 1).unwrap_or(u32::MAX)
    }
}

/// Outcome of [`stress_concurrent_commits`].
#[derive(Debug, Clone)]
pub struct CommitRace {
    /// Throughput figures.
    pub result: StressTestResult,
    /// Version ids returned to the writers.
    pub committed: Vec<VersionId>,
    /// Version ids found in the fence afterwards.
    pub published: Vec<VersionId>,
}

impl CommitRace {
    /// Returns true if every committed id is unique and published exactly once.
    pub fn is_consistent(&self) -> bool {
        let unique: BTreeSet<_> = self.committed.iter().copied().collect();
        let mut committed = self.committed.clone();
        committed.sort();
        unique.len() == self.committed.len() && committed == self.published
    }
}

/// Races independent writers committing into one shared fence.
///
/// Every writer has its own id generator starting at the same base, so
/// each id is contended and losers must move on to the next one.
pub fn stress_concurrent_commits(config: &StressConfig) -> CoreResult<CommitRace> {
    let directory: Arc<dyn Directory> = Arc::new(InMemoryDirectory::new());
    let fence = Fence::create(Arc::clone(&directory), true, 1, RangeInfo::full())?;
    let failed = Arc::new(AtomicUsize::new(0));
    let retry_count = config.retry_count();

    let start = Instant::now();
    let handles: Vec<_> = (0..config.threads)
        .map(|_| {
            let fence = fence.clone();
            let failed = Arc::clone(&failed);
            let operations = config.operations;
            thread::spawn(move || {
                let ids = IdGenerator::new(IdMaskType::BuildPublic);
                let data = TabletData::default();
                let committer = TabletCommitter::new();
                let options = CommitOptions::new();
                let mut committed = Vec::with_capacity(operations);
                for _ in 0..operations {
                    match committer.commit(&data, &fence, retry_count, &ids, &options) {
                        Ok(version) => committed.push(version.version_id()),
                        Err(_) => {
                            failed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
                committed
            })
        })
        .collect();

    let mut committed = Vec::new();
    for handle in handles {
        committed.extend(handle.join().unwrap_or_default());
    }
    let duration = start.elapsed();

    let published = list_versions(directory.as_ref(), fence.name())?;
    Ok(CommitRace {
        result: StressTestResult::new(committed.len(), failed.load(Ordering::Relaxed), duration),
        committed,
        published,
    })
}

/// Dumps and commits segments one after another, each written by a
/// worker pool.
pub fn stress_parallel_dumps(config: &StressConfig) -> CoreResult<StressTestResult> {
    let executor = ThreadPoolExecutor::new("stress-dump", config.threads)?;
    let mut tablet = TestTablet::memory();

    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;
    for offset in 0..config.operations {
        let items = sample_items(config.items_per_segment);
        let offset = i64::try_from(offset).unwrap_or(i64::MAX);
        match tablet.dump_segment_with(&executor, config.threads, items, offset) {
            Ok(segment_id) => {
                tablet.committer.push(segment_id);
                successful += 1;
            }
            Err(_) => failed += 1,
        }
    }
    tablet.commit()?;

    Ok(StressTestResult::new(successful, failed, start.elapsed()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick() -> StressConfig {
        StressConfig {
            operations: 10,
            threads: 4,
            items_per_segment: 6,
        }
    }

    #[test]
    fn concurrent_commits_publish_each_id_once() {
        let race = stress_concurrent_commits(&quick()).unwrap();
        assert_eq!(race.result.failed_ops, 0);
        assert_eq!(race.committed.len(), 40);
        assert!(race.is_consistent());
    }

    #[test]
    fn parallel_dumps_all_commit() {
        let config = quick();
        let result = stress_parallel_dumps(&config).unwrap();
        assert_eq!(result.successful_ops, config.operations);
        assert_eq!(result.failed_ops, 0);
    }

    #[test]
    #[ignore]
    fn stress_concurrent_commits_default() {
        let race = stress_concurrent_commits(&StressConfig::default()).unwrap();
        race.result.print_summary("Concurrent Commits");
        assert!(race.is_consistent());
    }
}
