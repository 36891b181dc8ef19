//! Cross-module scenarios for the tablet core.
//!
//! Each scenario drives writers, committers and the cleaner through one
//! situation the versioning protocol must survive, and reports whether the
//! observed on-disk state matches what the protocol promises.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tablet_testkit::scenarios::ScenarioHarness;
//!
//! let mut harness = ScenarioHarness::new();
//! harness.run_all();
//! assert!(harness.all_passed(), "{}", harness.summary());
//! ```

use crate::fixtures::{sample_items, TestTablet};
use std::path::Path;
use std::sync::Arc;
use tablet_core::layout;
use tablet_core::version::{load_version, version_exists};
use tablet_core::{
    CleanOptions, CoreError, CoreResult, SegmentId, ThreadPoolExecutor, Version, VersionCoord,
    PUBLIC_SEGMENT_ID_MASK,
};
use tablet_storage::{Directory, InMemoryDirectory};

/// Outcome of one scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Whether the scenario passed.
    pub passed: bool,
    /// What was exercised.
    pub description: String,
    /// What went wrong, if anything.
    pub error: Option<String>,
}

impl ScenarioResult {
    /// Creates a passing result.
    pub fn pass(description: &str) -> Self {
        Self {
            passed: true,
            description: description.to_string(),
            error: None,
        }
    }

    /// Creates a failing result.
    pub fn fail(description: &str, error: &str) -> Self {
        Self {
            passed: false,
            description: description.to_string(),
            error: Some(error.to_string()),
        }
    }

    fn check(description: &str, checks: &[(bool, &str)]) -> Self {
        match checks.iter().find(|(ok, _)| !ok) {
            Some((_, error)) => Self::fail(description, error),
            None => Self::pass(description),
        }
    }
}

fn finish(description: &str, result: CoreResult<ScenarioResult>) -> ScenarioResult {
    result.unwrap_or_else(|e: CoreError| ScenarioResult::fail(description, &e.to_string()))
}

/// Runs scenarios and collects their results.
#[derive(Debug, Default)]
pub struct ScenarioHarness {
    results: Vec<ScenarioResult>,
}

impl ScenarioHarness {
    /// Creates an empty harness.
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&mut self, result: ScenarioResult) -> ScenarioResult {
        self.results.push(result.clone());
        result
    }

    /// Pushed segments are committed; a dumped but unpushed one is not.
    pub fn end_to_end(&mut self) -> ScenarioResult {
        const DESCRIPTION: &str = "Pushed segments are committed, unpushed ones are not";
        let result = (|| -> CoreResult<ScenarioResult> {
            let mut tablet = TestTablet::memory();
            for offset in 0..10 {
                tablet.build_segment(offset)?;
            }
            let first = tablet.commit()?;

            let unpushed = tablet.dump_segment(sample_items(1), 10)?;
            let second = tablet.commit()?;

            let ninth = SegmentId::new(PUBLIC_SEGMENT_ID_MASK + 9);
            Ok(ScenarioResult::check(
                DESCRIPTION,
                &[
                    (first.segment_count() == 10, "first version misses segments"),
                    (first.last_segment_id() == ninth, "high-water mark is not the ninth id"),
                    (!second.has_segment(unpushed), "unpushed segment was committed"),
                    (second.last_segment_id() == ninth, "unpushed segment moved high-water"),
                    (second.segment_count() == 10, "second version lost segments"),
                ],
            ))
        })();
        let result = finish(DESCRIPTION, result);
        self.record(result)
    }

    /// A commit over an occupied version slot moves to the next id and
    /// leaves the occupant untouched.
    pub fn commit_retry(&mut self) -> ScenarioResult {
        const DESCRIPTION: &str = "Commit retries past an occupied version id";
        let result = (|| -> CoreResult<ScenarioResult> {
            let mut tablet = TestTablet::memory();
            let occupied = tablet.ids.get_next_version_id();
            let mut squatter = Version::new(occupied);
            squatter.set_fence_name(tablet.fence.name());
            squatter.add_description("writer", "other");
            tablet.fence.publish_version(&squatter)?;

            let segment = tablet.build_segment(1)?;
            let committed = tablet.commit()?;
            let occupant =
                load_version(tablet.directory.as_ref(), tablet.fence.name(), occupied)?;

            Ok(ScenarioResult::check(
                DESCRIPTION,
                &[
                    (committed.version_id() > occupied, "commit reused the occupied id"),
                    (committed.has_segment(segment), "committed version lost the segment"),
                    (occupant == squatter, "occupied version was overwritten"),
                ],
            ))
        })();
        let result = finish(DESCRIPTION, result);
        self.record(result)
    }

    /// A stale fence is kept within the tolerance and removed beyond it.
    ///
    /// The stale writer dumps a segment without committing; the live writer
    /// starts `gap_us` later and commits three versions. A retained stale
    /// writer must still be able to commit its segment after the clean.
    pub fn fencing(&mut self, gap_us: i64, deviation_us: i64) -> ScenarioResult {
        const DESCRIPTION: &str = "Fence tolerance decides whether a stale fence survives";
        let result = (|| -> CoreResult<ScenarioResult> {
            let directory: Arc<dyn Directory> = Arc::new(InMemoryDirectory::new());
            let mut stale = TestTablet::with_directory(Arc::clone(&directory), 0);
            let dumped = stale.dump_segment(sample_items(1), 0)?;

            let mut live = TestTablet::with_directory(Arc::clone(&directory), gap_us);
            for offset in 0..3 {
                live.build_segment(offset)?;
                live.commit()?;
            }

            let options = CleanOptions::new()
                .keep_version_count(1)
                .fence_ts_tolerant_deviation_us(deviation_us);
            live.cleaner().clean(&options, &[])?;

            let stale_exists = directory.is_exist(Path::new(stale.fence.name()))?;
            let live_exists = directory.is_exist(Path::new(live.fence.name()))?;
            let expected = gap_us <= deviation_us;
            let stale_commits = if expected {
                stale.committer.push(dumped);
                stale.commit()?.has_segment(dumped)
            } else {
                true
            };
            Ok(ScenarioResult::check(
                DESCRIPTION,
                &[
                    (stale_exists == expected, "stale fence retention ignores the tolerance"),
                    (live_exists, "live fence was removed"),
                    (stale_commits, "retained writer lost its dumped segment"),
                ],
            ))
        })();
        let result = finish(DESCRIPTION, result);
        self.record(result)
    }

    /// A second clean with the same inputs removes nothing.
    pub fn clean_idempotence(&mut self) -> ScenarioResult {
        const DESCRIPTION: &str = "Clean is idempotent";
        let result = (|| -> CoreResult<ScenarioResult> {
            let memory = Arc::new(InMemoryDirectory::new());
            let directory = Arc::clone(&memory) as Arc<dyn Directory>;
            let mut tablet = TestTablet::with_directory(directory, 1);
            for offset in 0..3 {
                tablet.build_segment(offset)?;
                tablet.commit()?;
            }
            tablet.restart(2);
            for offset in 3..6 {
                tablet.build_segment(offset)?;
                tablet.commit()?;
            }

            let options = CleanOptions::new().keep_version_count(2);
            let mut cleaner = tablet.cleaner();
            let first = cleaner.clean(&options, &[])?;
            let files = memory.files();
            let second = cleaner.clean(&options, &[])?;

            Ok(ScenarioResult::check(
                DESCRIPTION,
                &[
                    (!first.removed_versions.is_empty(), "first clean removed no version"),
                    (second.is_empty(), "second clean removed something"),
                    (memory.files() == files, "second clean changed the directory"),
                ],
            ))
        })();
        let result = finish(DESCRIPTION, result);
        self.record(result)
    }

    /// A publish interrupted after the version file leaves an orphan; the
    /// next commit succeeds and a clean removes the orphan.
    pub fn interrupted_publish(&mut self) -> ScenarioResult {
        const DESCRIPTION: &str = "Interrupted publish is recovered";
        let result = (|| -> CoreResult<ScenarioResult> {
            let memory = Arc::new(InMemoryDirectory::new());
            let directory = Arc::clone(&memory) as Arc<dyn Directory>;
            let mut tablet = TestTablet::with_directory(directory, 1);
            let segment = tablet.build_segment(1)?;

            let interrupted = tablet.ids.get_next_version_id();
            memory.fail_store_on(layout::ENTRY_TABLE_PREFIX);
            let failed = tablet.commit().is_err();
            memory.clear_faults();
            let orphan_path = tablet
                .fence
                .path_of(&layout::version_file_name(interrupted));
            let orphaned = memory.is_exist(&orphan_path)?
                && !version_exists(memory.as_ref(), tablet.fence.name(), interrupted)?;

            let committed = tablet.commit()?;
            let options = CleanOptions::new()
                .current_max_version_id(committed.version_id())
                .ignore_keep_version_count(true);
            let report = tablet.cleaner().clean(&options, &[])?;
            let expected_orphans = vec![VersionCoord::new(interrupted, tablet.fence.name())];

            Ok(ScenarioResult::check(
                DESCRIPTION,
                &[
                    (failed, "commit with a failing entry table store succeeded"),
                    (orphaned, "interrupted publish left no orphan version file"),
                    (committed.version_id() > interrupted, "orphaned id was reused"),
                    (committed.has_segment(segment), "restored operations were lost"),
                    (report.removed_orphans == expected_orphans, "orphan was not removed"),
                ],
            ))
        })();
        let result = finish(DESCRIPTION, result);
        self.record(result)
    }

    /// A parallel dump failure blocks commits until it is cleared.
    pub fn parallel_dump_failure(&mut self) -> ScenarioResult {
        const DESCRIPTION: &str = "Failed parallel dump blocks commits";
        let result = (|| -> CoreResult<ScenarioResult> {
            let memory = Arc::new(InMemoryDirectory::new());
            let directory = Arc::clone(&memory) as Arc<dyn Directory>;
            let mut tablet = TestTablet::with_directory(directory, 1);
            let executor = ThreadPoolExecutor::new("dump", 4)?;

            let failing = tablet.ids.get_next_segment_id();
            memory.fail_store_on("field_5");
            let dump = tablet.dump_segment_with(&executor, 4, sample_items(8), 1);
            memory.clear_faults();
            let dump_failed = match dump {
                Ok(_) => false,
                Err(err) => {
                    tablet.committer.set_dump_error(failing, &err);
                    true
                }
            };
            let blocked = matches!(tablet.commit(), Err(CoreError::DumpFailed { .. }));

            tablet.committer.clear_dump_error();
            let retried = tablet.dump_segment_with(&executor, 4, sample_items(8), 1)?;
            tablet.committer.push(retried);
            let committed = tablet.commit()?;

            Ok(ScenarioResult::check(
                DESCRIPTION,
                &[
                    (dump_failed, "injected store failure did not fail the dump"),
                    (blocked, "commit was not blocked by the dump failure"),
                    (retried == failing, "segment id was consumed by the failed dump"),
                    (committed.has_segment(retried), "retried segment was not committed"),
                ],
            ))
        })();
        let result = finish(DESCRIPTION, result);
        self.record(result)
    }

    /// Runs every scenario.
    pub fn run_all(&mut self) -> Vec<ScenarioResult> {
        self.results.clear();

        self.end_to_end();
        self.commit_retry();
        self.fencing(30 * 60 * 1_000_000, 3_600 * 1_000_000);
        self.fencing(2 * 3_600 * 1_000_000, 3_600 * 1_000_000);
        self.clean_idempotence();
        self.interrupted_publish();
        self.parallel_dump_failure();

        self.results.clone()
    }

    /// Returns a summary of scenario results.
    pub fn summary(&self) -> String {
        let passed = self.results.iter().filter(|r| r.passed).count();
        let mut summary = format!(
            "\n=== Tablet Scenario Summary ===\nPassed: {}/{}\n\n",
            passed,
            self.results.len()
        );
        for result in &self.results {
            let status = if result.passed { "ok" } else { "FAILED" };
            summary.push_str(&format!("[{status}] {}\n", result.description));
            if let Some(ref error) = result.error {
                summary.push_str(&format!("  Error: {error}\n"));
            }
        }
        summary
    }

    /// Returns whether all scenarios passed.
    pub fn all_passed(&self) -> bool {
        self.results.iter().all(|r| r.passed)
    }
}
