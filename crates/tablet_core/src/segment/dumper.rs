//! Flushing a building segment to its fence.

use super::{
    BuildingSegment, DumpControl, DumpItem, PackageFileWriter, SegmentInfo, SegmentStatus,
    SegmentWriteMode,
};
use crate::error::{CoreError, CoreResult};
use crate::executor::Executor;
use crate::fence::Fence;
use crate::metrics::{MetricsRecorder, NoopMetrics, DUMP_ITEM_COUNT, DUMP_LATENCY_US};
use crate::types::SegmentId;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tablet_storage::Directory;
use tracing::{debug, info, warn};

/// Dumps with fewer items than this always run sequentially.
pub const PARALLEL_DUMP_MIN_ITEMS: usize = 4;

/// Everything a dump worker needs, shareable across threads.
#[derive(Clone)]
struct DumpJob {
    directory: Arc<dyn Directory>,
    segment_dir: PathBuf,
    items: Arc<Vec<DumpItem>>,
    package: Option<Arc<PackageFileWriter>>,
}

impl DumpJob {
    fn execute(&self, index: usize) -> CoreResult<()> {
        let item = self
            .items
            .get(index)
            .ok_or_else(|| CoreError::internal(format!("dump item {index} out of range")))?;
        item.execute(
            self.directory.as_ref(),
            &self.segment_dir,
            self.package.as_deref(),
        )
    }

    fn run_worker(&self, control: &DumpControl) {
        let mut next = control.start_task();
        while let Some(index) = next {
            next = control.iterate(index, self.execute(index));
        }
    }
}

/// Persists one building segment.
///
/// Construction moves the segment to `Dumping`; a successful
/// [`SegmentDumper::dump`] leaves it `Built`. A failed dump is not rolled
/// back: the segment directory stays behind and is never referenced by a
/// version, so the cleaner reclaims it.
pub struct SegmentDumper {
    directory: Arc<dyn Directory>,
    segment_dir: PathBuf,
    segment: BuildingSegment,
    metrics: Arc<dyn MetricsRecorder>,
}

impl SegmentDumper {
    /// Takes ownership of `segment` for dumping into `fence`.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if the segment is not `Building`.
    pub fn new(fence: &Fence, mut segment: BuildingSegment) -> CoreResult<Self> {
        segment.set_status(SegmentStatus::Dumping)?;
        Ok(Self {
            directory: Arc::clone(fence.directory()),
            segment_dir: fence.segment_path(segment.segment_id()),
            segment,
            metrics: Arc::new(NoopMetrics),
        })
    }

    /// Reports dump metrics to `metrics`.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsRecorder>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Segment being dumped.
    #[must_use]
    pub fn segment_id(&self) -> SegmentId {
        self.segment.segment_id()
    }

    /// Current status of the segment.
    #[must_use]
    pub fn status(&self) -> SegmentStatus {
        self.segment.status()
    }

    /// Directory the segment is written to.
    #[must_use]
    pub fn segment_dir(&self) -> &Path {
        &self.segment_dir
    }

    /// Writes all dump items, the segment info and the package file.
    ///
    /// Items run sequentially unless there are at least
    /// [`PARALLEL_DUMP_MIN_ITEMS`] of them and `thread_count` allows two or
    /// more threads. In parallel mode `min(thread_count, items) - 1` workers
    /// go to `executor` and the calling thread works as coordinator.
    ///
    /// # Errors
    ///
    /// Returns the first error any item reported, or the error of storing
    /// the segment info or the package.
    pub fn dump(mut self, executor: &dyn Executor, thread_count: usize) -> CoreResult<SegmentInfo> {
        let start = Instant::now();
        let segment_id = self.segment.segment_id();
        let items = self.segment.take_dump_items();
        let item_count = items.len();

        self.directory.make_directory(&self.segment_dir)?;
        let package = match self.segment.write_mode() {
            SegmentWriteMode::Separate => None,
            SegmentWriteMode::Package => Some(Arc::new(PackageFileWriter::new())),
        };
        let job = DumpJob {
            directory: Arc::clone(&self.directory),
            segment_dir: self.segment_dir.clone(),
            items: Arc::new(items),
            package,
        };

        let parallelism = thread_count.min(item_count);
        let result = if item_count >= PARALLEL_DUMP_MIN_ITEMS && parallelism >= 2 {
            debug!(
                segment_id = %segment_id,
                items = item_count,
                threads = parallelism,
                "parallel dump"
            );
            dump_parallel(executor, &job, segment_id, parallelism - 1).0
        } else {
            debug!(segment_id = %segment_id, items = item_count, "sequential dump");
            (0..item_count).try_for_each(|index| job.execute(index))
        };
        if let Err(err) = result {
            warn!(segment_id = %segment_id, error = %err, "segment dump failed");
            return Err(err);
        }

        self.segment
            .info()
            .store(self.directory.as_ref(), &self.segment_dir)?;
        if let Some(package) = &job.package {
            package.flush(self.directory.as_ref(), &self.segment_dir)?;
        }
        self.segment.set_status(SegmentStatus::Built)?;

        let elapsed = start.elapsed();
        self.metrics.record(
            DUMP_LATENCY_US,
            i64::try_from(elapsed.as_micros()).unwrap_or(i64::MAX),
        );
        self.metrics
            .record(DUMP_ITEM_COUNT, i64::try_from(item_count).unwrap_or(i64::MAX));
        info!(
            segment_id = %segment_id,
            items = item_count,
            elapsed_us = elapsed.as_micros() as u64,
            "segment dumped"
        );
        Ok(self.segment.into_info())
    }
}

impl std::fmt::Debug for SegmentDumper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentDumper")
            .field("segment_id", &self.segment.segment_id())
            .field("segment_dir", &self.segment_dir)
            .finish_non_exhaustive()
    }
}

/// Runs `job` on `workers` scheduled workers plus the calling thread.
///
/// Returns the dump result together with the control, which outlives this
/// call when scheduled workers are still exiting.
fn dump_parallel(
    executor: &dyn Executor,
    job: &DumpJob,
    segment_id: SegmentId,
    workers: usize,
) -> (CoreResult<()>, Arc<DumpControl>) {
    let control = DumpControl::new(segment_id, job.items.len());
    for _ in 0..workers {
        let worker_control = Arc::clone(&control);
        let worker_job = job.clone();
        let scheduled = executor.schedule(Box::new(move || {
            worker_job.run_worker(&worker_control);
            // Workers never observe the aggregate result.
            let _ = worker_control.exit_task(false);
        }));
        if let Err(err) = scheduled {
            warn!(segment_id = %segment_id, error = %err, "could not schedule dump worker");
        }
    }

    job.run_worker(&control);
    let result = Arc::clone(&control).exit_task(true);
    (result, control)
}
