//! The tablet committer.
//!
//! The build path queues intents ([`Operation`]s) as they happen; the
//! build-loop driver asks [`TabletCommitter::need_commit`] and then calls
//! [`TabletCommitter::commit`], which folds every queued intent into one new
//! [`Version`] and publishes it.
//!
//! # Commit protocol
//!
//! 1. A recorded dump failure blocks the commit.
//! 2. The queue is drained and a version skeleton is derived from the
//!    on-disk version, a finished merge and the drained operations.
//! 3. Up to `retry_count` attempts: take a fresh version id (or the
//!    requested one), stamp the commit time and publish into the fence.
//!    The version file is stored without overwrite, so an occupied id is a
//!    conflict and the next attempt uses the next id.
//! 4. The version is mirrored to the root if requested and the directory
//!    is synced. If either step fails the published files are withdrawn
//!    and the commit fails.
//!
//! A failed commit puts the drained operations back at the front of the
//! queue, so the next commit applies them again.

mod merge;
mod operation;
mod retry;

pub use merge::{MergeCoordinator, MergedVersionInfo};
pub use operation::Operation;
pub use retry::{with_bounded_retry, CommitOutcome};

use crate::config::{CommitOptions, ImportOptions, ImportStrategy};
use crate::error::{CoreError, CoreResult};
use crate::fence::{Fence, ROOT_FENCE_NAME};
use crate::id_generator::IdGenerator;
use crate::metrics::{
    MetricsRecorder, NoopMetrics, TabletStats, COMMIT_LATENCY_US, COMMIT_RETRY_COUNT,
    COMMIT_VERSION_ID,
};
use crate::segment::{SegmentInfo, SegmentStatus};
use crate::tablet_data::TabletData;
use crate::types::{now_us, SchemaId, SegmentId, VersionId};
use crate::version::{
    remove_version_files, IndexTaskRequest, IndexTaskState, Version, ALTER_TABLE_TASK_TYPE,
    SCHEMA_ID_PARAM,
};
use parking_lot::Mutex;
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

#[derive(Debug, Default)]
struct CommitterState {
    operations: VecDeque<Operation>,
    sealed: bool,
    dump_error: Option<(SegmentId, String)>,
}

/// Folds queued intents into versions and commits them.
pub struct TabletCommitter {
    state: Mutex<CommitterState>,
    merge_coordinator: Option<Arc<dyn MergeCoordinator>>,
    metrics: Arc<dyn MetricsRecorder>,
    stats: Arc<TabletStats>,
}

impl TabletCommitter {
    /// Creates a committer with an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CommitterState::default()),
            merge_coordinator: None,
            metrics: Arc::new(NoopMetrics),
            stats: Arc::new(TabletStats::new()),
        }
    }

    /// Attaches a merge coordinator.
    #[must_use]
    pub fn with_merge_coordinator(mut self, coordinator: Arc<dyn MergeCoordinator>) -> Self {
        self.merge_coordinator = Some(coordinator);
        self
    }

    /// Reports commit metrics to `metrics`.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsRecorder>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Accumulates commit counters into `stats`.
    #[must_use]
    pub fn with_stats(mut self, stats: Arc<TabletStats>) -> Self {
        self.stats = stats;
        self
    }

    /// Adopts the sealed flag of a version loaded at open.
    pub fn init(&self, on_disk_version: &Version) {
        if on_disk_version.is_sealed() {
            self.state.lock().sealed = true;
        }
    }

    /// Returns true once a seal was recorded.
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.state.lock().sealed
    }

    /// Queues a dumped segment.
    pub fn push(&self, segment_id: SegmentId) {
        self.enqueue(Operation::Dump(segment_id));
    }

    /// Queues a seal. Later intents are ignored.
    pub fn seal(&self) {
        let mut state = self.state.lock();
        if state.sealed {
            debug!("tablet already sealed");
            return;
        }
        state.operations.push_back(Operation::Seal);
        state.sealed = true;
        info!("tablet sealed");
    }

    /// Queues a schema change.
    pub fn alter_table(&self, schema_id: SchemaId) {
        self.enqueue(Operation::AlterTable(schema_id));
    }

    /// Queues the import of `versions`.
    pub fn import(
        &self,
        versions: Vec<Version>,
        importer: impl Into<String>,
        options: ImportOptions,
    ) {
        self.enqueue(Operation::Import {
            versions,
            importer: importer.into(),
            options,
        });
    }

    /// Queues an index task change.
    pub fn handle_index_task(&self, request: IndexTaskRequest) {
        self.enqueue(Operation::IndexTask(request));
    }

    fn enqueue(&self, operation: Operation) {
        let mut state = self.state.lock();
        if state.sealed {
            warn!(operation = operation.kind(), "tablet is sealed, operation ignored");
            return;
        }
        state.operations.push_back(operation);
    }

    /// Records a failed dump; commits fail until it is cleared.
    pub fn set_dump_error(&self, segment_id: SegmentId, err: &CoreError) {
        error!(segment_id = %segment_id, error = %err, "dump failure recorded");
        self.state.lock().dump_error = Some((segment_id, err.to_string()));
    }

    /// Clears a recorded dump failure.
    pub fn clear_dump_error(&self) {
        self.state.lock().dump_error = None;
    }

    /// Number of queued operations.
    #[must_use]
    pub fn pending_operation_count(&self) -> usize {
        self.state.lock().operations.len()
    }

    /// Returns true if a commit would have something to do.
    #[must_use]
    pub fn need_commit(&self) -> bool {
        {
            let state = self.state.lock();
            if !state.operations.is_empty() || state.dump_error.is_some() {
                return true;
            }
        }
        self.merge_coordinator
            .as_ref()
            .is_some_and(|c| c.need_commit())
    }

    /// Drains the queue and derives the next version, without an id.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if a queued dump names a segment that is not
    /// built; the drained operations are put back in that case.
    pub fn generate_version_without_id(
        &self,
        tablet_data: &TabletData,
        fence_name: &str,
    ) -> CoreResult<Version> {
        let operations = self.drain();
        self.build_version(tablet_data, fence_name, &operations)
            .map(|(version, _)| version)
            .inspect_err(|_| self.restore(operations.clone()))
    }

    /// Commits the queued operations as a new version in `fence`.
    ///
    /// # Errors
    ///
    /// - `DumpFailed` if a dump failure was recorded
    /// - `Abort` if every attempt conflicted, or the requested id is taken
    /// - `InvalidArgs` if the requested id lies below ids already issued
    /// - `Internal` if the directory sync did not complete
    /// - any storage error of the publish
    pub fn commit(
        &self,
        tablet_data: &TabletData,
        fence: &Fence,
        retry_count: u32,
        id_generator: &IdGenerator,
        options: &CommitOptions,
    ) -> CoreResult<Version> {
        let start = Instant::now();
        let dump_error = self.state.lock().dump_error.clone();
        if let Some((segment_id, message)) = dump_error {
            return Err(CoreError::DumpFailed {
                segment_id: segment_id.as_i32(),
                message,
            });
        }

        let operations = self.drain();
        let mut conflicts = 0u32;
        let result = self
            .build_version(tablet_data, fence.name(), &operations)
            .and_then(|(skeleton, adopted_merge)| {
                self.publish(skeleton, fence, retry_count, id_generator, options, &mut conflicts)
                    .map(|version| (version, adopted_merge))
            });
        match result {
            Ok((version, adopted_merge)) => {
                let elapsed = start.elapsed();
                self.metrics.record(
                    COMMIT_LATENCY_US,
                    i64::try_from(elapsed.as_micros()).unwrap_or(i64::MAX),
                );
                self.metrics.record(COMMIT_RETRY_COUNT, i64::from(conflicts));
                self.metrics
                    .record(COMMIT_VERSION_ID, i64::from(version.version_id().as_i32()));
                self.stats.record_commit(u64::from(conflicts));
                if let (Some(coordinator), Some(merge)) = (&self.merge_coordinator, &adopted_merge)
                {
                    coordinator.on_committed(&version, merge);
                }
                info!(
                    version = %version.coord(),
                    segments = version.segment_count(),
                    operations = operations.len(),
                    "version committed"
                );
                Ok(version)
            }
            Err(err) => {
                self.stats.record_commit_failure(u64::from(conflicts));
                warn!(
                    error = %err,
                    conflicts,
                    operations = operations.len(),
                    "commit failed"
                );
                self.restore(operations);
                Err(err)
            }
        }
    }

    /// Assigns an id to `skeleton` and publishes it, counting id conflicts
    /// into `conflicts`.
    fn publish(
        &self,
        mut skeleton: Version,
        fence: &Fence,
        retry_count: u32,
        id_generator: &IdGenerator,
        options: &CommitOptions,
        conflicts: &mut u32,
    ) -> CoreResult<Version> {
        for (key, value) in &options.descriptions {
            skeleton.add_description(key.clone(), value.clone());
        }

        if let Some(target) = options.target_version_id {
            id_generator.update_base_version_id(target)?;
        }

        let outcome = with_bounded_retry(retry_count, |attempt| {
            let id = match options.target_version_id {
                Some(target) => target,
                None => id_generator.generate_version_id()?,
            };
            let mut version = skeleton.clone();
            version.set_version_id(id);
            version.set_commit_time(now_us());
            version.index_task_history_mut().stamp_finished(id);

            match fence.publish_version(&version) {
                Ok(()) => Ok(version),
                Err(err) if err.is_conflict() => {
                    *conflicts += 1;
                    warn!(attempt, version = %version.coord(), "version id taken");
                    if options.target_version_id.is_some() {
                        Err(CoreError::abort(format!(
                            "requested version {id} already exists in '{}'",
                            fence.name()
                        )))
                    } else {
                        Err(err)
                    }
                }
                Err(err) => Err(err),
            }
        });
        let version = outcome.into_result()?;

        let mut mirrored = false;
        let finished = finish_publish(fence, &version, options, &mut mirrored);
        if let Err(err) = finished {
            let directory = fence.directory().as_ref();
            let id = version.version_id();
            let mut locations = vec![fence.name()];
            if mirrored {
                locations.push(ROOT_FENCE_NAME);
            }
            for location in locations {
                if let Err(remove_err) = remove_version_files(directory, location, id) {
                    error!(
                        version = %version.coord(),
                        location,
                        error = %remove_err,
                        "could not withdraw unfinished version"
                    );
                }
            }
            warn!(version = %version.coord(), error = %err, "withdrew unfinished version");
            return Err(err);
        }
        Ok(version)
    }

    fn build_version(
        &self,
        tablet_data: &TabletData,
        fence_name: &str,
        operations: &[Operation],
    ) -> CoreResult<(Version, Option<MergedVersionInfo>)> {
        let on_disk = tablet_data.on_disk_version();
        let mut version = on_disk.clone();
        version.set_version_id(VersionId::INVALID);
        version.set_fence_name(fence_name);
        if on_disk.version_id().is_valid() {
            version.version_line_mut().add_parent(on_disk.coord());
        }

        let adopted = self
            .merge_coordinator
            .as_ref()
            .and_then(|c| c.merged_version_info());
        if let Some(merge) = &adopted {
            adopt_merge(&mut version, merge);
        }
        let empty = BTreeSet::new();
        let merged_away = adopted.as_ref().map_or(&empty, |merge| &merge.source_segments);

        let committed_high = on_disk.last_segment_id();
        let dump_high = operations.iter().filter_map(Operation::dumped_segment).max();
        if let Some(high) = dump_high {
            let mut newest: Option<&SegmentInfo> = None;
            for segment in tablet_data.segments() {
                let id = segment.info.segment_id;
                if id > high || id <= committed_high || merged_away.contains(&id) {
                    continue;
                }
                if segment.status != SegmentStatus::Built {
                    continue;
                }
                version.add_segment(id, segment.info.schema_id);
                version.set_segment_statistics(segment.info.to_statistics());
                newest = Some(&segment.info);
            }

            for id in operations.iter().filter_map(Operation::dumped_segment) {
                if id > committed_high && !merged_away.contains(&id) && !version.has_segment(id) {
                    return Err(CoreError::internal(format!(
                        "dumped segment {id} is not built and cannot be committed"
                    )));
                }
            }

            if high > version.last_segment_id() {
                version.set_last_segment_id(high);
            }
            if let Some(info) = newest {
                version.set_timestamp(info.timestamp);
                version.set_locator(info.locator);
            }
        }

        let now = now_us();
        for operation in operations {
            match operation {
                Operation::Dump(_) => {}
                Operation::Seal => version.set_sealed(true),
                Operation::AlterTable(schema_id) => version.set_schema_id(*schema_id),
                Operation::Import {
                    versions,
                    importer,
                    options,
                } => apply_import(&mut version, versions, importer, *options),
                Operation::IndexTask(request) => apply_index_task(&mut version, request, now),
            }
        }
        Ok((version, adopted))
    }

    fn drain(&self) -> Vec<Operation> {
        self.state.lock().operations.drain(..).collect()
    }

    fn restore(&self, operations: Vec<Operation>) {
        let mut state = self.state.lock();
        for operation in operations.into_iter().rev() {
            state.operations.push_front(operation);
        }
    }
}

impl Default for TabletCommitter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TabletCommitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("TabletCommitter")
            .field("pending", &state.operations.len())
            .field("sealed", &state.sealed)
            .field("dump_error", &state.dump_error)
            .finish_non_exhaustive()
    }
}

fn adopt_merge(version: &mut Version, merge: &MergedVersionInfo) {
    for id in &merge.source_segments {
        version.remove_segment(*id);
    }
    let target = &merge.target_version;
    for segment in target.segments() {
        if merge.source_segments.contains(&segment.segment_id) {
            continue;
        }
        if version.add_segment(segment.segment_id, segment.schema_id) {
            if let Some(stats) = target
                .segment_statistics()
                .iter()
                .find(|s| s.segment_id == segment.segment_id)
            {
                version.set_segment_statistics(stats.clone());
            }
        }
    }
    debug!(
        merged_version = %target.coord(),
        sources = merge.source_segments.len(),
        "adopted merged version"
    );
}

/// Mirrors and syncs a published version. `mirrored` is set once the root
/// copy exists.
fn finish_publish(
    fence: &Fence,
    version: &Version,
    options: &CommitOptions,
    mirrored: &mut bool,
) -> CoreResult<()> {
    if options.publish_to_root && !fence.name().is_empty() {
        fence.mirror_to_root(version)?;
        *mirrored = true;
    }
    let sync = fence.directory().sync()?;
    if !sync.is_completed() {
        return Err(CoreError::internal(format!(
            "version {} published but directory sync did not complete",
            version.coord()
        )));
    }
    Ok(())
}

fn apply_import(
    version: &mut Version,
    imported: &[Version],
    importer: &str,
    options: ImportOptions,
) {
    let mut newest: Option<&Version> = None;
    for source in imported {
        for segment in source.segments() {
            if version.add_segment(segment.segment_id, segment.schema_id) {
                if let Some(stats) = source
                    .segment_statistics()
                    .iter()
                    .find(|s| s.segment_id == segment.segment_id)
                {
                    version.set_segment_statistics(stats.clone());
                }
            }
        }
        if newest.map_or(true, |n| source.timestamp() > n.timestamp()) {
            newest = Some(source);
        }
    }

    if options.strategy == ImportStrategy::KeepSegmentOverwriteLocator {
        if let Some(source) = newest {
            version.set_timestamp(source.timestamp());
            version.set_locator(*source.locator());
        }
    }

    let ids: Vec<String> = imported.iter().map(|v| v.coord().to_string()).collect();
    version.add_description(format!("import.{importer}"), ids.join(","));
    debug!(importer, versions = imported.len(), "imported versions");
}

fn apply_index_task(version: &mut Version, request: &IndexTaskRequest, now: i64) {
    let state = version.index_task_history_mut().apply(request, now);
    if state != Some(IndexTaskState::Done) || request.task_type != ALTER_TABLE_TASK_TYPE {
        return;
    }
    let schema = version
        .index_task_history()
        .find(&request.task_type, &request.task_name)
        .and_then(|task| task.params.get(SCHEMA_ID_PARAM))
        .and_then(|raw| raw.parse::<SchemaId>().ok());
    match schema {
        Some(schema_id) => version.set_read_schema_id(schema_id),
        None => warn!(
            task_name = %request.task_name,
            "finished alter_table task carries no valid schema id"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ImportStrategy;
    use crate::fence::RangeInfo;
    use crate::metrics::InMemoryMetrics;
    use crate::types::{IdMaskType, PUBLIC_SEGMENT_ID_MASK, PUBLIC_VERSION_ID_MASK};
    use crate::version::{
        list_orphan_version_files, list_versions, load_version, IndexTaskAction, Locator,
    };
    use std::collections::BTreeMap;
    use std::path::Path;
    use tablet_storage::{Directory, InMemoryDirectory, StoreOptions};

    fn seg(raw: i32) -> SegmentId {
        SegmentId::new(PUBLIC_SEGMENT_ID_MASK + raw)
    }

    fn ver(raw: i32) -> VersionId {
        VersionId::new(PUBLIC_VERSION_ID_MASK + raw)
    }

    struct Harness {
        dir: Arc<InMemoryDirectory>,
        fence: Fence,
        data: TabletData,
        ids: IdGenerator,
    }

    impl Harness {
        fn new() -> Self {
            let dir = Arc::new(InMemoryDirectory::new());
            let fence = Fence::create(
                Arc::clone(&dir) as Arc<dyn Directory>,
                true,
                1,
                RangeInfo::full(),
            )
            .unwrap();
            Self {
                dir,
                fence,
                data: TabletData::default(),
                ids: IdGenerator::new(IdMaskType::BuildPublic),
            }
        }

        fn built(&mut self, raw: i32, offset: i64) -> SegmentId {
            let id = seg(raw);
            let mut info = SegmentInfo::new(id, 0);
            info.doc_count = 10;
            info.timestamp = offset * 100;
            info.locator = Locator::new(1, offset);
            info.store(self.dir.as_ref(), &self.fence.segment_path(id))
                .unwrap();
            self.data.add_built_segment(info);
            id
        }

        fn commit(&mut self, committer: &TabletCommitter) -> CoreResult<Version> {
            let version =
                committer.commit(&self.data, &self.fence, 3, &self.ids, &CommitOptions::new())?;
            self.data.set_on_disk_version(version.clone());
            Ok(version)
        }
    }

    #[test]
    fn pushed_segments_are_committed() {
        let mut h = Harness::new();
        let committer = TabletCommitter::new();
        for raw in 0..3 {
            let id = h.built(raw, i64::from(raw));
            committer.push(id);
        }
        assert!(committer.need_commit());

        let version = h.commit(&committer).unwrap();
        assert_eq!(version.version_id(), ver(0));
        assert_eq!(version.segment_count(), 3);
        assert_eq!(version.last_segment_id(), seg(2));
        assert_eq!(version.locator(), &Locator::new(1, 2));
        assert_eq!(version.fence_name(), h.fence.name());
        assert!(!committer.need_commit());

        let loaded = load_version(h.dir.as_ref(), h.fence.name(), ver(0)).unwrap();
        assert_eq!(loaded, version);
    }

    #[test]
    fn unpushed_segment_is_excluded() {
        let mut h = Harness::new();
        let committer = TabletCommitter::new();
        let first = h.built(0, 0);
        committer.push(first);
        h.built(1, 1);

        let version = h.commit(&committer).unwrap();
        assert!(version.has_segment(first));
        assert!(!version.has_segment(seg(1)));
        assert_eq!(version.last_segment_id(), first);
    }

    #[test]
    fn second_commit_derives_from_first() {
        let mut h = Harness::new();
        let committer = TabletCommitter::new();
        committer.push(h.built(0, 0));
        let v1 = h.commit(&committer).unwrap();

        committer.push(h.built(1, 1));
        let v2 = h.commit(&committer).unwrap();
        assert_eq!(v2.version_id(), ver(1));
        assert_eq!(v2.segment_count(), 2);
        assert_eq!(v2.version_line().parent(), Some(&v1.coord()));
        assert!(v2.version_line().can_fast_forward_from(&v1.coord()));
    }

    #[test]
    fn occupied_id_is_retried_with_next() {
        let mut h = Harness::new();
        let committer = TabletCommitter::new();
        let metrics = Arc::new(InMemoryMetrics::new());
        let committer = committer.with_metrics(Arc::clone(&metrics) as Arc<dyn MetricsRecorder>);

        let mut squatter = Version::new(ver(0));
        squatter.set_fence_name(h.fence.name());
        h.fence.publish_version(&squatter).unwrap();

        committer.push(h.built(0, 0));
        let version = h.commit(&committer).unwrap();
        assert_eq!(version.version_id(), ver(1));
        assert_eq!(metrics.last(COMMIT_RETRY_COUNT), Some(1));
        assert_eq!(metrics.last(COMMIT_VERSION_ID), Some(i64::from(ver(1).as_i32())));

        let occupant = load_version(h.dir.as_ref(), h.fence.name(), ver(0)).unwrap();
        assert_eq!(occupant, squatter);
    }

    #[test]
    fn orphan_version_file_is_a_conflict() {
        let mut h = Harness::new();
        let committer = TabletCommitter::new();
        h.dir
            .store(
                &h.fence.path_of(&format!("version.{}", ver(0))),
                b"{}",
                StoreOptions::default(),
            )
            .unwrap();

        committer.push(h.built(0, 0));
        assert_eq!(h.commit(&committer).unwrap().version_id(), ver(1));
    }

    #[test]
    fn exhausted_conflicts_abort_and_keep_operations() {
        let mut h = Harness::new();
        let committer = TabletCommitter::new();
        for raw in 0..2 {
            let mut squatter = Version::new(ver(raw));
            squatter.set_fence_name(h.fence.name());
            h.fence.publish_version(&squatter).unwrap();
        }
        let id = h.built(0, 0);
        committer.push(id);

        let err = h.commit_with_retry(&committer, 2).unwrap_err();
        assert!(matches!(err, CoreError::Abort { .. }));
        assert_eq!(committer.pending_operation_count(), 1);

        let version = h.commit(&committer).unwrap();
        assert_eq!(version.version_id(), ver(2));
        assert!(version.has_segment(id));
    }

    impl Harness {
        fn commit_with_retry(&self, committer: &TabletCommitter, retry: u32) -> CoreResult<Version> {
            committer.commit(&self.data, &self.fence, retry, &self.ids, &CommitOptions::new())
        }
    }

    #[test]
    fn target_id_conflict_aborts_immediately() {
        let mut h = Harness::new();
        let committer = TabletCommitter::new();
        let mut squatter = Version::new(ver(5));
        squatter.set_fence_name(h.fence.name());
        h.fence.publish_version(&squatter).unwrap();
        committer.push(h.built(0, 0));

        let options = CommitOptions::new().target_version_id(ver(5));
        let err = committer
            .commit(&h.data, &h.fence, 3, &h.ids, &options)
            .unwrap_err();
        assert!(matches!(err, CoreError::Abort { .. }));
        assert_eq!(h.ids.get_next_version_id(), ver(6));
    }

    #[test]
    fn target_id_below_issued_is_invalid() {
        let mut h = Harness::new();
        let committer = TabletCommitter::new();
        committer.push(h.built(0, 0));
        h.commit(&committer).unwrap();

        committer.alter_table(1);
        let options = CommitOptions::new().target_version_id(ver(0));
        let err = committer
            .commit(&h.data, &h.fence, 3, &h.ids, &options)
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgs { .. }));
    }

    #[test]
    fn dump_error_blocks_commit() {
        let mut h = Harness::new();
        let committer = TabletCommitter::new();
        committer.push(h.built(0, 0));
        committer.set_dump_error(seg(1), &CoreError::internal("disk full"));
        assert!(committer.need_commit());

        let err = h.commit(&committer).unwrap_err();
        assert!(matches!(err, CoreError::DumpFailed { .. }));
        assert!(!h.dir.is_exist(&h.fence.path_of(&format!("version.{}", ver(0)))).unwrap());

        committer.clear_dump_error();
        assert_eq!(h.commit(&committer).unwrap().segment_count(), 1);
    }

    #[test]
    fn incomplete_sync_is_internal_error() {
        let mut h = Harness::new();
        let committer = TabletCommitter::new();
        committer.push(h.built(0, 0));
        h.dir.set_incomplete_sync(true);
        assert!(matches!(
            h.commit(&committer),
            Err(CoreError::Internal { .. })
        ));
        assert_eq!(committer.pending_operation_count(), 1);
        assert!(!h.dir.is_exist(&h.fence.path_of(&format!("version.{}", ver(0)))).unwrap());
        assert!(list_versions(h.dir.as_ref(), h.fence.name()).unwrap().is_empty());
        assert!(list_orphan_version_files(h.dir.as_ref(), h.fence.name())
            .unwrap()
            .is_empty());

        h.dir.set_incomplete_sync(false);
        let version = h.commit(&committer).unwrap();
        assert_eq!(version.segment_count(), 1);
        assert_eq!(
            list_versions(h.dir.as_ref(), h.fence.name()).unwrap(),
            vec![version.version_id()]
        );
    }

    #[test]
    fn failed_root_mirror_withdraws_fence_version() {
        let mut h = Harness::new();
        let committer = TabletCommitter::new();
        let squatter = Version::new(ver(0));
        Fence::open(Arc::clone(&h.dir) as Arc<dyn Directory>, ROOT_FENCE_NAME)
            .publish_version(&squatter)
            .unwrap();
        committer.push(h.built(0, 0));

        let options = CommitOptions::new().publish_to_root(true);
        let err = committer
            .commit(&h.data, &h.fence, 3, &h.ids, &options)
            .unwrap_err();
        assert!(err.is_conflict());
        assert!(list_versions(h.dir.as_ref(), h.fence.name()).unwrap().is_empty());
        assert_eq!(load_version(h.dir.as_ref(), ROOT_FENCE_NAME, ver(0)).unwrap(), squatter);
        assert_eq!(committer.pending_operation_count(), 1);
    }

    #[test]
    fn exhausted_conflicts_are_counted() {
        let h = Harness::new();
        let stats = Arc::new(TabletStats::new());
        let committer = TabletCommitter::new().with_stats(Arc::clone(&stats));
        for raw in 0..3 {
            let mut squatter = Version::new(ver(raw));
            squatter.set_fence_name(h.fence.name());
            h.fence.publish_version(&squatter).unwrap();
        }

        assert!(h.commit_with_retry(&committer, 3).is_err());
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.commit_failures, 1);
        assert_eq!(snapshot.commit_conflicts, 3);
        assert_eq!(snapshot.commits, 0);
    }

    #[test]
    fn unbuilt_dumped_segment_is_internal_error() {
        let mut h = Harness::new();
        let committer = TabletCommitter::new();
        h.data.add_building_segment(SegmentInfo::new(seg(0), 0));
        committer.push(seg(0));
        assert!(matches!(
            committer.generate_version_without_id(&h.data, h.fence.name()),
            Err(CoreError::Internal { .. })
        ));
        assert_eq!(committer.pending_operation_count(), 1);
    }

    #[test]
    fn seal_ignores_later_operations() {
        let mut h = Harness::new();
        let committer = TabletCommitter::new();
        committer.seal();
        committer.alter_table(3);
        committer.push(seg(0));
        assert_eq!(committer.pending_operation_count(), 1);

        let version = h.commit(&committer).unwrap();
        assert!(version.is_sealed());
        assert_eq!(version.schema_id(), 0);

        let reopened = TabletCommitter::new();
        reopened.init(&version);
        assert!(reopened.is_sealed());
    }

    #[test]
    fn alter_table_and_index_task_done() {
        let mut h = Harness::new();
        let committer = TabletCommitter::new();
        committer.alter_table(2);
        let params = BTreeMap::from([(SCHEMA_ID_PARAM.to_string(), "2".to_string())]);
        committer.handle_index_task(IndexTaskRequest {
            task_type: ALTER_TABLE_TASK_TYPE.to_string(),
            task_name: "to_v2".to_string(),
            params,
            action: IndexTaskAction::Add,
            comment: String::new(),
        });
        let v1 = h.commit(&committer).unwrap();
        assert_eq!(v1.schema_id(), 2);
        assert_eq!(v1.read_schema_id(), 0);
        assert_eq!(v1.schema_version_road_map(), &[0, 2]);

        committer.handle_index_task(IndexTaskRequest {
            task_type: ALTER_TABLE_TASK_TYPE.to_string(),
            task_name: "to_v2".to_string(),
            params: BTreeMap::new(),
            action: IndexTaskAction::Done,
            comment: "built".to_string(),
        });
        let v2 = h.commit(&committer).unwrap();
        assert_eq!(v2.read_schema_id(), 2);
        let task = v2
            .index_task_history()
            .find(ALTER_TABLE_TASK_TYPE, "to_v2")
            .unwrap();
        assert_eq!(task.state, IndexTaskState::Done);
        assert_eq!(task.finished_in, Some(v2.version_id()));
    }

    #[test]
    fn import_overwrites_locator_when_asked() {
        let mut h = Harness::new();
        let committer = TabletCommitter::new();
        h.dir
            .make_directory(Path::new("segment_7_level_0"))
            .unwrap();
        let mut imported = Version::new(VersionId::new(9));
        imported.add_segment(SegmentId::new(7), 0);
        imported.set_timestamp(500);
        imported.set_locator(Locator::new(2, 77));

        committer.import(
            vec![imported.clone()],
            "bulkload",
            ImportOptions::new(ImportStrategy::KeepSegmentOverwriteLocator),
        );
        let version = h.commit(&committer).unwrap();
        assert!(version.has_segment(SegmentId::new(7)));
        assert_eq!(version.locator(), &Locator::new(2, 77));
        assert_eq!(version.descriptions()["import.bulkload"], "9@root");

        committer.import(
            vec![imported],
            "bulkload",
            ImportOptions::new(ImportStrategy::KeepSegmentIgnoreLocator),
        );
        committer.push(h.built(0, 3));
        let next = h.commit(&committer).unwrap();
        assert_eq!(next.locator(), &Locator::new(1, 3));
    }

    struct FixedMerge {
        info: Mutex<Option<MergedVersionInfo>>,
        committed: Mutex<Vec<(VersionId, usize)>>,
    }

    impl MergeCoordinator for FixedMerge {
        fn need_commit(&self) -> bool {
            self.info.lock().is_some()
        }

        fn merged_version_info(&self) -> Option<MergedVersionInfo> {
            self.info.lock().clone()
        }

        fn on_committed(&self, version: &Version, merge: &MergedVersionInfo) {
            self.info.lock().take();
            self.committed
                .lock()
                .push((version.version_id(), merge.source_segments.len()));
        }
    }

    #[test]
    fn merged_version_is_adopted() {
        let mut h = Harness::new();
        let merge = Arc::new(FixedMerge {
            info: Mutex::new(None),
            committed: Mutex::new(Vec::new()),
        });
        let committer = TabletCommitter::new()
            .with_merge_coordinator(Arc::clone(&merge) as Arc<dyn MergeCoordinator>);
        committer.push(h.built(0, 0));
        committer.push(h.built(1, 1));
        h.commit(&committer).unwrap();

        let merged_id = SegmentId::new(0);
        SegmentInfo::new(merged_id, 0)
            .store(h.dir.as_ref(), &h.fence.segment_path(merged_id))
            .unwrap();
        let mut target = Version::new(VersionId::new(1));
        target.add_segment(merged_id, 0);
        *merge.info.lock() = Some(MergedVersionInfo {
            target_version: target,
            source_segments: BTreeSet::from([seg(0), seg(1)]),
        });
        assert!(committer.need_commit());

        committer.push(h.built(2, 2));
        let version = h.commit(&committer).unwrap();
        let ids: Vec<_> = version.segment_ids().collect();
        assert_eq!(ids, vec![merged_id, seg(2)]);
        assert_eq!(merge.committed.lock().as_slice(), &[(version.version_id(), 2)]);
        assert!(!committer.need_commit());

        committer.push(h.built(3, 3));
        h.commit(&committer).unwrap();
        assert_eq!(merge.committed.lock().len(), 1);
    }

    #[test]
    fn publish_to_root_mirrors_version() {
        let mut h = Harness::new();
        let committer = TabletCommitter::new();
        committer.push(h.built(0, 0));
        let options = CommitOptions::new().publish_to_root(true).description("k", "v");
        let version = committer
            .commit(&h.data, &h.fence, 3, &h.ids, &options)
            .unwrap();
        let mirrored = load_version(h.dir.as_ref(), "", version.version_id()).unwrap();
        assert_eq!(mirrored, version);
        assert_eq!(mirrored.descriptions()["k"], "v");
    }
}
