//! Test fixtures and tablet helpers.
//!
//! Provides a writer-side tablet (fence, id generator, tablet data and
//! committer) over an in-memory or temporary file-system directory.

use std::path::PathBuf;
use std::sync::Arc;
use tablet_core::{
    BuildingSegment, CommitOptions, CoreResult, DumpItem, DumpItemKind, Executor, Fence,
    IdGenerator, IdMaskType, InlineExecutor, Locator, RangeInfo, SegmentDumper, SegmentId,
    SegmentInfo, TabletCommitter, TabletData, Version, VersionCleaner,
};
use tablet_storage::{Directory, FsDirectory, InMemoryDirectory};
use tempfile::TempDir;
use tracing::debug;

/// Commit attempts used by [`TestTablet::commit`].
pub const TEST_RETRY_COUNT: u32 = 3;

/// A single writer over a test directory.
pub struct TestTablet {
    /// Directory the tablet lives in.
    pub directory: Arc<dyn Directory>,
    /// Fence of the current writer epoch.
    pub fence: Fence,
    /// Id generator of the writer.
    pub ids: IdGenerator,
    /// Segments known to the writer and the committed version.
    pub data: TabletData,
    /// Committer of the writer.
    pub committer: TabletCommitter,
    memory: Option<Arc<InMemoryDirectory>>,
    _temp_dir: Option<TempDir>,
}

impl TestTablet {
    /// Creates a public writer over an in-memory directory.
    pub fn memory() -> Self {
        let memory = Arc::new(InMemoryDirectory::new());
        let directory = Arc::clone(&memory) as Arc<dyn Directory>;
        let mut tablet = Self::with_directory(directory, 1);
        tablet.memory = Some(memory);
        tablet
    }

    /// Creates a public writer over a temporary directory on disk.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let directory = FsDirectory::open(temp_dir.path()).expect("Failed to open directory");
        let mut tablet = Self::with_directory(Arc::new(directory), 1);
        tablet._temp_dir = Some(temp_dir);
        tablet
    }

    /// Creates a public writer whose fence carries `timestamp_us`.
    pub fn with_directory(directory: Arc<dyn Directory>, timestamp_us: i64) -> Self {
        let fence = Fence::create(Arc::clone(&directory), true, timestamp_us, RangeInfo::full())
            .expect("Failed to create fence");
        Self {
            directory,
            fence,
            ids: IdGenerator::new(IdMaskType::BuildPublic),
            data: TabletData::default(),
            committer: TabletCommitter::new(),
            memory: None,
            _temp_dir: None,
        }
    }

    /// Returns the in-memory directory, for fault injection.
    pub fn memory_directory(&self) -> Option<&Arc<InMemoryDirectory>> {
        self.memory.as_ref()
    }

    /// Returns the root path if file-based, None if in-memory.
    pub fn path(&self) -> Option<PathBuf> {
        self._temp_dir.as_ref().map(|d| d.path().to_path_buf())
    }

    /// Builds and dumps a segment without telling the committer.
    pub fn dump_segment(&mut self, items: Vec<DumpItem>, offset: i64) -> CoreResult<SegmentId> {
        self.dump_segment_with(&InlineExecutor, 1, items, offset)
    }

    /// Builds and dumps a segment on `executor` without telling the committer.
    pub fn dump_segment_with(
        &mut self,
        executor: &dyn Executor,
        thread_count: usize,
        items: Vec<DumpItem>,
        offset: i64,
    ) -> CoreResult<SegmentId> {
        let segment_id = self.ids.get_next_segment_id();
        let mut info = SegmentInfo::new(segment_id, 0);
        info.doc_count = items.len() as u64;
        info.timestamp = offset * 1_000;
        info.locator = Locator::new(0, offset);

        let mut segment = BuildingSegment::new(info);
        for item in items {
            segment.add_item(item);
        }
        self.data.add_building_segment(segment.info().clone());

        let info = SegmentDumper::new(&self.fence, segment)?.dump(executor, thread_count)?;
        self.data.add_built_segment(info);
        self.ids.commit_next_segment_id();
        debug!(segment_id = %segment_id, "test segment dumped");
        Ok(segment_id)
    }

    /// Builds, dumps and pushes a segment.
    pub fn build_segment(&mut self, offset: i64) -> CoreResult<SegmentId> {
        let segment_id = self.dump_segment(sample_items(2), offset)?;
        self.committer.push(segment_id);
        Ok(segment_id)
    }

    /// Commits queued operations and adopts the new version.
    pub fn commit(&mut self) -> CoreResult<Version> {
        self.commit_with(&CommitOptions::new())
    }

    /// Commits with explicit options and adopts the new version.
    pub fn commit_with(&mut self, options: &CommitOptions) -> CoreResult<Version> {
        let version = self.committer.commit(
            &self.data,
            &self.fence,
            TEST_RETRY_COUNT,
            &self.ids,
            options,
        )?;
        self.data.set_on_disk_version(version.clone());
        Ok(version)
    }

    /// Starts a new writer epoch: a fresh fence, generator and committer
    /// seeded from the committed version.
    pub fn restart(&mut self, timestamp_us: i64) {
        let on_disk = self.data.on_disk_version().clone();
        self.fence = Fence::create(
            Arc::clone(&self.directory),
            true,
            timestamp_us,
            RangeInfo::full(),
        )
        .expect("Failed to create fence");
        self.ids = IdGenerator::new(IdMaskType::BuildPublic);
        self.ids.update_base_version(&on_disk);
        self.committer = TabletCommitter::new();
        self.committer.init(&on_disk);
        self.data = TabletData::new(on_disk);
    }

    /// Returns a cleaner over this tablet's directory.
    pub fn cleaner(&self) -> VersionCleaner {
        VersionCleaner::new(Arc::clone(&self.directory))
    }
}

/// Returns `count` small attribute items.
pub fn sample_items(count: usize) -> Vec<DumpItem> {
    (0..count)
        .map(|i| DumpItem::new(DumpItemKind::Attribute, format!("field_{i}"), vec![i as u8; 16]))
        .collect()
}

/// Runs a test with a temporary in-memory tablet.
pub fn with_memory_tablet<F, R>(f: F) -> R
where
    F: FnOnce(&mut TestTablet) -> R,
{
    let mut tablet = TestTablet::memory();
    f(&mut tablet)
}

/// Runs a test with a temporary file-based tablet.
pub fn with_file_tablet<F, R>(f: F) -> R
where
    F: FnOnce(&mut TestTablet) -> R,
{
    let mut tablet = TestTablet::file();
    f(&mut tablet)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tablet_core::version::load_version;

    #[test]
    fn memory_tablet_commits() {
        with_memory_tablet(|tablet| {
            let id = tablet.build_segment(1).unwrap();
            let version = tablet.commit().unwrap();
            assert!(version.has_segment(id));
            assert!(tablet.memory_directory().is_some());
        });
    }

    #[test]
    fn file_tablet_persists_versions() {
        with_file_tablet(|tablet| {
            assert!(tablet.path().is_some());
            tablet.build_segment(1).unwrap();
            let version = tablet.commit().unwrap();
            let loaded = load_version(
                tablet.directory.as_ref(),
                tablet.fence.name(),
                version.version_id(),
            )
            .unwrap();
            assert_eq!(loaded, version);
        });
    }

    #[test]
    fn restart_continues_ids() {
        let mut tablet = TestTablet::memory();
        let first = tablet.build_segment(1).unwrap();
        let v1 = tablet.commit().unwrap();

        tablet.restart(10);
        let second = tablet.build_segment(2).unwrap();
        assert!(second > first);
        let v2 = tablet.commit().unwrap();
        assert!(v2.version_id() > v1.version_id());
        assert!(v2.has_segment(first));
        assert!(v2.has_segment(second));
        assert_eq!(v2.fence_name(), tablet.fence.name());
    }
}
