//! In-memory view of a tablet: the on-disk version plus live segments.

use crate::error::{CoreError, CoreResult};
use crate::fence::FenceDirFinder;
use crate::segment::{SegmentInfo, SegmentStatus};
use crate::types::SegmentId;
use crate::version::{list_segments, Version};
use std::collections::BTreeMap;
use tablet_storage::Directory;
use tracing::debug;

/// A segment as the writer currently sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabletSegment {
    /// Segment metadata.
    pub info: SegmentInfo,
    /// Lifecycle status.
    pub status: SegmentStatus,
}

/// The committed version a writer builds on, and every segment it knows.
#[derive(Debug, Clone, Default)]
pub struct TabletData {
    on_disk_version: Version,
    segments: BTreeMap<SegmentId, TabletSegment>,
}

impl TabletData {
    /// Creates tablet data for `on_disk_version` without loading segments.
    #[must_use]
    pub fn new(on_disk_version: Version) -> Self {
        Self {
            on_disk_version,
            segments: BTreeMap::new(),
        }
    }

    /// Loads the segment infos of `version` through its fence.
    ///
    /// # Errors
    ///
    /// Returns `Corruption` if a segment of the version is missing, or the
    /// error of reading its info.
    pub fn open(directory: &dyn Directory, version: Version) -> CoreResult<Self> {
        let mut data = Self::new(Version::default());
        {
            let finder = FenceDirFinder::new(directory, version.fence_name());
            for segment_id in version.segment_ids() {
                let info = SegmentInfo::load(directory, &finder.segment_path(segment_id)?)?;
                data.segments.insert(
                    segment_id,
                    TabletSegment {
                        info,
                        status: SegmentStatus::Built,
                    },
                );
            }
        }
        data.on_disk_version = version;
        Ok(data)
    }

    /// Returns the committed version.
    #[must_use]
    pub fn on_disk_version(&self) -> &Version {
        &self.on_disk_version
    }

    /// Replaces the committed version after a successful commit.
    pub fn set_on_disk_version(&mut self, version: Version) {
        self.on_disk_version = version;
    }

    /// Registers a segment the writer started building.
    pub fn add_building_segment(&mut self, info: SegmentInfo) {
        self.segments.insert(
            info.segment_id,
            TabletSegment {
                info,
                status: SegmentStatus::Building,
            },
        );
    }

    /// Moves a known segment forward to `status`, replacing its info.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgs` for an unknown segment and `Internal` for a
    /// backward transition.
    pub fn update_segment(&mut self, info: SegmentInfo, status: SegmentStatus) -> CoreResult<()> {
        let segment = self.segments.get_mut(&info.segment_id).ok_or_else(|| {
            CoreError::invalid_args(format!("unknown segment {}", info.segment_id))
        })?;
        if status < segment.status {
            return Err(CoreError::internal(format!(
                "segment {} cannot move from {:?} back to {status:?}",
                info.segment_id, segment.status
            )));
        }
        segment.status = status;
        segment.info = info;
        Ok(())
    }

    /// Registers a segment that was dumped, for example by a dumper
    /// running outside this tablet data.
    pub fn add_built_segment(&mut self, info: SegmentInfo) {
        self.segments.insert(
            info.segment_id,
            TabletSegment {
                info,
                status: SegmentStatus::Built,
            },
        );
    }

    /// Forgets a segment.
    pub fn remove_segment(&mut self, segment_id: SegmentId) -> Option<TabletSegment> {
        self.segments.remove(&segment_id)
    }

    /// Returns a segment by id.
    #[must_use]
    pub fn segment(&self, segment_id: SegmentId) -> Option<&TabletSegment> {
        self.segments.get(&segment_id)
    }

    /// Returns all segments in id order.
    pub fn segments(&self) -> impl Iterator<Item = &TabletSegment> {
        self.segments.values()
    }

    /// Lists segment directories in `fence` that the committed version does
    /// not know and that lie above its high-water mark.
    ///
    /// These are leftovers of dumps or commits interrupted by a restart;
    /// they must not be adopted into a version.
    ///
    /// # Errors
    ///
    /// Returns an error if the fence cannot be listed.
    pub fn suspect_segments(
        &self,
        directory: &dyn Directory,
        fence: &str,
    ) -> CoreResult<Vec<SegmentId>> {
        let version = &self.on_disk_version;
        let high_water = version.last_segment_id();
        let suspects: Vec<SegmentId> = list_segments(directory, fence)?
            .into_iter()
            .filter(|id| !version.has_segment(*id))
            .filter(|id| {
                !high_water.is_valid() || (id.role() == high_water.role() && *id > high_water)
            })
            .collect();
        if !suspects.is_empty() {
            debug!(fence = %fence, count = suspects.len(), "found suspect segments");
        }
        Ok(suspects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{VersionId, PUBLIC_SEGMENT_ID_MASK};
    use std::path::Path;
    use tablet_storage::InMemoryDirectory;

    fn seg(raw: i32) -> SegmentId {
        SegmentId::new(PUBLIC_SEGMENT_ID_MASK + raw)
    }

    #[test]
    fn open_loads_infos_across_fences() {
        let dir = InMemoryDirectory::new();
        let mut info = SegmentInfo::new(seg(0), 0);
        info.doc_count = 3;
        info.store(&dir, Path::new("segment_536870912_level_0")).unwrap();
        SegmentInfo::new(seg(1), 0)
            .store(&dir, Path::new("f/segment_536870913_level_0"))
            .unwrap();

        let mut version = Version::new(VersionId::new(1));
        version.set_fence_name("f");
        version.add_segment(seg(0), 0);
        version.add_segment(seg(1), 0);

        let data = TabletData::open(&dir, version).unwrap();
        assert_eq!(data.segments().count(), 2);
        assert_eq!(data.segment(seg(0)).unwrap().info.doc_count, 3);
        assert_eq!(data.segment(seg(1)).unwrap().status, SegmentStatus::Built);
    }

    #[test]
    fn open_fails_on_missing_segment() {
        let dir = InMemoryDirectory::new();
        let mut version = Version::new(VersionId::new(1));
        version.add_segment(seg(4), 0);
        assert!(TabletData::open(&dir, version).is_err());
    }

    #[test]
    fn segment_status_moves_forward() {
        let mut data = TabletData::default();
        data.add_building_segment(SegmentInfo::new(seg(0), 0));
        data.update_segment(SegmentInfo::new(seg(0), 0), SegmentStatus::Built)
            .unwrap();
        assert_eq!(data.segment(seg(0)).unwrap().status, SegmentStatus::Built);
        assert!(data
            .update_segment(SegmentInfo::new(seg(0), 0), SegmentStatus::Dumping)
            .is_err());
        assert!(data
            .update_segment(SegmentInfo::new(seg(9), 0), SegmentStatus::Built)
            .is_err());
    }

    #[test]
    fn suspects_lie_above_high_water_mark() {
        let dir = InMemoryDirectory::new();
        for raw in 0..4 {
            dir.make_directory(&Path::new("f").join(format!(
                "segment_{}_level_0",
                PUBLIC_SEGMENT_ID_MASK + raw
            )))
            .unwrap();
        }
        let mut version = Version::new(VersionId::new(1));
        version.add_segment(seg(0), 0);
        version.set_last_segment_id(seg(1));

        let data = TabletData::new(version);
        assert_eq!(
            data.suspect_segments(&dir, "f").unwrap(),
            vec![seg(2), seg(3)]
        );
    }
}
