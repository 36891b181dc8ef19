//! Segments: immutable units of built data.
//!
//! A segment is created in memory (`Building`), flushed to its fence by a
//! [`SegmentDumper`] (`Dumping`) and becomes eligible for a version once it
//! is `Built`. Status never moves backward.
//!
//! ## Segment Directory Format
//!
//! ```text
//! segment_<id>_level_0/
//! ├─ segment_info              # JSON SegmentInfo
//! ├─ index/<name>              # one file per dump item, or
//! ├─ attribute/<name>
//! ├─ package_file.__data__0    # all items packed, when packaging is on
//! └─ package_file.__meta__
//! ```

mod dump_control;
mod dump_item;
mod dumper;

pub use dump_control::DumpControl;
pub use dump_item::{DumpItem, DumpItemKind, PackageEntry, PackageFileWriter};
pub use dumper::{SegmentDumper, PARALLEL_DUMP_MIN_ITEMS};

use crate::error::{CoreError, CoreResult, ParseError};
use crate::layout::SEGMENT_INFO_FILE;
use crate::types::{SchemaId, SegmentId};
use crate::version::{Locator, SegmentStatistics};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tablet_storage::{Directory, StoreOptions};

/// Lifecycle status of a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SegmentStatus {
    /// Accepting documents in memory.
    Building,
    /// Being flushed to durable storage.
    Dumping,
    /// Durable and immutable.
    Built,
}

impl SegmentStatus {
    /// Returns the status following `self`, if any.
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Building => Some(Self::Dumping),
            Self::Dumping => Some(Self::Built),
            Self::Built => None,
        }
    }

    /// Moves to `target`, which must be the next status.
    ///
    /// # Errors
    ///
    /// Returns `Internal` for any other transition.
    pub fn advance_to(&mut self, target: Self) -> CoreResult<()> {
        if self.next() != Some(target) {
            return Err(CoreError::internal(format!(
                "illegal segment status transition {self:?} -> {target:?}"
            )));
        }
        *self = target;
        Ok(())
    }
}

/// How a segment lays its dump items out on disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentWriteMode {
    /// One file per dump item.
    #[default]
    Separate,
    /// All items packed into one data file plus a meta file.
    Package,
}

/// Durable metadata of a segment (`segment_info`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentInfo {
    /// Segment id.
    pub segment_id: SegmentId,
    /// Schema the segment was built with.
    pub schema_id: SchemaId,
    /// Number of documents.
    pub doc_count: u64,
    /// Source timestamp of the newest document.
    pub timestamp: i64,
    /// Source locator after the newest document.
    pub locator: Locator,
    /// Named integer statistics as `(min, max)`.
    #[serde(default)]
    pub statistics: BTreeMap<String, (i64, i64)>,
}

impl SegmentInfo {
    /// Creates the info of an empty segment.
    #[must_use]
    pub fn new(segment_id: SegmentId, schema_id: SchemaId) -> Self {
        Self {
            segment_id,
            schema_id,
            doc_count: 0,
            timestamp: -1,
            locator: Locator::new(0, -1),
            statistics: BTreeMap::new(),
        }
    }

    /// Folds a named value into the statistics.
    pub fn observe(&mut self, name: &str, value: i64) {
        self.statistics
            .entry(name.to_string())
            .and_modify(|(min, max)| {
                *min = (*min).min(value);
                *max = (*max).max(value);
            })
            .or_insert((value, value));
    }

    /// Returns the statistics entry a version keeps for this segment.
    #[must_use]
    pub fn to_statistics(&self) -> SegmentStatistics {
        SegmentStatistics {
            segment_id: self.segment_id,
            doc_count: self.doc_count,
            integer_stats: self.statistics.clone(),
        }
    }

    /// Persists the info into `segment_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the store fails.
    pub fn store(&self, directory: &dyn Directory, segment_dir: &Path) -> CoreResult<()> {
        let json = serde_json::to_string_pretty(self).map_err(ParseError::from)?;
        directory.store(
            &segment_dir.join(SEGMENT_INFO_FILE),
            json.as_bytes(),
            StoreOptions::overwrite(),
        )?;
        Ok(())
    }

    /// Loads the info from `segment_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or malformed.
    pub fn load(directory: &dyn Directory, segment_dir: &Path) -> CoreResult<Self> {
        let bytes = directory.load(&segment_dir.join(SEGMENT_INFO_FILE))?;
        let info: Self = serde_json::from_slice(&bytes).map_err(ParseError::from)?;
        Ok(info)
    }
}

/// A segment that is still accepting data, together with its pending dump work.
#[derive(Debug)]
pub struct BuildingSegment {
    info: SegmentInfo,
    status: SegmentStatus,
    write_mode: SegmentWriteMode,
    items: Vec<DumpItem>,
}

impl BuildingSegment {
    /// Creates an empty building segment.
    #[must_use]
    pub fn new(info: SegmentInfo) -> Self {
        Self {
            info,
            status: SegmentStatus::Building,
            write_mode: SegmentWriteMode::Separate,
            items: Vec::new(),
        }
    }

    /// Selects how items are written.
    #[must_use]
    pub fn with_write_mode(mut self, mode: SegmentWriteMode) -> Self {
        self.write_mode = mode;
        self
    }

    /// Returns the segment id.
    #[must_use]
    pub fn segment_id(&self) -> SegmentId {
        self.info.segment_id
    }

    /// Returns the segment info.
    #[must_use]
    pub fn info(&self) -> &SegmentInfo {
        &self.info
    }

    /// Returns the segment info for modification.
    pub fn info_mut(&mut self) -> &mut SegmentInfo {
        &mut self.info
    }

    /// Returns the current status.
    #[must_use]
    pub fn status(&self) -> SegmentStatus {
        self.status
    }

    /// Returns the write mode.
    #[must_use]
    pub fn write_mode(&self) -> SegmentWriteMode {
        self.write_mode
    }

    /// Queues a unit of dump work.
    pub fn add_item(&mut self, item: DumpItem) {
        self.items.push(item);
    }

    /// Number of queued dump items.
    #[must_use]
    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    pub(crate) fn set_status(&mut self, target: SegmentStatus) -> CoreResult<()> {
        self.status.advance_to(target)
    }

    pub(crate) fn take_dump_items(&mut self) -> Vec<DumpItem> {
        std::mem::take(&mut self.items)
    }

    pub(crate) fn into_info(self) -> SegmentInfo {
        self.info
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tablet_storage::InMemoryDirectory;

    #[test]
    fn status_moves_forward_only() {
        let mut status = SegmentStatus::Building;
        status.advance_to(SegmentStatus::Dumping).unwrap();
        assert!(status.advance_to(SegmentStatus::Building).is_err());
        assert!(status.advance_to(SegmentStatus::Dumping).is_err());
        status.advance_to(SegmentStatus::Built).unwrap();
        assert_eq!(status.next(), None);
    }

    #[test]
    fn building_cannot_skip_dumping() {
        let mut status = SegmentStatus::Building;
        assert!(matches!(
            status.advance_to(SegmentStatus::Built),
            Err(CoreError::Internal { .. })
        ));
    }

    #[test]
    fn statistics_track_min_max() {
        let mut info = SegmentInfo::new(SegmentId::new(1), 0);
        info.observe("price", 10);
        info.observe("price", -3);
        info.observe("price", 7);
        assert_eq!(info.statistics["price"], (-3, 10));
        assert_eq!(info.to_statistics().integer_stats["price"], (-3, 10));
    }

    #[test]
    fn segment_info_store_load() {
        let dir = InMemoryDirectory::new();
        let mut info = SegmentInfo::new(SegmentId::new(4), 2);
        info.doc_count = 12;
        info.locator = Locator::new(1, 99);

        let seg_dir = Path::new("f/segment_4_level_0");
        info.store(&dir, seg_dir).unwrap();
        assert_eq!(SegmentInfo::load(&dir, seg_dir).unwrap(), info);
    }

    #[test]
    fn building_segment_hands_out_items_once() {
        let mut segment = BuildingSegment::new(SegmentInfo::new(SegmentId::new(1), 0));
        segment.add_item(DumpItem::new(DumpItemKind::Index, "pk", vec![1]));
        segment.add_item(DumpItem::new(DumpItemKind::Summary, "data", vec![2]));
        assert_eq!(segment.item_count(), 2);
        assert_eq!(segment.take_dump_items().len(), 2);
        assert!(segment.take_dump_items().is_empty());
    }
}
