//! Versions: immutable, numbered snapshots of a tablet.
//!
//! A version records which segments form a consistent snapshot, how far the
//! source stream had been consumed (timestamp and locator), the schema
//! lineage, pending background index tasks and the version it was derived
//! from. Versions are created by the committer, persisted as JSON
//! (`version.<id>`) next to an entry table and a deploy meta, and reclaimed
//! by the cleaner once nothing references them.

mod coord;
mod index_task;
mod loader;
mod meta;
mod version_line;

pub use coord::VersionCoord;
pub use index_task::{
    IndexTaskAction, IndexTaskHistory, IndexTaskMeta, IndexTaskRequest, IndexTaskState,
    ALTER_TABLE_TASK_TYPE, MAX_FINISHED_INDEX_TASKS, SCHEMA_ID_PARAM,
};
pub use loader::{
    list_orphan_version_files, list_segments, list_versions, load_latest_version, load_version,
    remove_version_files, version_exists,
};
pub use meta::{DeployFile, DeployMeta, EntryTable};
pub use version_line::{VersionLine, MAX_VERSION_LINE_LENGTH};

use crate::error::ParseError;
use crate::types::{SchemaId, SegmentId, VersionId, DEFAULT_SCHEMA_ID};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Current on-disk format of version files.
pub const VERSION_FORMAT: u32 = 2;

/// Progress marker into the source stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locator {
    /// Source identifier.
    pub src: u64,
    /// Offset consumed in the source (`-1` when nothing was consumed).
    pub offset: i64,
}

impl Locator {
    /// Creates a locator.
    #[must_use]
    pub const fn new(src: u64, offset: i64) -> Self {
        Self { src, offset }
    }

    /// Returns true if this locator is at least as far as `other` in the same source.
    #[must_use]
    pub fn is_covering(&self, other: &Locator) -> bool {
        self.src == other.src && self.offset >= other.offset
    }
}

/// A segment reference inside a version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentInVersion {
    /// Segment id.
    pub segment_id: SegmentId,
    /// Schema the segment was built with.
    pub schema_id: SchemaId,
}

/// Statistics of one segment merged into the version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentStatistics {
    /// Segment id.
    pub segment_id: SegmentId,
    /// Number of documents.
    pub doc_count: u64,
    /// Named integer statistics as `(min, max)`.
    #[serde(default)]
    pub integer_stats: BTreeMap<String, (i64, i64)>,
}

/// Immutable description of a consistent tablet snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    format_version: u32,
    version_id: VersionId,
    segments: Vec<SegmentInVersion>,
    last_segment_id: SegmentId,
    #[serde(default)]
    timestamp: i64,
    #[serde(default)]
    locator: Locator,
    #[serde(default)]
    commit_time: i64,
    #[serde(default)]
    fence_name: String,
    #[serde(default)]
    schema_id: SchemaId,
    #[serde(default)]
    read_schema_id: SchemaId,
    #[serde(default)]
    schema_version_road_map: Vec<SchemaId>,
    #[serde(default)]
    index_task_history: IndexTaskHistory,
    #[serde(default)]
    descriptions: BTreeMap<String, String>,
    #[serde(default)]
    version_line: VersionLine,
    #[serde(default)]
    segment_statistics: Vec<SegmentStatistics>,
    #[serde(default)]
    sealed: bool,
}

impl Default for Version {
    fn default() -> Self {
        Self::new(VersionId::INVALID)
    }
}

impl Version {
    /// Creates an empty version.
    #[must_use]
    pub fn new(version_id: VersionId) -> Self {
        Self {
            format_version: VERSION_FORMAT,
            version_id,
            segments: Vec::new(),
            last_segment_id: SegmentId::INVALID,
            timestamp: -1,
            locator: Locator::new(0, -1),
            commit_time: 0,
            fence_name: String::new(),
            schema_id: DEFAULT_SCHEMA_ID,
            read_schema_id: DEFAULT_SCHEMA_ID,
            schema_version_road_map: Vec::new(),
            index_task_history: IndexTaskHistory::new(),
            descriptions: BTreeMap::new(),
            version_line: VersionLine::default(),
            segment_statistics: Vec::new(),
            sealed: false,
        }
    }

    /// Returns the version id ([`VersionId::INVALID`] before commit).
    #[must_use]
    pub const fn version_id(&self) -> VersionId {
        self.version_id
    }

    /// Assigns the version id.
    pub fn set_version_id(&mut self, id: VersionId) {
        self.version_id = id;
    }

    /// Returns the coordinate of this version.
    #[must_use]
    pub fn coord(&self) -> VersionCoord {
        VersionCoord::new(self.version_id, self.fence_name.clone())
    }

    /// Returns the segments, ordered by id.
    #[must_use]
    pub fn segments(&self) -> &[SegmentInVersion] {
        &self.segments
    }

    /// Returns the segment ids, ordered.
    pub fn segment_ids(&self) -> impl Iterator<Item = SegmentId> + '_ {
        self.segments.iter().map(|s| s.segment_id)
    }

    /// Number of segments.
    #[must_use]
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Returns true if `segment_id` is part of this version.
    #[must_use]
    pub fn has_segment(&self, segment_id: SegmentId) -> bool {
        self.segments
            .binary_search_by_key(&segment_id, |s| s.segment_id)
            .is_ok()
    }

    /// Adds a segment. Returns false if it was already present.
    pub fn add_segment(&mut self, segment_id: SegmentId, schema_id: SchemaId) -> bool {
        match self
            .segments
            .binary_search_by_key(&segment_id, |s| s.segment_id)
        {
            Ok(_) => false,
            Err(pos) => {
                self.segments.insert(
                    pos,
                    SegmentInVersion {
                        segment_id,
                        schema_id,
                    },
                );
                true
            }
        }
    }

    /// Removes a segment and its statistics. Returns false if absent.
    pub fn remove_segment(&mut self, segment_id: SegmentId) -> bool {
        match self
            .segments
            .binary_search_by_key(&segment_id, |s| s.segment_id)
        {
            Ok(pos) => {
                self.segments.remove(pos);
                self.segment_statistics
                    .retain(|s| s.segment_id != segment_id);
                true
            }
            Err(_) => false,
        }
    }

    /// Returns the ids of segments produced by merges.
    #[must_use]
    pub fn merged_segments(&self) -> BTreeSet<SegmentId> {
        self.segment_ids().filter(|id| id.is_merged()).collect()
    }

    /// Returns the segment high-water mark.
    #[must_use]
    pub const fn last_segment_id(&self) -> SegmentId {
        self.last_segment_id
    }

    /// Sets the segment high-water mark.
    pub fn set_last_segment_id(&mut self, id: SegmentId) {
        self.last_segment_id = id;
    }

    /// Returns the source timestamp.
    #[must_use]
    pub const fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Sets the source timestamp.
    pub fn set_timestamp(&mut self, timestamp: i64) {
        self.timestamp = timestamp;
    }

    /// Returns the source locator.
    #[must_use]
    pub fn locator(&self) -> &Locator {
        &self.locator
    }

    /// Sets the source locator.
    pub fn set_locator(&mut self, locator: Locator) {
        self.locator = locator;
    }

    /// Returns the commit time in microseconds.
    #[must_use]
    pub const fn commit_time(&self) -> i64 {
        self.commit_time
    }

    /// Sets the commit time in microseconds.
    pub fn set_commit_time(&mut self, commit_time_us: i64) {
        self.commit_time = commit_time_us;
    }

    /// Returns the owning fence name.
    #[must_use]
    pub fn fence_name(&self) -> &str {
        &self.fence_name
    }

    /// Sets the owning fence name.
    pub fn set_fence_name(&mut self, name: impl Into<String>) {
        self.fence_name = name.into();
    }

    /// Returns the write schema id.
    #[must_use]
    pub const fn schema_id(&self) -> SchemaId {
        self.schema_id
    }

    /// Switches the write schema and records it in the road map.
    pub fn set_schema_id(&mut self, schema_id: SchemaId) {
        if self.schema_version_road_map.is_empty() {
            self.schema_version_road_map.push(self.schema_id);
        }
        if !self.schema_version_road_map.contains(&schema_id) {
            self.schema_version_road_map.push(schema_id);
        }
        self.schema_id = schema_id;
    }

    /// Returns the schema readers should use.
    #[must_use]
    pub const fn read_schema_id(&self) -> SchemaId {
        self.read_schema_id
    }

    /// Sets the schema readers should use.
    pub fn set_read_schema_id(&mut self, schema_id: SchemaId) {
        self.read_schema_id = schema_id;
    }

    /// Returns all schema ids this version has passed through, oldest first.
    #[must_use]
    pub fn schema_version_road_map(&self) -> &[SchemaId] {
        &self.schema_version_road_map
    }

    /// Returns the index task history.
    #[must_use]
    pub fn index_task_history(&self) -> &IndexTaskHistory {
        &self.index_task_history
    }

    /// Returns the index task history for modification.
    pub fn index_task_history_mut(&mut self) -> &mut IndexTaskHistory {
        &mut self.index_task_history
    }

    /// Returns the descriptions.
    #[must_use]
    pub fn descriptions(&self) -> &BTreeMap<String, String> {
        &self.descriptions
    }

    /// Adds or replaces a description.
    pub fn add_description(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.descriptions.insert(key.into(), value.into());
    }

    /// Returns the version line.
    #[must_use]
    pub fn version_line(&self) -> &VersionLine {
        &self.version_line
    }

    /// Returns the version line for modification.
    pub fn version_line_mut(&mut self) -> &mut VersionLine {
        &mut self.version_line
    }

    /// Returns per-segment statistics.
    #[must_use]
    pub fn segment_statistics(&self) -> &[SegmentStatistics] {
        &self.segment_statistics
    }

    /// Adds or replaces the statistics of a segment.
    pub fn set_segment_statistics(&mut self, stats: SegmentStatistics) {
        match self
            .segment_statistics
            .binary_search_by_key(&stats.segment_id, |s| s.segment_id)
        {
            Ok(pos) => self.segment_statistics[pos] = stats,
            Err(pos) => self.segment_statistics.insert(pos, stats),
        }
    }

    /// Returns true once the tablet was sealed.
    #[must_use]
    pub const fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Marks the tablet sealed.
    pub fn set_sealed(&mut self, sealed: bool) {
        self.sealed = sealed;
    }

    /// Serializes the version to JSON.
    ///
    /// # Errors
    ///
    /// Returns `Json` if serialization fails.
    pub fn to_json(&self) -> Result<String, ParseError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parses a version from JSON.
    ///
    /// # Errors
    ///
    /// Returns `Json` if the document is malformed.
    pub fn from_json(json: &str) -> Result<Self, ParseError> {
        let mut version: Self = serde_json::from_str(json)?;
        version
            .segments
            .sort_by_key(|s| s.segment_id);
        version
            .segments
            .dedup_by_key(|s| s.segment_id);
        Ok(version)
    }
}
