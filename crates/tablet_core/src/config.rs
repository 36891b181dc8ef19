//! Tablet configuration.

use crate::error::ParseError;
use crate::types::VersionId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Options of one clean pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanOptions {
    /// Newest public versions always kept (at least one).
    pub keep_version_count: u32,
    /// Versions committed within this many hours are kept (0 disables).
    pub keep_version_hour: u64,
    /// Highest version id the caller knows to be committed; newer ones are kept.
    pub current_max_version_id: VersionId,
    /// Fences this close (in microseconds) to the newest fence of their range are kept.
    pub fence_ts_tolerant_deviation_us: i64,
    /// Clean even when no more than `keep_version_count` versions exist.
    pub ignore_keep_version_count: bool,
}

impl Default for CleanOptions {
    fn default() -> Self {
        Self {
            keep_version_count: 2,
            keep_version_hour: 0,
            current_max_version_id: VersionId::INVALID,
            fence_ts_tolerant_deviation_us: 3_600 * 1_000_000,
            ignore_keep_version_count: false,
        }
    }
}

impl CleanOptions {
    /// Creates options with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of newest versions to keep, clamped to at least one.
    #[must_use]
    pub const fn keep_version_count(mut self, count: u32) -> Self {
        self.keep_version_count = if count == 0 { 1 } else { count };
        self
    }

    /// Sets the age window, in hours, of versions to keep.
    #[must_use]
    pub const fn keep_version_hour(mut self, hours: u64) -> Self {
        self.keep_version_hour = hours;
        self
    }

    /// Sets the highest version id known to be committed.
    #[must_use]
    pub const fn current_max_version_id(mut self, id: VersionId) -> Self {
        self.current_max_version_id = id;
        self
    }

    /// Sets the fence timestamp tolerance.
    #[must_use]
    pub const fn fence_ts_tolerant_deviation_us(mut self, deviation: i64) -> Self {
        self.fence_ts_tolerant_deviation_us = deviation;
        self
    }

    /// Sets whether to clean regardless of the version count.
    #[must_use]
    pub const fn ignore_keep_version_count(mut self, value: bool) -> Self {
        self.ignore_keep_version_count = value;
        self
    }
}

/// Options of one commit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitOptions {
    /// Publish under exactly this id; a conflict then aborts instead of retrying.
    pub target_version_id: Option<VersionId>,
    /// Also publish the version at the tablet root.
    pub publish_to_root: bool,
    /// Descriptions stamped onto the version.
    pub descriptions: BTreeMap<String, String>,
}

impl CommitOptions {
    /// Creates options with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requires the version to be published under `id`.
    #[must_use]
    pub fn target_version_id(mut self, id: VersionId) -> Self {
        self.target_version_id = Some(id);
        self
    }

    /// Sets whether the version is mirrored at the tablet root.
    #[must_use]
    pub fn publish_to_root(mut self, value: bool) -> Self {
        self.publish_to_root = value;
        self
    }

    /// Adds a description.
    #[must_use]
    pub fn description(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.descriptions.insert(key.into(), value.into());
        self
    }
}

/// Options of a segment dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DumpOptions {
    /// Upper bound of threads working on one dump.
    pub thread_count: usize,
}

impl Default for DumpOptions {
    fn default() -> Self {
        Self { thread_count: 1 }
    }
}

impl DumpOptions {
    /// Creates options with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the thread bound.
    #[must_use]
    pub const fn thread_count(mut self, count: usize) -> Self {
        self.thread_count = count;
        self
    }
}

/// How imported versions treat the locator of the importing tablet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportStrategy {
    /// Keep imported segments and the current locator.
    #[default]
    KeepSegmentIgnoreLocator,
    /// Keep imported segments and take the newest imported locator.
    KeepSegmentOverwriteLocator,
}

/// Options of a version import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportOptions {
    /// Locator handling.
    pub strategy: ImportStrategy,
}

impl ImportOptions {
    /// Creates options with the given strategy.
    #[must_use]
    pub const fn new(strategy: ImportStrategy) -> Self {
        Self { strategy }
    }
}

/// Tablet-wide settings, loadable from JSON.
///
/// Missing fields take their default values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TabletConfig {
    /// See [`CleanOptions::keep_version_count`].
    pub keep_version_count: u32,
    /// See [`CleanOptions::keep_version_hour`].
    pub keep_version_hour: u64,
    /// See [`CleanOptions::fence_ts_tolerant_deviation_us`].
    pub fence_ts_tolerant_deviation_us: i64,
    /// Attempts a commit makes before giving up on id conflicts.
    pub commit_retry_count: u32,
    /// See [`DumpOptions::thread_count`].
    pub dump_thread_count: usize,
    /// Mirror every committed version at the tablet root.
    pub publish_to_root: bool,
}

impl Default for TabletConfig {
    fn default() -> Self {
        let clean = CleanOptions::default();
        Self {
            keep_version_count: clean.keep_version_count,
            keep_version_hour: clean.keep_version_hour,
            fence_ts_tolerant_deviation_us: clean.fence_ts_tolerant_deviation_us,
            commit_retry_count: 3,
            dump_thread_count: DumpOptions::default().thread_count,
            publish_to_root: false,
        }
    }
}

impl TabletConfig {
    /// Parses a JSON configuration document.
    ///
    /// # Errors
    ///
    /// Returns `Json` if the document is malformed.
    pub fn from_json(json: &str) -> Result<Self, ParseError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Clean options for a pass that knows `current_max_version_id`.
    #[must_use]
    pub fn clean_options(&self, current_max_version_id: VersionId) -> CleanOptions {
        CleanOptions::new()
            .keep_version_count(self.keep_version_count)
            .keep_version_hour(self.keep_version_hour)
            .fence_ts_tolerant_deviation_us(self.fence_ts_tolerant_deviation_us)
            .current_max_version_id(current_max_version_id)
    }

    /// Dump options.
    #[must_use]
    pub fn dump_options(&self) -> DumpOptions {
        DumpOptions::new().thread_count(self.dump_thread_count)
    }

    /// Commit options.
    #[must_use]
    pub fn commit_options(&self) -> CommitOptions {
        CommitOptions::new().publish_to_root(self.publish_to_root)
    }
}
