//! Fences: writer-epoch directories.
//!
//! Every writer generation publishes into its own fence directory, so a
//! writer that failed over can never overwrite files of its successor.
//! Fence names encode everything the cleaner needs to judge them:
//!
//! ```text
//! __FENCE__{pub|pri}_{timestamp_us}_{range_from}_{range_to}
//! ```
//!
//! The tablet root acts as a fence with the empty name; public versions
//! are mirrored there.

use crate::error::{CoreError, CoreResult, ParseError};
use crate::layout::{self, in_fence};
use crate::types::SegmentId;
use crate::version::{DeployMeta, EntryTable, Version};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tablet_storage::{Directory, StoreOptions};
use tracing::debug;

/// Prefix shared by all fence directory names.
pub const FENCE_DIR_PREFIX: &str = "__FENCE__";

/// Name of the tablet root when used as a fence.
pub const ROOT_FENCE_NAME: &str = "";

/// Inclusive shard range a fence builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RangeInfo {
    /// First shard (inclusive).
    pub from: u32,
    /// Last shard (inclusive).
    pub to: u32,
}

impl RangeInfo {
    /// Creates a range.
    #[must_use]
    pub const fn new(from: u32, to: u32) -> Self {
        Self { from, to }
    }

    /// The whole shard space.
    #[must_use]
    pub const fn full() -> Self {
        Self::new(0, 65535)
    }
}

impl Default for RangeInfo {
    fn default() -> Self {
        Self::full()
    }
}

impl fmt::Display for RangeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.from, self.to)
    }
}

/// Decoded fence name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FenceMeta {
    /// Directory name of the fence.
    pub name: String,
    /// Whether the fence belongs to a public writer.
    pub is_public: bool,
    /// Creation time in microseconds.
    pub timestamp_us: i64,
    /// Shard range the writer builds.
    pub range: RangeInfo,
}

impl FenceMeta {
    /// Encodes a fence name.
    #[must_use]
    pub fn encode_name(is_public: bool, timestamp_us: i64, range: RangeInfo) -> String {
        let role = if is_public { "pub" } else { "pri" };
        format!(
            "{FENCE_DIR_PREFIX}{role}_{timestamp_us}_{}_{}",
            range.from, range.to
        )
    }

    /// Parses a fence directory name.
    ///
    /// # Errors
    ///
    /// Returns `InvalidName` if `name` does not follow the fence encoding.
    pub fn parse(name: &str) -> Result<Self, ParseError> {
        let invalid = || ParseError::invalid_name("fence", name);
        let body = name.strip_prefix(FENCE_DIR_PREFIX).ok_or_else(invalid)?;
        let mut parts = body.split('_');

        let is_public = match parts.next() {
            Some("pub") => true,
            Some("pri") => false,
            _ => return Err(invalid()),
        };
        let timestamp_us: i64 = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(invalid)?;
        let from: u32 = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(invalid)?;
        let to: u32 = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(invalid)?;
        if parts.next().is_some() || from > to {
            return Err(invalid());
        }

        Ok(Self {
            name: name.to_string(),
            is_public,
            timestamp_us,
            range: RangeInfo::new(from, to),
        })
    }
}

/// Returns true if `name` looks like a fence directory.
#[must_use]
pub fn is_fence_name(name: &str) -> bool {
    name.starts_with(FENCE_DIR_PREFIX)
}

/// Lists and decodes all fences at the tablet root.
///
/// Entries that carry the fence prefix but fail to decode are reported as
/// corruption: guessing their epoch could delete a live writer's data.
///
/// # Errors
///
/// Returns an error if the root cannot be listed or a fence name is malformed.
pub fn list_fences(directory: &dyn Directory) -> CoreResult<Vec<FenceMeta>> {
    let mut fences = Vec::new();
    for name in directory.list_dir(Path::new(ROOT_FENCE_NAME))? {
        if !is_fence_name(&name) {
            continue;
        }
        let meta = FenceMeta::parse(&name)
            .map_err(|e| CoreError::corruption(format!("unreadable fence directory: {e}")))?;
        fences.push(meta);
    }
    fences.sort_by(|a, b| a.timestamp_us.cmp(&b.timestamp_us).then(a.name.cmp(&b.name)));
    Ok(fences)
}

/// A writer's epoch directory, with the operations that publish into it.
#[derive(Clone)]
pub struct Fence {
    directory: Arc<dyn Directory>,
    name: String,
}

impl Fence {
    /// Creates a new fence directory for a writer epoch.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn create(
        directory: Arc<dyn Directory>,
        is_public: bool,
        timestamp_us: i64,
        range: RangeInfo,
    ) -> CoreResult<Self> {
        let name = FenceMeta::encode_name(is_public, timestamp_us, range);
        directory.make_directory(Path::new(&name))?;
        debug!(fence = %name, "created fence");
        Ok(Self { directory, name })
    }

    /// Opens an existing fence (or the root with [`ROOT_FENCE_NAME`]).
    #[must_use]
    pub fn open(directory: Arc<dyn Directory>, name: impl Into<String>) -> Self {
        Self {
            directory,
            name: name.into(),
        }
    }

    /// Returns the fence directory name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the directory the fence lives in.
    #[must_use]
    pub fn directory(&self) -> &Arc<dyn Directory> {
        &self.directory
    }

    /// Returns the path of `name` inside this fence.
    #[must_use]
    pub fn path_of(&self, name: &str) -> PathBuf {
        in_fence(&self.name, name)
    }

    /// Returns the directory of a segment built in this fence.
    #[must_use]
    pub fn segment_path(&self, segment_id: SegmentId) -> PathBuf {
        self.path_of(&layout::segment_dir_name(segment_id))
    }

    /// Publishes a version and its companions into this fence.
    ///
    /// The version file is the commit point: it is stored without overwrite,
    /// so of two writers racing for one id exactly one succeeds and the other
    /// gets an `Exist` conflict. Companions are written afterward.
    ///
    /// # Errors
    ///
    /// Returns `Exist` if the version id is taken, or a storage error.
    pub fn publish_version(&self, version: &Version) -> CoreResult<()> {
        publish_version_files(self.directory.as_ref(), &self.name, version, &self.name)
    }

    /// Mirrors a version published in this fence at the tablet root.
    ///
    /// # Errors
    ///
    /// Returns `Exist` if the root already holds that version id.
    pub fn mirror_to_root(&self, version: &Version) -> CoreResult<()> {
        publish_version_files(self.directory.as_ref(), ROOT_FENCE_NAME, version, &self.name)
    }
}

impl fmt::Debug for Fence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fence").field("name", &self.name).finish_non_exhaustive()
    }
}

fn publish_version_files(
    directory: &dyn Directory,
    target_fence: &str,
    version: &Version,
    segment_fence: &str,
) -> CoreResult<()> {
    let id = version.version_id();
    let version_path = in_fence(target_fence, &layout::version_file_name(id));
    if crate::version::version_exists(directory, target_fence, id)? {
        return Err(CoreError::exist(format!(
            "{} already published",
            version_path.display()
        )));
    }

    let content = version.to_json()?;
    directory
        .store(&version_path, content.as_bytes(), StoreOptions::no_overwrite())
        .map_err(|e| {
            if e.is_already_exists() {
                CoreError::exist(format!("{} already published", version_path.display()))
            } else {
                e.into()
            }
        })?;

    let entry_table = EntryTable::build(directory, version, segment_fence)?;
    directory.store(
        &in_fence(target_fence, &layout::entry_table_file_name(id)),
        entry_table.to_json()?.as_bytes(),
        StoreOptions::overwrite(),
    )?;

    let deploy_meta = DeployMeta::build(version, content.as_bytes());
    directory.store(
        &in_fence(target_fence, &layout::deploy_meta_file_name(id)),
        deploy_meta.to_json()?.as_bytes(),
        StoreOptions::overwrite(),
    )?;
    Ok(())
}

/// Locates the fence that physically holds each segment of a version.
///
/// Segments are looked up in the version's own fence, then at the tablet
/// root, then in the other fences from newest to oldest: a writer that took
/// over a tablet keeps referencing segments its predecessors dumped.
pub struct FenceDirFinder<'a> {
    directory: &'a dyn Directory,
    fence_name: &'a str,
}

impl<'a> FenceDirFinder<'a> {
    /// Creates a finder for versions published from `fence_name`.
    #[must_use]
    pub fn new(directory: &'a dyn Directory, fence_name: &'a str) -> Self {
        Self {
            directory,
            fence_name,
        }
    }

    /// Returns the fence name holding `segment_id`, or `None` if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if existence cannot be determined or the fences
    /// cannot be listed.
    pub fn locate_segment(&self, segment_id: SegmentId) -> CoreResult<Option<String>> {
        let dir_name = layout::segment_dir_name(segment_id);
        if !self.fence_name.is_empty()
            && self.directory.is_exist(&in_fence(self.fence_name, &dir_name))?
        {
            return Ok(Some(self.fence_name.to_string()));
        }
        if self.directory.is_exist(&in_fence(ROOT_FENCE_NAME, &dir_name))? {
            return Ok(Some(ROOT_FENCE_NAME.to_string()));
        }
        for fence in list_fences(self.directory)?.into_iter().rev() {
            if fence.name != self.fence_name
                && self.directory.is_exist(&in_fence(&fence.name, &dir_name))?
            {
                return Ok(Some(fence.name));
            }
        }
        Ok(None)
    }

    /// Returns the full segment path, failing if the segment is missing.
    ///
    /// # Errors
    ///
    /// Returns `Corruption` if the segment exists in no fence.
    pub fn segment_path(&self, segment_id: SegmentId) -> CoreResult<PathBuf> {
        match self.locate_segment(segment_id)? {
            Some(fence) => Ok(in_fence(&fence, &layout::segment_dir_name(segment_id))),
            None => Err(CoreError::corruption(format!(
                "segment {segment_id} not found from fence '{}'",
                self.fence_name
            ))),
        }
    }
}
