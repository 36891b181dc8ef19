//! Tablet directory layout.
//!
//! ```text
//! <root>/
//! ├─ version.<id>                  # public versions mirrored at the root
//! ├─ entry_table.<id>
//! ├─ patch_index_<schema_id>/      # patch segments of schema changes
//! └─ __FENCE__pub_<ts>_<from>_<to>/
//!    ├─ version.<id>               # serialized Version
//!    ├─ entry_table.<id>           # logical name -> physical location
//!    ├─ deploy_meta.<id>           # file list + version digest
//!    └─ segment_<id>_level_0/
//!       ├─ segment_info
//!       └─ index/ attribute/ summary/ source/ deletionmap/
//! ```
//!
//! A version "exists" only if its version file and at least one companion
//! (entry table or deploy meta) are present.

use crate::error::ParseError;
use crate::types::{SchemaId, SegmentId, VersionId};
use std::path::{Path, PathBuf};

/// Prefix of version files.
pub const VERSION_FILE_PREFIX: &str = "version.";
/// Prefix of entry table files.
pub const ENTRY_TABLE_PREFIX: &str = "entry_table.";
/// Prefix of deploy meta files.
pub const DEPLOY_META_PREFIX: &str = "deploy_meta.";
/// Name of the per-segment metadata file.
pub const SEGMENT_INFO_FILE: &str = "segment_info";
/// Prefix of patch index directories.
pub const PATCH_INDEX_DIR_PREFIX: &str = "patch_index_";

const SEGMENT_DIR_PREFIX: &str = "segment_";
const SEGMENT_DIR_SUFFIX: &str = "_level_0";

/// Returns the version file name for `id`.
#[must_use]
pub fn version_file_name(id: VersionId) -> String {
    format!("{VERSION_FILE_PREFIX}{}", id.as_i32())
}

/// Returns the entry table file name for `id`.
#[must_use]
pub fn entry_table_file_name(id: VersionId) -> String {
    format!("{ENTRY_TABLE_PREFIX}{}", id.as_i32())
}

/// Returns the deploy meta file name for `id`.
#[must_use]
pub fn deploy_meta_file_name(id: VersionId) -> String {
    format!("{DEPLOY_META_PREFIX}{}", id.as_i32())
}

/// Returns the directory name of a segment.
#[must_use]
pub fn segment_dir_name(id: SegmentId) -> String {
    format!("{SEGMENT_DIR_PREFIX}{}{SEGMENT_DIR_SUFFIX}", id.as_i32())
}

/// Returns the patch index directory name of a schema.
#[must_use]
pub fn patch_index_dir_name(schema_id: SchemaId) -> String {
    format!("{PATCH_INDEX_DIR_PREFIX}{schema_id}")
}

fn parse_id_with_prefix(name: &str, prefix: &str, kind: &'static str) -> Result<i32, ParseError> {
    let raw = name
        .strip_prefix(prefix)
        .ok_or_else(|| ParseError::invalid_name(kind, name))?;
    let id: i32 = raw
        .parse()
        .map_err(|_| ParseError::invalid_name(kind, name))?;
    if id < 0 {
        return Err(ParseError::invalid_name(kind, name));
    }
    Ok(id)
}

/// Parses `version.<id>`.
///
/// # Errors
///
/// Returns `InvalidName` if `name` is not a version file name.
pub fn parse_version_file_name(name: &str) -> Result<VersionId, ParseError> {
    parse_id_with_prefix(name, VERSION_FILE_PREFIX, "version file").map(VersionId::new)
}

/// Parses `segment_<id>_level_0`.
///
/// # Errors
///
/// Returns `InvalidName` if `name` is not a segment directory name.
pub fn parse_segment_dir_name(name: &str) -> Result<SegmentId, ParseError> {
    let trimmed = name
        .strip_suffix(SEGMENT_DIR_SUFFIX)
        .ok_or_else(|| ParseError::invalid_name("segment directory", name))?;
    parse_id_with_prefix(trimmed, SEGMENT_DIR_PREFIX, "segment directory").map(SegmentId::new)
}

/// Parses `patch_index_<schema_id>`.
///
/// # Errors
///
/// Returns `InvalidName` if `name` is not a patch index directory name.
pub fn parse_patch_index_dir_name(name: &str) -> Result<SchemaId, ParseError> {
    name.strip_prefix(PATCH_INDEX_DIR_PREFIX)
        .and_then(|raw| raw.parse().ok())
        .ok_or_else(|| ParseError::invalid_name("patch index directory", name))
}

/// Joins a fence-relative name onto a fence directory (empty = tablet root).
#[must_use]
pub fn in_fence(fence_name: &str, name: &str) -> PathBuf {
    Path::new(fence_name).join(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        let v = VersionId::new(0x2000_0003);
        assert_eq!(parse_version_file_name(&version_file_name(v)).unwrap(), v);

        let s = SegmentId::new(17);
        assert_eq!(segment_dir_name(s), "segment_17_level_0");
        assert_eq!(parse_segment_dir_name("segment_17_level_0").unwrap(), s);

        assert_eq!(parse_patch_index_dir_name(&patch_index_dir_name(4)).unwrap(), 4);
    }

    #[test]
    fn foreign_names_rejected() {
        assert!(parse_version_file_name("version.abc").is_err());
        assert!(parse_version_file_name("version.-1").is_err());
        assert!(parse_version_file_name("entry_table.1").is_err());
        assert!(parse_segment_dir_name("segment_1_level_1").is_err());
        assert!(parse_segment_dir_name("segment_x_level_0").is_err());
        assert!(parse_patch_index_dir_name("patch_index_").is_err());
    }

    #[test]
    fn root_fence_paths() {
        assert_eq!(in_fence("", "version.1"), PathBuf::from("version.1"));
        assert_eq!(in_fence("f", "version.1"), PathBuf::from("f/version.1"));
    }
}
