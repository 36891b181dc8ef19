//! Reading versions and segments back from a fence.

use super::{DeployMeta, Version};
use crate::error::{CoreError, CoreResult};
use crate::layout::{self, in_fence};
use crate::types::{SegmentId, VersionId};
use tablet_storage::Directory;

/// Returns true if the version file and at least one companion exist.
///
/// # Errors
///
/// Returns an error if existence cannot be determined.
pub fn version_exists(directory: &dyn Directory, fence: &str, id: VersionId) -> CoreResult<bool> {
    if !directory.is_exist(&in_fence(fence, &layout::version_file_name(id)))? {
        return Ok(false);
    }
    Ok(
        directory.is_exist(&in_fence(fence, &layout::entry_table_file_name(id)))?
            || directory.is_exist(&in_fence(fence, &layout::deploy_meta_file_name(id)))?,
    )
}

fn version_files(directory: &dyn Directory, fence: &str) -> CoreResult<Vec<VersionId>> {
    let mut ids: Vec<VersionId> = directory
        .list_dir(&in_fence(fence, ""))?
        .iter()
        .filter_map(|name| layout::parse_version_file_name(name).ok())
        .collect();
    ids.sort();
    Ok(ids)
}

/// Lists the ids of all existing versions in a fence, ascending.
///
/// # Errors
///
/// Returns an error if the fence cannot be listed.
pub fn list_versions(directory: &dyn Directory, fence: &str) -> CoreResult<Vec<VersionId>> {
    let mut ids = Vec::new();
    for id in version_files(directory, fence)? {
        if version_exists(directory, fence, id)? {
            ids.push(id);
        }
    }
    Ok(ids)
}

/// Lists version files without any companion (interrupted publishes).
///
/// # Errors
///
/// Returns an error if the fence cannot be listed.
pub fn list_orphan_version_files(
    directory: &dyn Directory,
    fence: &str,
) -> CoreResult<Vec<VersionId>> {
    let mut ids = Vec::new();
    for id in version_files(directory, fence)? {
        if !version_exists(directory, fence, id)? {
            ids.push(id);
        }
    }
    Ok(ids)
}

/// Loads and validates a version.
///
/// When a deploy meta is present its digest is checked against the version
/// file, and the decoded id must match the file name.
///
/// # Errors
///
/// Returns `Corruption` on a digest or id mismatch, `Parse` on malformed
/// JSON, or a storage error if the file cannot be read.
pub fn load_version(directory: &dyn Directory, fence: &str, id: VersionId) -> CoreResult<Version> {
    let content = directory.load(&in_fence(fence, &layout::version_file_name(id)))?;

    let meta_path = in_fence(fence, &layout::deploy_meta_file_name(id));
    if directory.is_exist(&meta_path)? {
        let meta_bytes = directory.load(&meta_path)?;
        let meta = DeployMeta::from_json(&String::from_utf8_lossy(&meta_bytes))?;
        meta.verify(&content)?;
    }

    let text = std::str::from_utf8(&content)
        .map_err(|_| CoreError::corruption(format!("version {id} in '{fence}' is not utf-8")))?;
    let version = Version::from_json(text)?;
    if version.version_id() != id {
        return Err(CoreError::corruption(format!(
            "version file {id} in '{fence}' carries id {}",
            version.version_id()
        )));
    }
    Ok(version)
}

/// Loads the newest existing version of a fence.
///
/// # Errors
///
/// Returns an error if the fence cannot be listed or the version cannot be read.
pub fn load_latest_version(directory: &dyn Directory, fence: &str) -> CoreResult<Option<Version>> {
    match list_versions(directory, fence)?.last() {
        Some(&id) => load_version(directory, fence, id).map(Some),
        None => Ok(None),
    }
}

/// Removes a version: companions first, so an interruption leaves an orphan
/// version file that a later pass recognizes. Missing files are skipped.
///
/// # Errors
///
/// Returns an error if a file cannot be removed.
pub fn remove_version_files(
    directory: &dyn Directory,
    fence: &str,
    id: VersionId,
) -> CoreResult<()> {
    directory.remove_file(&in_fence(fence, &layout::entry_table_file_name(id)), true)?;
    directory.remove_file(&in_fence(fence, &layout::deploy_meta_file_name(id)), true)?;
    directory.remove_file(&in_fence(fence, &layout::version_file_name(id)), true)?;
    Ok(())
}

/// Lists the segment directories of a fence, ascending.
///
/// # Errors
///
/// Returns an error if the fence cannot be listed.
pub fn list_segments(directory: &dyn Directory, fence: &str) -> CoreResult<Vec<SegmentId>> {
    let mut ids: Vec<SegmentId> = directory
        .list_dir(&in_fence(fence, ""))?
        .iter()
        .filter_map(|name| layout::parse_segment_dir_name(name).ok())
        .collect();
    ids.sort();
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fence::Fence;
    use std::path::Path;
    use std::sync::Arc;
    use tablet_storage::{InMemoryDirectory, StoreOptions};

    fn published(dir: &Arc<InMemoryDirectory>, fence: &str, id: i32) -> Version {
        let mut version = Version::new(VersionId::new(id));
        version.set_fence_name(fence);
        Fence::open(Arc::clone(dir) as Arc<dyn Directory>, fence)
            .publish_version(&version)
            .unwrap();
        version
    }

    #[test]
    fn list_only_complete_versions() {
        let dir = Arc::new(InMemoryDirectory::new());
        published(&dir, "f", 1);
        published(&dir, "f", 3);
        dir.store(Path::new("f/version.5"), b"{}", StoreOptions::default())
            .unwrap();
        dir.make_directory(Path::new("f/segment_2_level_0")).unwrap();

        let ids: Vec<_> = list_versions(dir.as_ref(), "f").unwrap();
        assert_eq!(ids, vec![VersionId::new(1), VersionId::new(3)]);
        assert_eq!(
            list_orphan_version_files(dir.as_ref(), "f").unwrap(),
            vec![VersionId::new(5)]
        );
        assert_eq!(
            list_segments(dir.as_ref(), "f").unwrap(),
            vec![SegmentId::new(2)]
        );
    }

    #[test]
    fn load_round_trip_and_latest() {
        let dir = Arc::new(InMemoryDirectory::new());
        published(&dir, "f", 1);
        let newest = published(&dir, "f", 2);

        let loaded = load_latest_version(dir.as_ref(), "f").unwrap().unwrap();
        assert_eq!(loaded, newest);
        assert!(load_latest_version(dir.as_ref(), "").unwrap().is_none());
    }

    #[test]
    fn removed_version_leaves_no_orphan() {
        let dir = Arc::new(InMemoryDirectory::new());
        published(&dir, "f", 1);
        remove_version_files(dir.as_ref(), "f", VersionId::new(1)).unwrap();
        remove_version_files(dir.as_ref(), "f", VersionId::new(1)).unwrap();

        assert!(list_versions(dir.as_ref(), "f").unwrap().is_empty());
        assert!(list_orphan_version_files(dir.as_ref(), "f").unwrap().is_empty());
    }

    #[test]
    fn tampered_version_is_corruption() {
        let dir = Arc::new(InMemoryDirectory::new());
        published(&dir, "f", 1);
        let other = Version::new(VersionId::new(9)).to_json().unwrap();
        dir.store(Path::new("f/version.1"), other.as_bytes(), StoreOptions::overwrite())
            .unwrap();

        assert!(matches!(
            load_version(dir.as_ref(), "f", VersionId::new(1)),
            Err(CoreError::Corruption { .. })
        ));
    }

    #[test]
    fn id_mismatch_is_corruption() {
        let dir = InMemoryDirectory::new();
        let content = Version::new(VersionId::new(9)).to_json().unwrap();
        dir.store(Path::new("version.1"), content.as_bytes(), StoreOptions::default())
            .unwrap();
        assert!(matches!(
            load_version(&dir, "", VersionId::new(1)),
            Err(CoreError::Corruption { .. })
        ));
    }
}
