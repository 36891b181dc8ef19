//! Companion manifests written next to each version file.

use super::Version;
use crate::error::{CoreError, CoreResult, ParseError};
use crate::fence::FenceDirFinder;
use crate::layout;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tablet_storage::Directory;

/// Maps the logical entries of a version to their physical location.
///
/// Building an entry table resolves every segment of the version, so a
/// version that references a physically absent segment can never be
/// published.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryTable {
    /// Logical name -> tablet-relative physical path.
    pub entries: BTreeMap<String, String>,
}

impl EntryTable {
    /// Resolves the entries of `version`, whose segments live in `segment_fence`
    /// or at the root.
    ///
    /// # Errors
    ///
    /// Returns `Corruption` if a segment of the version does not exist.
    pub fn build(
        directory: &dyn Directory,
        version: &Version,
        segment_fence: &str,
    ) -> CoreResult<Self> {
        let finder = FenceDirFinder::new(directory, segment_fence);
        let mut entries = BTreeMap::new();
        for segment_id in version.segment_ids() {
            let path = finder.segment_path(segment_id)?;
            entries.insert(
                layout::segment_dir_name(segment_id),
                path.to_string_lossy().into_owned(),
            );
        }
        let version_name = layout::version_file_name(version.version_id());
        entries.insert(
            version_name.clone(),
            layout::in_fence(segment_fence, &version_name)
                .to_string_lossy()
                .into_owned(),
        );
        Ok(Self { entries })
    }

    /// Serializes to JSON.
    ///
    /// # Errors
    ///
    /// Returns `Json` if serialization fails.
    pub fn to_json(&self) -> Result<String, ParseError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parses from JSON.
    ///
    /// # Errors
    ///
    /// Returns `Json` if the document is malformed.
    pub fn from_json(json: &str) -> Result<Self, ParseError> {
        Ok(serde_json::from_str(json)?)
    }
}

/// One file that must be deployed with a version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployFile {
    /// Fence-relative path.
    pub path: String,
    /// Length in bytes, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u64>,
}

/// Deployment manifest of a version, carrying the version file digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployMeta {
    /// Files to deploy.
    pub files: Vec<DeployFile>,
    /// Length of the version file.
    pub version_length: u64,
    /// Hex-encoded SHA-256 of the version file.
    pub version_digest: String,
}

impl DeployMeta {
    /// Builds the deploy meta of `version` whose serialized form is `content`.
    #[must_use]
    pub fn build(version: &Version, content: &[u8]) -> Self {
        let mut files: Vec<DeployFile> = version
            .segment_ids()
            .map(|id| DeployFile {
                path: layout::segment_dir_name(id),
                length: None,
            })
            .collect();
        files.push(DeployFile {
            path: layout::version_file_name(version.version_id()),
            length: Some(content.len() as u64),
        });
        Self {
            files,
            version_length: content.len() as u64,
            version_digest: digest_hex(content),
        }
    }

    /// Checks that `content` is the version file this meta was built for.
    ///
    /// # Errors
    ///
    /// Returns `Corruption` on a length or digest mismatch.
    pub fn verify(&self, content: &[u8]) -> CoreResult<()> {
        if content.len() as u64 != self.version_length {
            return Err(CoreError::corruption(format!(
                "version file length {} differs from deploy meta {}",
                content.len(),
                self.version_length
            )));
        }
        let actual = digest_hex(content);
        if actual != self.version_digest {
            return Err(CoreError::corruption(format!(
                "version file digest {actual} differs from deploy meta {}",
                self.version_digest
            )));
        }
        Ok(())
    }

    /// Serializes to JSON.
    ///
    /// # Errors
    ///
    /// Returns `Json` if serialization fails.
    pub fn to_json(&self) -> Result<String, ParseError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parses from JSON.
    ///
    /// # Errors
    ///
    /// Returns `Json` if the document is malformed.
    pub fn from_json(json: &str) -> Result<Self, ParseError> {
        Ok(serde_json::from_str(json)?)
    }
}

fn digest_hex(content: &[u8]) -> String {
    Sha256::digest(content)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SegmentId, VersionId};
    use std::path::Path;
    use tablet_storage::InMemoryDirectory;

    #[test]
    fn entry_table_resolves_segments() {
        let dir = InMemoryDirectory::new();
        dir.make_directory(Path::new("f/segment_1_level_0")).unwrap();
        dir.make_directory(Path::new("segment_0_level_0")).unwrap();

        let mut version = Version::new(VersionId::new(3));
        version.add_segment(SegmentId::new(0), 0);
        version.add_segment(SegmentId::new(1), 0);

        let table = EntryTable::build(&dir, &version, "f").unwrap();
        assert_eq!(table.entries["segment_0_level_0"], "segment_0_level_0");
        assert_eq!(table.entries["segment_1_level_0"], "f/segment_1_level_0");
        assert_eq!(table.entries["version.3"], "f/version.3");
    }

    #[test]
    fn entry_table_rejects_missing_segment() {
        let dir = InMemoryDirectory::new();
        let mut version = Version::new(VersionId::new(3));
        version.add_segment(SegmentId::new(9), 0);
        assert!(matches!(
            EntryTable::build(&dir, &version, "f"),
            Err(CoreError::Corruption { .. })
        ));
    }

    #[test]
    fn deploy_meta_detects_tampering() {
        let version = Version::new(VersionId::new(1));
        let content = version.to_json().unwrap();
        let meta = DeployMeta::build(&version, content.as_bytes());

        meta.verify(content.as_bytes()).unwrap();
        let mut tampered = content.into_bytes();
        let last = tampered.len() - 2;
        tampered[last] ^= 0x01;
        assert!(meta.verify(&tampered).is_err());
        assert!(meta.verify(b"short").is_err());
    }

    #[test]
    fn digest_is_sha256_hex() {
        assert_eq!(
            digest_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
