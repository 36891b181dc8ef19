//! Units of dump work and the package file writer.

use crate::error::{CoreResult, ParseError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tablet_storage::{Directory, StoreOptions};

/// Data file of a packaged segment.
pub const PACKAGE_DATA_FILE: &str = "package_file.__data__0";
/// Meta file of a packaged segment.
pub const PACKAGE_META_FILE: &str = "package_file.__meta__";

/// Kind of data a dump item persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DumpItemKind {
    /// Inverted or primary-key index.
    Index,
    /// Column-oriented attribute.
    Attribute,
    /// Stored document summary.
    Summary,
    /// Raw source documents.
    Source,
    /// Deleted document map.
    DeletionMap,
}

impl DumpItemKind {
    /// Sub-directory the kind is written under.
    #[must_use]
    pub const fn dir_name(self) -> &'static str {
        match self {
            Self::Index => "index",
            Self::Attribute => "attribute",
            Self::Summary => "summary",
            Self::Source => "source",
            Self::DeletionMap => "deletionmap",
        }
    }
}

/// One independent piece of a segment dump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpItem {
    /// What the item persists.
    pub kind: DumpItemKind,
    /// File name inside the kind directory.
    pub name: String,
    /// Serialized payload.
    pub data: Vec<u8>,
}

impl DumpItem {
    /// Creates a dump item.
    #[must_use]
    pub fn new(kind: DumpItemKind, name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            kind,
            name: name.into(),
            data,
        }
    }

    /// Segment-relative path of the item.
    #[must_use]
    pub fn relative_path(&self) -> String {
        format!("{}/{}", self.kind.dir_name(), self.name)
    }

    /// Writes the item into `segment_dir`, or into `package` when packaging.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn execute(
        &self,
        directory: &dyn Directory,
        segment_dir: &Path,
        package: Option<&PackageFileWriter>,
    ) -> CoreResult<()> {
        match package {
            Some(writer) => writer.append(self.relative_path(), &self.data),
            None => directory.store(
                &segment_dir.join(self.relative_path()),
                &self.data,
                StoreOptions::overwrite(),
            )?,
        }
        Ok(())
    }
}

/// Location of one logical file inside the package data file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageEntry {
    /// Segment-relative logical path.
    pub path: String,
    /// Offset in the data file.
    pub offset: u64,
    /// Length in bytes.
    pub length: u64,
}

#[derive(Debug, Default)]
struct PackageState {
    data: Vec<u8>,
    entries: Vec<PackageEntry>,
}

/// Packs many small item files into one data file.
///
/// Appends from concurrent dump workers are serialized; the entries are
/// written sorted by path on flush so the meta does not depend on dump order.
#[derive(Debug, Default)]
pub struct PackageFileWriter {
    state: Mutex<PackageState>,
}

impl PackageFileWriter {
    /// Creates an empty writer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one logical file.
    pub fn append(&self, path: String, data: &[u8]) {
        let mut state = self.state.lock();
        let offset = state.data.len() as u64;
        state.data.extend_from_slice(data);
        state.entries.push(PackageEntry {
            path,
            offset,
            length: data.len() as u64,
        });
    }

    /// Number of packed files.
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Writes the data and meta files into `segment_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if either store fails.
    pub fn flush(&self, directory: &dyn Directory, segment_dir: &Path) -> CoreResult<()> {
        let state = self.state.lock();
        let mut entries = state.entries.clone();
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        let meta = serde_json::to_string_pretty(&entries).map_err(ParseError::from)?;

        directory.store(
            &segment_dir.join(PACKAGE_DATA_FILE),
            &state.data,
            StoreOptions::overwrite(),
        )?;
        directory.store(
            &segment_dir.join(PACKAGE_META_FILE),
            meta.as_bytes(),
            StoreOptions::overwrite(),
        )?;
        Ok(())
    }

    /// Reads one logical file back from a flushed package.
    ///
    /// # Errors
    ///
    /// Returns an error if the package cannot be read or lacks `path`.
    pub fn read_entry(
        directory: &dyn Directory,
        segment_dir: &Path,
        path: &str,
    ) -> CoreResult<Vec<u8>> {
        let meta = directory.load(&segment_dir.join(PACKAGE_META_FILE))?;
        let entries: Vec<PackageEntry> = serde_json::from_slice(&meta).map_err(ParseError::from)?;
        let entry = entries
            .iter()
            .find(|e| e.path == path)
            .ok_or_else(|| crate::error::CoreError::corruption(format!("{path} not in package")))?;
        let data = directory.load(&segment_dir.join(PACKAGE_DATA_FILE))?;
        let start = entry.offset as usize;
        let end = start + entry.length as usize;
        data.get(start..end).map(<[u8]>::to_vec).ok_or_else(|| {
            crate::error::CoreError::corruption(format!("{path} extends beyond package data"))
        })
    }
}
