//! Directory trait definition.

use crate::error::StorageResult;
use std::path::Path;

/// Options for [`Directory::store`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    /// Whether an existing target may be replaced.
    pub overwrite: bool,
}

impl StoreOptions {
    /// Store that fails with `AlreadyExists` if the target is present.
    #[must_use]
    pub const fn no_overwrite() -> Self {
        Self { overwrite: false }
    }

    /// Store that atomically replaces an existing target.
    #[must_use]
    pub const fn overwrite() -> Self {
        Self { overwrite: true }
    }
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self::no_overwrite()
    }
}

/// Completion handle of a [`Directory::sync`] call.
///
/// Sync is blocking for every directory in this crate, but callers still
/// check completion: a publish whose bytes were not flushed must not be
/// reported as durable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub struct SyncFuture {
    completed: bool,
}

impl SyncFuture {
    /// A sync that reached durable storage.
    pub const fn completed() -> Self {
        Self { completed: true }
    }

    /// A sync that returned before all bytes were flushed.
    pub const fn pending() -> Self {
        Self { completed: false }
    }

    /// Returns true if the sync finished.
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        self.completed
    }
}

/// A rooted directory used by the versioning core.
///
/// All paths are relative to the directory root. Implementations own all
/// physical concerns (temp files, fsync, rename); callers only see whole
/// files appearing atomically.
///
/// # Invariants
///
/// - `store` publishes atomically: readers see either nothing or the full file
/// - `store` with [`StoreOptions::no_overwrite`] never replaces an existing file
/// - `remove_*` with `may_not_exist = true` succeeds on a missing target
/// - `list_dir` returns direct children names, sorted
///
/// # Implementors
///
/// - [`super::InMemoryDirectory`] - For testing
/// - [`super::FsDirectory`] - For persistent storage
pub trait Directory: Send + Sync {
    /// Creates a directory and all missing parents. Existing directories are fine.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn make_directory(&self, path: &Path) -> StorageResult<()>;

    /// Removes a directory and everything below it.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the directory is missing and `may_not_exist` is
    /// false, or an error if an I/O error occurs.
    fn remove_directory(&self, path: &Path, may_not_exist: bool) -> StorageResult<()>;

    /// Removes a single file.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the file is missing and `may_not_exist` is false,
    /// or an error if an I/O error occurs.
    fn remove_file(&self, path: &Path, may_not_exist: bool) -> StorageResult<()>;

    /// Lists the names of the direct children of a directory, sorted.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the directory does not exist.
    fn list_dir(&self, path: &Path) -> StorageResult<Vec<String>>;

    /// Returns true if a file or directory exists at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if existence cannot be determined.
    fn is_exist(&self, path: &Path) -> StorageResult<bool>;

    /// Returns true if `path` exists and is a directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the type cannot be determined.
    fn is_dir(&self, path: &Path) -> StorageResult<bool>;

    /// Atomically publishes `data` at `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` if the target exists and `options.overwrite`
    /// is false, or an error if an I/O error occurs.
    fn store(&self, path: &Path, data: &[u8], options: StoreOptions) -> StorageResult<()>;

    /// Reads a whole file.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the file does not exist.
    fn load(&self, path: &Path) -> StorageResult<Vec<u8>>;

    /// Flushes all published data and metadata to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync could not be issued.
    fn sync(&self) -> StorageResult<SyncFuture>;
}
