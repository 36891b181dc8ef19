//! In-memory directory for testing.

use crate::directory::{Directory, StoreOptions, SyncFuture};
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Component, Path, PathBuf};

#[derive(Debug, Default)]
struct Tree {
    files: BTreeMap<PathBuf, Vec<u8>>,
    dirs: BTreeSet<PathBuf>,
}

#[derive(Debug, Default)]
struct Faults {
    fail_store: Vec<String>,
    fail_remove: Vec<String>,
    fail_list: Vec<String>,
    incomplete_sync: bool,
}

impl Faults {
    fn hits(patterns: &[String], path: &Path) -> bool {
        let text = path.to_string_lossy();
        patterns.iter().any(|p| text.contains(p.as_str()))
    }
}

/// An in-memory directory.
///
/// This directory keeps all files in memory and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Ephemeral tablets that don't need persistence
///
/// Failures can be injected per path substring to exercise error paths of
/// callers (a failing store, a failing remove, a failing listing, or a sync
/// that returns before flushing).
///
/// # Example
///
/// ```rust
/// use tablet_storage::{Directory, InMemoryDirectory, StoreOptions};
/// use std::path::Path;
///
/// let dir = InMemoryDirectory::new();
/// dir.fail_store_on("segment_3_level_0");
/// let result = dir.store(Path::new("segment_3_level_0/segment_info"), b"", StoreOptions::default());
/// assert!(result.is_err());
/// ```
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    tree: RwLock<Tree>,
    faults: RwLock<Faults>,
}

impl InMemoryDirectory {
    /// Creates a new empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every `store` whose path contains `pattern` fail.
    pub fn fail_store_on(&self, pattern: impl Into<String>) {
        self.faults.write().fail_store.push(pattern.into());
    }

    /// Makes every remove whose path contains `pattern` fail.
    pub fn fail_remove_on(&self, pattern: impl Into<String>) {
        self.faults.write().fail_remove.push(pattern.into());
    }

    /// Makes every `list_dir` whose path contains `pattern` fail.
    pub fn fail_list_on(&self, pattern: impl Into<String>) {
        self.faults.write().fail_list.push(pattern.into());
    }

    /// Makes `sync` report an incomplete flush.
    pub fn set_incomplete_sync(&self, incomplete: bool) {
        self.faults.write().incomplete_sync = incomplete;
    }

    /// Removes all injected faults.
    pub fn clear_faults(&self) {
        *self.faults.write() = Faults::default();
    }

    /// Returns all file paths, sorted.
    ///
    /// Useful for testing and debugging.
    #[must_use]
    pub fn files(&self) -> Vec<PathBuf> {
        self.tree.read().files.keys().cloned().collect()
    }

    fn normalize(path: &Path) -> PathBuf {
        path.components()
            .filter(|c| matches!(c, Component::Normal(_)))
            .collect()
    }

    fn add_parents(tree: &mut Tree, path: &Path) {
        let mut current = PathBuf::new();
        if let Some(parent) = path.parent() {
            for component in parent.components() {
                current.push(component);
                tree.dirs.insert(current.clone());
            }
        }
    }

    fn exists_in(tree: &Tree, path: &Path) -> bool {
        path.as_os_str().is_empty() || tree.files.contains_key(path) || tree.dirs.contains(path)
    }

    fn injected(path: &Path) -> StorageError {
        StorageError::Injected {
            path: path.to_path_buf(),
        }
    }
}

impl Directory for InMemoryDirectory {
    fn make_directory(&self, path: &Path) -> StorageResult<()> {
        let path = Self::normalize(path);
        if path.as_os_str().is_empty() {
            return Ok(());
        }
        let mut tree = self.tree.write();
        if tree.files.contains_key(&path) {
            return Err(StorageError::AlreadyExists { path });
        }
        Self::add_parents(&mut tree, &path);
        tree.dirs.insert(path);
        Ok(())
    }

    fn remove_directory(&self, path: &Path, may_not_exist: bool) -> StorageResult<()> {
        let path = Self::normalize(path);
        if Faults::hits(&self.faults.read().fail_remove, &path) {
            return Err(Self::injected(&path));
        }
        let mut tree = self.tree.write();
        if !tree.dirs.contains(&path) {
            return if may_not_exist {
                Ok(())
            } else {
                Err(StorageError::NotFound { path })
            };
        }
        tree.dirs.retain(|d| !d.starts_with(&path));
        tree.files.retain(|f, _| !f.starts_with(&path));
        Ok(())
    }

    fn remove_file(&self, path: &Path, may_not_exist: bool) -> StorageResult<()> {
        let path = Self::normalize(path);
        if Faults::hits(&self.faults.read().fail_remove, &path) {
            return Err(Self::injected(&path));
        }
        let mut tree = self.tree.write();
        if tree.files.remove(&path).is_none() && !may_not_exist {
            return Err(StorageError::NotFound { path });
        }
        Ok(())
    }

    fn list_dir(&self, path: &Path) -> StorageResult<Vec<String>> {
        let path = Self::normalize(path);
        if Faults::hits(&self.faults.read().fail_list, &path) {
            return Err(Self::injected(&path));
        }
        let tree = self.tree.read();
        if !path.as_os_str().is_empty() && !tree.dirs.contains(&path) {
            return Err(StorageError::NotFound { path });
        }

        let child_name = |entry: &PathBuf| -> Option<String> {
            let rest = entry.strip_prefix(&path).ok()?;
            let mut components = rest.components();
            let first = components.next()?;
            if components.next().is_some() {
                return None;
            }
            Some(first.as_os_str().to_string_lossy().into_owned())
        };

        let names: BTreeSet<String> = tree
            .files
            .keys()
            .chain(tree.dirs.iter())
            .filter_map(child_name)
            .collect();
        Ok(names.into_iter().collect())
    }

    fn is_exist(&self, path: &Path) -> StorageResult<bool> {
        let path = Self::normalize(path);
        Ok(Self::exists_in(&self.tree.read(), &path))
    }

    fn is_dir(&self, path: &Path) -> StorageResult<bool> {
        let path = Self::normalize(path);
        Ok(path.as_os_str().is_empty() || self.tree.read().dirs.contains(&path))
    }

    fn store(&self, path: &Path, data: &[u8], options: StoreOptions) -> StorageResult<()> {
        let path = Self::normalize(path);
        if Faults::hits(&self.faults.read().fail_store, &path) {
            return Err(Self::injected(&path));
        }
        let mut tree = self.tree.write();
        if tree.dirs.contains(&path) {
            return Err(StorageError::AlreadyExists { path });
        }
        if !options.overwrite && tree.files.contains_key(&path) {
            return Err(StorageError::AlreadyExists { path });
        }
        Self::add_parents(&mut tree, &path);
        tree.files.insert(path, data.to_vec());
        Ok(())
    }

    fn load(&self, path: &Path) -> StorageResult<Vec<u8>> {
        let path = Self::normalize(path);
        self.tree
            .read()
            .files
            .get(&path)
            .cloned()
            .ok_or(StorageError::NotFound { path })
    }

    fn sync(&self) -> StorageResult<SyncFuture> {
        if self.faults.read().incomplete_sync {
            Ok(SyncFuture::pending())
        } else {
            Ok(SyncFuture::completed())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> &Path {
        Path::new(s)
    }

    #[test]
    fn memory_new_is_empty() {
        let dir = InMemoryDirectory::new();
        assert!(dir.files().is_empty());
        assert!(dir.list_dir(p("")).unwrap().is_empty());
    }

    #[test]
    fn memory_store_creates_parents() {
        let dir = InMemoryDirectory::new();
        dir.store(p("fence/segment_1_level_0/segment_info"), b"x", StoreOptions::default())
            .unwrap();

        assert!(dir.is_dir(p("fence")).unwrap());
        assert!(dir.is_dir(p("fence/segment_1_level_0")).unwrap());
        assert_eq!(dir.list_dir(p("fence")).unwrap(), vec!["segment_1_level_0"]);
    }

    #[test]
    fn memory_no_overwrite_conflict() {
        let dir = InMemoryDirectory::new();
        dir.store(p("version.1"), b"a", StoreOptions::no_overwrite())
            .unwrap();
        let err = dir
            .store(p("version.1"), b"b", StoreOptions::no_overwrite())
            .unwrap_err();
        assert!(err.is_already_exists());
        assert_eq!(dir.load(p("version.1")).unwrap(), b"a");
    }

    #[test]
    fn memory_list_only_direct_children() {
        let dir = InMemoryDirectory::new();
        dir.store(p("a/b/c"), b"", StoreOptions::default()).unwrap();
        dir.store(p("a/d"), b"", StoreOptions::default()).unwrap();
        dir.store(p("e"), b"", StoreOptions::default()).unwrap();

        assert_eq!(dir.list_dir(p("")).unwrap(), vec!["a", "e"]);
        assert_eq!(dir.list_dir(p("a")).unwrap(), vec!["b", "d"]);
    }

    #[test]
    fn memory_remove_directory_recursive() {
        let dir = InMemoryDirectory::new();
        dir.store(p("a/b/c"), b"", StoreOptions::default()).unwrap();
        dir.store(p("ab"), b"", StoreOptions::default()).unwrap();

        dir.remove_directory(p("a"), false).unwrap();
        assert!(!dir.is_exist(p("a/b/c")).unwrap());
        assert!(!dir.is_exist(p("a")).unwrap());
        assert!(dir.is_exist(p("ab")).unwrap());
    }

    #[test]
    fn memory_remove_missing() {
        let dir = InMemoryDirectory::new();
        assert!(dir.remove_file(p("x"), true).is_ok());
        assert!(dir.remove_file(p("x"), false).unwrap_err().is_not_found());
        assert!(dir.remove_directory(p("x"), true).is_ok());
    }

    #[test]
    fn memory_injected_faults() {
        let dir = InMemoryDirectory::new();
        dir.store(p("version.3"), b"", StoreOptions::default()).unwrap();
        dir.fail_remove_on("version.3");
        dir.fail_list_on("fence");
        dir.make_directory(p("fence")).unwrap();

        assert!(matches!(
            dir.remove_file(p("version.3"), true),
            Err(StorageError::Injected { .. })
        ));
        assert!(dir.list_dir(p("fence")).is_err());

        dir.clear_faults();
        assert!(dir.remove_file(p("version.3"), false).is_ok());
    }

    #[test]
    fn memory_incomplete_sync() {
        let dir = InMemoryDirectory::new();
        dir.set_incomplete_sync(true);
        assert!(!dir.sync().unwrap().is_completed());
        dir.set_incomplete_sync(false);
        assert!(dir.sync().unwrap().is_completed());
    }

    #[test]
    fn memory_make_directory_is_idempotent() {
        let dir = InMemoryDirectory::new();
        dir.make_directory(p("a/b")).unwrap();
        dir.make_directory(p("a/b")).unwrap();
        assert!(dir.is_dir(p("a")).unwrap());
        assert_eq!(dir.list_dir(p("a")).unwrap(), vec!["b"]);
    }
}
