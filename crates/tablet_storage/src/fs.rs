//! File-system directory for persistent storage.

use crate::directory::{Directory, StoreOptions, SyncFuture};
use crate::error::{StorageError, StorageResult};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Suffix of temporary files used for atomic publish.
const TEMP_SUFFIX: &str = ".__tmp__";

/// A directory rooted at an OS path.
///
/// # Durability
///
/// - `store()` writes a temp file, `sync_all()`s it, then links or renames it
///   into place and fsyncs the parent directory
/// - `sync()` fsyncs the root directory
///
/// # Atomicity
///
/// A no-overwrite store uses `hard_link`, which fails if the target exists,
/// so two racing publishers of the same path cannot both succeed.
///
/// # Example
///
/// ```no_run
/// use tablet_storage::{Directory, FsDirectory, StoreOptions};
/// use std::path::Path;
///
/// let dir = FsDirectory::open(Path::new("tablet_root")).unwrap();
/// dir.store(Path::new("version.0"), b"{}", StoreOptions::no_overwrite()).unwrap();
/// assert!(dir.sync().unwrap().is_completed());
/// ```
#[derive(Debug)]
pub struct FsDirectory {
    root: PathBuf,
    temp_counter: AtomicU64,
}

impl FsDirectory {
    /// Opens a directory rooted at `root`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the root cannot be created or is not a directory.
    pub fn open(root: &Path) -> StorageResult<Self> {
        fs::create_dir_all(root)?;
        if !root.is_dir() {
            return Err(StorageError::Corrupted(format!(
                "root is not a directory: {}",
                root.display()
            )));
        }
        Ok(Self {
            root: root.to_path_buf(),
            temp_counter: AtomicU64::new(0),
        })
    }

    /// Returns the root path.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        self.root.join(path)
    }

    fn temp_path_for(&self, target: &Path) -> PathBuf {
        let seq = self.temp_counter.fetch_add(1, Ordering::Relaxed);
        let mut name = target
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(format!("{TEMP_SUFFIX}{}_{seq}", std::process::id()));
        target.with_file_name(name)
    }

    fn not_found(path: &Path) -> StorageError {
        StorageError::NotFound {
            path: path.to_path_buf(),
        }
    }

    #[cfg(unix)]
    fn sync_dir(path: &Path) -> StorageResult<()> {
        let dir = File::open(path)?;
        dir.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_dir(_path: &Path) -> StorageResult<()> {
        // NTFS journals metadata; directory handles cannot be fsynced
        Ok(())
    }
}

impl Directory for FsDirectory {
    fn make_directory(&self, path: &Path) -> StorageResult<()> {
        fs::create_dir_all(self.resolve(path))?;
        Ok(())
    }

    fn remove_directory(&self, path: &Path, may_not_exist: bool) -> StorageResult<()> {
        match fs::remove_dir_all(self.resolve(path)) {
            Ok(()) => {
                debug!(path = %path.display(), "removed directory");
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                if may_not_exist {
                    Ok(())
                } else {
                    Err(Self::not_found(path))
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    fn remove_file(&self, path: &Path, may_not_exist: bool) -> StorageResult<()> {
        match fs::remove_file(self.resolve(path)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                if may_not_exist {
                    Ok(())
                } else {
                    Err(Self::not_found(path))
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    fn list_dir(&self, path: &Path) -> StorageResult<Vec<String>> {
        let full = self.resolve(path);
        let entries = match fs::read_dir(&full) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(Self::not_found(path))
            }
            Err(err) => return Err(err.into()),
        };

        let mut names = Vec::new();
        for entry in entries {
            let name = entry?.file_name().to_string_lossy().into_owned();
            if name.contains(TEMP_SUFFIX) {
                continue;
            }
            names.push(name);
        }
        names.sort();
        Ok(names)
    }

    fn is_exist(&self, path: &Path) -> StorageResult<bool> {
        Ok(self.resolve(path).try_exists()?)
    }

    fn is_dir(&self, path: &Path) -> StorageResult<bool> {
        Ok(self.resolve(path).is_dir())
    }

    fn store(&self, path: &Path, data: &[u8], options: StoreOptions) -> StorageResult<()> {
        let target = self.resolve(path);
        let parent = target
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());
        fs::create_dir_all(&parent)?;

        if !options.overwrite && target.exists() {
            return Err(StorageError::AlreadyExists {
                path: path.to_path_buf(),
            });
        }

        let temp = self.temp_path_for(&target);
        {
            let mut file = File::create(&temp)?;
            file.write_all(data)?;
            file.sync_all()?;
        }

        let publish = if options.overwrite {
            fs::rename(&temp, &target)
        } else {
            let linked = fs::hard_link(&temp, &target);
            let _ = fs::remove_file(&temp);
            linked
        };

        match publish {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                return Err(StorageError::AlreadyExists {
                    path: path.to_path_buf(),
                });
            }
            Err(err) => {
                let _ = fs::remove_file(&temp);
                return Err(err.into());
            }
        }

        Self::sync_dir(&parent)?;
        Ok(())
    }

    fn load(&self, path: &Path) -> StorageResult<Vec<u8>> {
        match fs::read(self.resolve(path)) {
            Ok(data) => Ok(data),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Err(Self::not_found(path)),
            Err(err) => Err(err.into()),
        }
    }

    fn sync(&self) -> StorageResult<SyncFuture> {
        Self::sync_dir(&self.root)?;
        Ok(SyncFuture::completed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryDirectory;
    use proptest::prelude::*;
    use tempfile::tempdir;

    #[test]
    fn open_creates_root() {
        let temp = tempdir().unwrap();
        let root = temp.path().join("tablet");

        let dir = FsDirectory::open(&root).unwrap();
        assert!(root.is_dir());
        assert_eq!(dir.root(), root);
    }

    #[test]
    fn store_and_load() {
        let temp = tempdir().unwrap();
        let dir = FsDirectory::open(temp.path()).unwrap();

        dir.store(Path::new("a/b/file"), b"hello", StoreOptions::no_overwrite())
            .unwrap();
        assert_eq!(dir.load(Path::new("a/b/file")).unwrap(), b"hello");
        assert!(dir.is_dir(Path::new("a/b")).unwrap());
    }

    #[test]
    fn no_overwrite_store_keeps_existing_content() {
        let temp = tempdir().unwrap();
        let dir = FsDirectory::open(temp.path()).unwrap();

        dir.store(Path::new("version.1"), b"first", StoreOptions::no_overwrite())
            .unwrap();
        let result = dir.store(Path::new("version.1"), b"second", StoreOptions::no_overwrite());

        assert!(matches!(result, Err(StorageError::AlreadyExists { .. })));
        assert_eq!(dir.load(Path::new("version.1")).unwrap(), b"first");
    }

    #[test]
    fn overwrite_store_replaces_content() {
        let temp = tempdir().unwrap();
        let dir = FsDirectory::open(temp.path()).unwrap();

        dir.store(Path::new("f"), b"first", StoreOptions::overwrite())
            .unwrap();
        dir.store(Path::new("f"), b"second", StoreOptions::overwrite())
            .unwrap();
        assert_eq!(dir.load(Path::new("f")).unwrap(), b"second");
    }

    #[test]
    fn list_dir_is_sorted_and_hides_temp_files() {
        let temp = tempdir().unwrap();
        let dir = FsDirectory::open(temp.path()).unwrap();

        dir.store(Path::new("b"), b"", StoreOptions::default()).unwrap();
        dir.store(Path::new("a"), b"", StoreOptions::default()).unwrap();
        dir.make_directory(Path::new("c")).unwrap();
        fs::write(temp.path().join(format!("x{TEMP_SUFFIX}1")), b"").unwrap();

        assert_eq!(dir.list_dir(Path::new("")).unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn remove_missing_is_tolerated_when_requested() {
        let temp = tempdir().unwrap();
        let dir = FsDirectory::open(temp.path()).unwrap();

        assert!(dir.remove_file(Path::new("nope"), true).is_ok());
        assert!(dir.remove_directory(Path::new("nope"), true).is_ok());

        let err = dir.remove_file(Path::new("nope"), false).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn remove_directory_is_recursive() {
        let temp = tempdir().unwrap();
        let dir = FsDirectory::open(temp.path()).unwrap();

        dir.store(Path::new("seg/index/a"), b"x", StoreOptions::default())
            .unwrap();
        dir.remove_directory(Path::new("seg"), false).unwrap();
        assert!(!dir.is_exist(Path::new("seg")).unwrap());
    }

    #[test]
    fn list_missing_dir_fails() {
        let temp = tempdir().unwrap();
        let dir = FsDirectory::open(temp.path()).unwrap();
        let err = dir.list_dir(Path::new("missing")).unwrap_err();
        assert!(err.is_not_found());
    }

    proptest! {
        #[test]
        fn file_and_memory_directories_agree(
            files in prop::collection::btree_map(
                ("[a-c]", "[a-d]{1,3}"),
                prop::collection::vec(any::<u8>(), 0..64),
                1..12,
            ),
        ) {
            let temp = tempdir().unwrap();
            let on_disk = FsDirectory::open(temp.path()).unwrap();
            let memory = InMemoryDirectory::new();

            for ((parent, name), data) in &files {
                let path = Path::new(parent).join(name);
                for dir in [&on_disk as &dyn Directory, &memory] {
                    let first = dir.store(&path, data, StoreOptions::no_overwrite());
                    let again = dir.store(&path, b"", StoreOptions::no_overwrite());
                    prop_assert!(first.is_ok());
                    prop_assert!(again.unwrap_err().is_already_exists());
                }
            }

            prop_assert_eq!(
                on_disk.list_dir(Path::new("")).unwrap(),
                memory.list_dir(Path::new("")).unwrap()
            );
            for ((parent, name), data) in &files {
                let path = Path::new(parent).join(name);
                prop_assert_eq!(
                    on_disk.list_dir(Path::new(parent)).unwrap(),
                    memory.list_dir(Path::new(parent)).unwrap()
                );
                prop_assert_eq!(&on_disk.load(&path).unwrap(), data);
                prop_assert_eq!(&memory.load(&path).unwrap(), data);
            }
        }
    }

    #[test]
    fn sync_completes() {
        let temp = tempdir().unwrap();
        let dir = FsDirectory::open(temp.path()).unwrap();
        assert!(dir.sync().unwrap().is_completed());
    }
}
