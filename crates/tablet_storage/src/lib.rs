//! # Tablet Storage
//!
//! Directory abstraction and implementations for the tablet versioning core.
//!
//! This crate is the narrow file-system seam the versioning core talks to.
//! A [`Directory`] is rooted somewhere (an OS directory, or memory) and all
//! paths handed to it are relative to that root.
//!
//! ## Design Principles
//!
//! - Directories are opaque: no knowledge of versions, fences or segments
//! - Publishing a file is atomic; a no-overwrite store never clobbers
//! - Removal of a missing target can be tolerated (idempotent cleanup)
//! - Must be `Send + Sync` for concurrent access
//!
//! ## Available Directories
//!
//! - [`InMemoryDirectory`] - For testing, with fault injection
//! - [`FsDirectory`] - For persistent storage using OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use tablet_storage::{Directory, InMemoryDirectory, StoreOptions};
//! use std::path::Path;
//!
//! let dir = InMemoryDirectory::new();
//! dir.make_directory(Path::new("segment_0_level_0")).unwrap();
//! dir.store(Path::new("segment_0_level_0/segment_info"), b"{}", StoreOptions::no_overwrite())
//!     .unwrap();
//! assert!(dir.is_exist(Path::new("segment_0_level_0/segment_info")).unwrap());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod directory;
mod error;
mod fs;
mod memory;

pub use directory::{Directory, StoreOptions, SyncFuture};
pub use error::{StorageError, StorageResult};
pub use fs::FsDirectory;
pub use memory::InMemoryDirectory;
