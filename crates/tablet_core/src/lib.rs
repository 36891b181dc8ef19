//! # Tablet Core
//!
//! Segment versioning, commit and garbage collection for one tablet.
//!
//! A tablet is a directory of immutable segments. A [`Version`] names the
//! set of segments readers see; writers publish versions into their own
//! fence directory so a stale writer can never overwrite a newer one.
//!
//! This crate provides:
//! - Role-banded id allocation ([`IdGenerator`])
//! - Fences and segment lookup across fences ([`Fence`], [`FenceDirFinder`])
//! - The persisted version document and its companions ([`version`])
//! - Parallel segment dumping ([`SegmentDumper`], [`DumpControl`])
//! - Optimistic version commits with bounded retry ([`TabletCommitter`])
//! - Reservation-based garbage collection ([`VersionCleaner`])
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use tablet_core::{
//!     BuildingSegment, CommitOptions, Fence, IdGenerator, IdMaskType, InlineExecutor,
//!     RangeInfo, SegmentDumper, SegmentInfo, TabletCommitter, TabletData,
//! };
//! use tablet_storage::{Directory, InMemoryDirectory};
//!
//! let dir: Arc<dyn Directory> = Arc::new(InMemoryDirectory::new());
//! let fence = Fence::create(Arc::clone(&dir), true, 1, RangeInfo::full()).unwrap();
//! let ids = IdGenerator::new(IdMaskType::BuildPublic);
//! let mut data = TabletData::default();
//! let committer = TabletCommitter::new();
//!
//! let segment_id = ids.get_next_segment_id();
//! let segment = BuildingSegment::new(SegmentInfo::new(segment_id, 0));
//! data.add_building_segment(segment.info().clone());
//! let info = SegmentDumper::new(&fence, segment)
//!     .unwrap()
//!     .dump(&InlineExecutor, 1)
//!     .unwrap();
//! data.add_built_segment(info);
//! ids.commit_next_segment_id();
//! committer.push(segment_id);
//!
//! let version = committer
//!     .commit(&data, &fence, 3, &ids, &CommitOptions::new())
//!     .unwrap();
//! assert!(version.has_segment(segment_id));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod cleaner;
pub mod committer;
pub mod config;
mod error;
pub mod executor;
pub mod fence;
mod id_generator;
pub mod layout;
pub mod metrics;
pub mod segment;
mod tablet_data;
mod types;
pub mod version;

pub use cleaner::{CleanReport, VersionCleaner};
pub use committer::{
    with_bounded_retry, CommitOutcome, MergeCoordinator, MergedVersionInfo, Operation,
    TabletCommitter,
};
pub use config::{
    CleanOptions, CommitOptions, DumpOptions, ImportOptions, ImportStrategy, TabletConfig,
};
pub use error::{CoreError, CoreResult, ParseError};
pub use executor::{Executor, InlineExecutor, Task, ThreadPoolExecutor};
pub use fence::{Fence, FenceDirFinder, FenceMeta, RangeInfo, ROOT_FENCE_NAME};
pub use id_generator::IdGenerator;
pub use metrics::{InMemoryMetrics, MetricsRecorder, NoopMetrics, StatsSnapshot, TabletStats};
pub use segment::{
    BuildingSegment, DumpControl, DumpItem, DumpItemKind, SegmentDumper, SegmentInfo,
    SegmentStatus, SegmentWriteMode,
};
pub use tablet_data::{TabletData, TabletSegment};
pub use types::{
    now_us, IdMaskType, SchemaId, SegmentId, VersionId, DEFAULT_SCHEMA_ID, ID_BAND_WIDTH,
    MERGED_SEGMENT_ID_MASK, MERGED_VERSION_ID_MASK, PRIVATE_SEGMENT_ID_MASK,
    PRIVATE_VERSION_ID_MASK, PUBLIC_SEGMENT_ID_MASK, PUBLIC_VERSION_ID_MASK,
};
pub use version::{Locator, Version, VersionCoord};
