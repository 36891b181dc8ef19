//! State-changing intents queued for the next commit.

use crate::config::ImportOptions;
use crate::types::{SchemaId, SegmentId};
use crate::version::{IndexTaskRequest, Version};

/// One queued intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// A segment finished dumping and may be published.
    Dump(SegmentId),
    /// The tablet stops accepting writes.
    Seal,
    /// The write schema changed.
    AlterTable(SchemaId),
    /// Segments of other versions are adopted.
    Import {
        /// Versions whose segments are imported.
        versions: Vec<Version>,
        /// Name of the importing component.
        importer: String,
        /// Locator handling.
        options: ImportOptions,
    },
    /// A background index task changes state.
    IndexTask(IndexTaskRequest),
}

impl Operation {
    /// Short name used in logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Dump(_) => "dump",
            Self::Seal => "seal",
            Self::AlterTable(_) => "alter_table",
            Self::Import { .. } => "import",
            Self::IndexTask(_) => "index_task",
        }
    }

    /// Segment covered by a dump operation.
    #[must_use]
    pub const fn dumped_segment(&self) -> Option<SegmentId> {
        match self {
            Self::Dump(id) => Some(*id),
            _ => None,
        }
    }
}
