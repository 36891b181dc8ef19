//! Adoption of completed background merges.

use crate::types::SegmentId;
use crate::version::Version;
use std::collections::BTreeSet;

/// A merge that finished and waits to be committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedVersionInfo {
    /// Version the merge produced. Its segments replace `source_segments`.
    pub target_version: Version,
    /// Segments the merge consumed.
    pub source_segments: BTreeSet<SegmentId>,
}

/// Hook through which a merge scheduler takes part in commits.
///
/// The merge policy itself lives outside this crate; the committer only
/// adopts what the coordinator reports as finished.
pub trait MergeCoordinator: Send + Sync {
    /// Returns true if a finished merge waits to be committed.
    fn need_commit(&self) -> bool;

    /// Returns the finished merge, if any.
    fn merged_version_info(&self) -> Option<MergedVersionInfo>;

    /// Called after a version that adopted `merge` was committed. Commits
    /// that adopted nothing do not call this.
    fn on_committed(&self, version: &Version, merge: &MergedVersionInfo);
}
