use super::coord::VersionCoord;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Maximum number of ancestors a version line remembers.
pub const MAX_VERSION_LINE_LENGTH: usize = 128;

/// Lineage of a version, used by incremental publish chains.
///
/// A reader holding version `A` may fast-forward to `B` without a full
/// reload iff `A` is one of `B`'s recorded ancestors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionLine {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    parent: Option<VersionCoord>,
    #[serde(default)]
    ancestors: VecDeque<VersionCoord>,
}

impl VersionLine {
    /// Returns the version this one was derived from.
    #[must_use]
    pub fn parent(&self) -> Option<&VersionCoord> {
        self.parent.as_ref()
    }

    /// Records `coord` as the direct parent of the owning version.
    pub fn add_parent(&mut self, coord: VersionCoord) {
        if self.ancestors.back() != Some(&coord) {
            self.ancestors.push_back(coord.clone());
        }
        while self.ancestors.len() > MAX_VERSION_LINE_LENGTH {
            self.ancestors.pop_front();
        }
        self.parent = Some(coord);
    }

    /// Returns true if a reader at `coord` can fast-forward to the owner.
    #[must_use]
    pub fn can_fast_forward_from(&self, coord: &VersionCoord) -> bool {
        self.ancestors.contains(coord)
    }

    /// Number of remembered ancestors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ancestors.len()
    }

    /// Returns true if no ancestor is recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ancestors.is_empty()
    }
}
