use crate::types::VersionId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Physical location of a version: its id and the fence it was published from.
///
/// The same numeric id can legally recur in different fences, so an id alone
/// does not identify a version.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VersionCoord {
    /// Version id.
    pub version_id: VersionId,
    /// Fence directory name (empty for the tablet root).
    pub fence_name: String,
}

impl VersionCoord {
    /// Creates a coordinate.
    #[must_use]
    pub fn new(version_id: VersionId, fence_name: impl Into<String>) -> Self {
        Self {
            version_id,
            fence_name: fence_name.into(),
        }
    }
}

impl fmt::Display for VersionCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.fence_name.is_empty() {
            write!(f, "{}@root", self.version_id)
        } else {
            write!(f, "{}@{}", self.version_id, self.fence_name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_id_different_fence_are_distinct() {
        let a = VersionCoord::new(VersionId::new(1), "f1");
        let b = VersionCoord::new(VersionId::new(1), "f2");
        assert_ne!(a, b);
        assert!(a < b);
        assert_eq!(VersionCoord::new(VersionId::new(3), "").to_string(), "3@root");
    }
}
