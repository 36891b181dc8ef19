//! Core identifier types.
//!
//! Segment and version ids are signed 32-bit integers whose high bits
//! encode the role that produced them:
//!
//! ```text
//! 0x0000_0000 ..= 0x1fff_ffff   merged  (produced by merges / internal)
//! 0x2000_0000 ..= 0x3fff_ffff   public  (built by the public writer)
//! 0x4000_0000 ..= 0x5fff_ffff   private (built by private/test writers)
//! ```
//!
//! Numeric order inside one band is recency order.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Identifier of a schema.
pub type SchemaId = u32;

/// Default schema id of a freshly created tablet.
pub const DEFAULT_SCHEMA_ID: SchemaId = 0;

/// Width of one role band.
pub const ID_BAND_WIDTH: i32 = 0x2000_0000;

/// Mask of segments built by the public writer.
pub const PUBLIC_SEGMENT_ID_MASK: i32 = 0x2000_0000;
/// Mask of segments built by private writers.
pub const PRIVATE_SEGMENT_ID_MASK: i32 = 0x4000_0000;
/// Mask of segments produced by merges.
pub const MERGED_SEGMENT_ID_MASK: i32 = 0;

/// Mask of versions committed by the public writer.
pub const PUBLIC_VERSION_ID_MASK: i32 = 0x2000_0000;
/// Mask of versions committed by private writers.
pub const PRIVATE_VERSION_ID_MASK: i32 = 0x4000_0000;
/// Mask of merged/internal versions.
pub const MERGED_VERSION_ID_MASK: i32 = 0;

const ROLE_BITS: i32 = 0x6000_0000;

/// The role an id was issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdMaskType {
    /// Public build path.
    BuildPublic,
    /// Private build path (tests, offline writers).
    BuildPrivate,
    /// Merge output.
    Merged,
}

impl IdMaskType {
    /// Mask applied to segment ids of this role.
    #[must_use]
    pub const fn segment_mask(self) -> i32 {
        match self {
            Self::BuildPublic => PUBLIC_SEGMENT_ID_MASK,
            Self::BuildPrivate => PRIVATE_SEGMENT_ID_MASK,
            Self::Merged => MERGED_SEGMENT_ID_MASK,
        }
    }

    /// Mask applied to version ids of this role.
    #[must_use]
    pub const fn version_mask(self) -> i32 {
        match self {
            Self::BuildPublic => PUBLIC_VERSION_ID_MASK,
            Self::BuildPrivate => PRIVATE_VERSION_ID_MASK,
            Self::Merged => MERGED_VERSION_ID_MASK,
        }
    }

    const fn from_bits(raw: i32) -> Option<Self> {
        if raw < 0 {
            return None;
        }
        match raw & ROLE_BITS {
            PUBLIC_SEGMENT_ID_MASK => Some(Self::BuildPublic),
            PRIVATE_SEGMENT_ID_MASK => Some(Self::BuildPrivate),
            MERGED_SEGMENT_ID_MASK => Some(Self::Merged),
            _ => None,
        }
    }

    /// Returns true if `raw` lies inside this role's segment band.
    #[must_use]
    pub const fn contains_raw(self, raw: i32) -> bool {
        let mask = self.segment_mask();
        raw >= mask && raw < mask + ID_BAND_WIDTH
    }
}

/// Identifier of a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SegmentId(pub i32);

impl SegmentId {
    /// The invalid segment id.
    pub const INVALID: Self = Self(-1);

    /// Creates a segment id from a raw value.
    #[must_use]
    pub const fn new(id: i32) -> Self {
        Self(id)
    }

    /// Returns the raw id value.
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self.0
    }

    /// Returns true unless this is [`SegmentId::INVALID`].
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 >= 0
    }

    /// Role band this id belongs to.
    #[must_use]
    pub const fn role(self) -> Option<IdMaskType> {
        IdMaskType::from_bits(self.0)
    }

    /// Returns true for ids produced by merges.
    #[must_use]
    pub const fn is_merged(self) -> bool {
        matches!(self.role(), Some(IdMaskType::Merged))
    }

    /// Returns true for ids built by the public writer.
    #[must_use]
    pub const fn is_public(self) -> bool {
        matches!(self.role(), Some(IdMaskType::BuildPublic))
    }

    /// Returns true for ids built by private writers.
    #[must_use]
    pub const fn is_private(self) -> bool {
        matches!(self.role(), Some(IdMaskType::BuildPrivate))
    }
}

impl Default for SegmentId {
    fn default() -> Self {
        Self::INVALID
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionId(pub i32);

impl VersionId {
    /// The invalid version id (a version that was never committed).
    pub const INVALID: Self = Self(-1);

    /// Creates a version id from a raw value.
    #[must_use]
    pub const fn new(id: i32) -> Self {
        Self(id)
    }

    /// Returns the raw id value.
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self.0
    }

    /// Returns true unless this is [`VersionId::INVALID`].
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 >= 0
    }

    /// Role band this id belongs to.
    #[must_use]
    pub const fn role(self) -> Option<IdMaskType> {
        IdMaskType::from_bits(self.0)
    }

    /// Returns true for versions committed by the public writer.
    #[must_use]
    pub const fn is_public(self) -> bool {
        matches!(self.role(), Some(IdMaskType::BuildPublic))
    }

    /// Returns true for versions committed by private writers.
    #[must_use]
    pub const fn is_private(self) -> bool {
        matches!(self.role(), Some(IdMaskType::BuildPrivate))
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Current wall-clock time in microseconds since the Unix epoch.
#[must_use]
pub fn now_us() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_micros()).unwrap_or(i64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_roles() {
        assert!(SegmentId::new(5).is_merged());
        assert!(SegmentId::new(PUBLIC_SEGMENT_ID_MASK | 5).is_public());
        assert!(SegmentId::new(PRIVATE_SEGMENT_ID_MASK).is_private());
        assert_eq!(SegmentId::INVALID.role(), None);
        assert!(!SegmentId::INVALID.is_valid());
    }

    #[test]
    fn default_segment_id_is_invalid() {
        assert_eq!(SegmentId::default(), SegmentId::INVALID);
    }

    #[test]
    fn version_roles() {
        assert!(VersionId::new(PUBLIC_VERSION_ID_MASK).is_public());
        assert!(VersionId::new(PRIVATE_VERSION_ID_MASK | 9).is_private());
        assert_eq!(VersionId::new(3).role(), Some(IdMaskType::Merged));
    }

    #[test]
    fn bands_do_not_overlap() {
        for role in [
            IdMaskType::BuildPublic,
            IdMaskType::BuildPrivate,
            IdMaskType::Merged,
        ] {
            let lo = role.segment_mask();
            let hi = lo + ID_BAND_WIDTH - 1;
            assert!(role.contains_raw(lo));
            assert!(role.contains_raw(hi));
            assert!(!role.contains_raw(hi + 1));
            assert_eq!(SegmentId::new(hi).role(), Some(role));
        }
    }

    #[test]
    fn ids_serialize_transparently() {
        let json = serde_json::to_string(&SegmentId::new(12)).unwrap();
        assert_eq!(json, "12");
        let id: VersionId = serde_json::from_str("536870913").unwrap();
        assert!(id.is_public());
    }
}
