//! Property-based test generators using proptest.
//!
//! Provides strategies for generating ids, dump items and clean options
//! that respect the tablet's invariants.

use proptest::prelude::*;
use tablet_core::{
    CleanOptions, DumpItem, DumpItemKind, IdMaskType, RangeInfo, SegmentId, VersionId,
    ID_BAND_WIDTH,
};

/// Strategy for generating an id role.
pub fn id_mask_type_strategy() -> impl Strategy<Value = IdMaskType> {
    prop_oneof![
        Just(IdMaskType::BuildPublic),
        Just(IdMaskType::BuildPrivate),
        Just(IdMaskType::Merged),
    ]
}

/// Strategy for generating a segment id inside a role's band.
pub fn segment_id_strategy(role: IdMaskType) -> impl Strategy<Value = SegmentId> {
    (0..ID_BAND_WIDTH).prop_map(move |offset| SegmentId::new(role.segment_mask() + offset))
}

/// Strategy for generating a version id inside a role's band.
pub fn version_id_strategy(role: IdMaskType) -> impl Strategy<Value = VersionId> {
    (0..ID_BAND_WIDTH).prop_map(move |offset| VersionId::new(role.version_mask() + offset))
}

/// Strategy for generating a non-empty shard range.
pub fn range_strategy() -> impl Strategy<Value = RangeInfo> {
    (0u32..=65535, 0u32..=65535).prop_map(|(a, b)| RangeInfo::new(a.min(b), a.max(b)))
}

/// Strategy for generating a dump item kind.
pub fn dump_item_kind_strategy() -> impl Strategy<Value = DumpItemKind> {
    prop_oneof![
        Just(DumpItemKind::Index),
        Just(DumpItemKind::Attribute),
        Just(DumpItemKind::Summary),
        Just(DumpItemKind::Source),
        Just(DumpItemKind::DeletionMap),
    ]
}

/// Strategy for generating the items of one segment, with unique names.
pub fn dump_items_strategy(max_items: usize) -> impl Strategy<Value = Vec<DumpItem>> {
    prop::collection::vec(
        (
            dump_item_kind_strategy(),
            prop::collection::vec(any::<u8>(), 0..256),
        ),
        0..=max_items,
    )
    .prop_map(|items| {
        items
            .into_iter()
            .enumerate()
            .map(|(i, (kind, data))| DumpItem::new(kind, format!("item_{i}"), data))
            .collect()
    })
}

/// Strategy for generating clean options without a time window.
pub fn clean_options_strategy() -> impl Strategy<Value = CleanOptions> {
    (1u32..6, any::<bool>()).prop_map(|(keep, ignore)| {
        CleanOptions::new()
            .keep_version_count(keep)
            .ignore_keep_version_count(ignore)
    })
}

/// Operation against a writer's id generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdOperation {
    /// Peek at the next segment id.
    PeekSegment,
    /// Consume the next segment id.
    CommitSegment,
    /// Issue a version id.
    GenerateVersion,
    /// Rebase the version counter by a forward offset.
    Rebase {
        /// Distance ahead of the next version id.
        ahead: i32,
    },
}

/// Strategy for generating id generator operations.
pub fn id_operation_strategy() -> impl Strategy<Value = IdOperation> {
    prop_oneof![
        2 => Just(IdOperation::PeekSegment),
        3 => Just(IdOperation::CommitSegment),
        3 => Just(IdOperation::GenerateVersion),
        1 => (0i32..16).prop_map(|ahead| IdOperation::Rebase { ahead }),
    ]
}

/// Strategy for generating a sequence of id operations.
pub fn id_operation_sequence_strategy(
    min_ops: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<IdOperation>> {
    prop::collection::vec(id_operation_strategy(), min_ops..max_ops)
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
