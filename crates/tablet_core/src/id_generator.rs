//! Segment and version id allocation.

use crate::error::{CoreError, CoreResult};
use crate::types::{IdMaskType, SegmentId, VersionId, ID_BAND_WIDTH};
use crate::version::Version;
use parking_lot::Mutex;
use tracing::{debug, info};

#[derive(Debug)]
struct IdState {
    next_segment_id: i32,
    next_version_id: i32,
}

/// Issues role-masked segment and version ids.
///
/// One generator is the single source of truth for "next id" of a writer;
/// it is constructed explicitly and shared by reference (or `Arc`) between
/// the dump path and the committer.
///
/// - Segment ids are reserved in two steps: [`get_next_segment_id`] peeks a
///   candidate, [`commit_next_segment_id`] consumes it once the segment was
///   durably created. An attempt that never commits leaves the id reusable.
/// - Version ids are issued and consumed in one step by
///   [`generate_version_id`], so they follow actual commit order.
///
/// [`get_next_segment_id`]: IdGenerator::get_next_segment_id
/// [`commit_next_segment_id`]: IdGenerator::commit_next_segment_id
/// [`generate_version_id`]: IdGenerator::generate_version_id
#[derive(Debug)]
pub struct IdGenerator {
    mask_type: IdMaskType,
    state: Mutex<IdState>,
}

impl IdGenerator {
    /// Creates a generator whose first ids are the base of the role band.
    #[must_use]
    pub fn new(mask_type: IdMaskType) -> Self {
        Self {
            mask_type,
            state: Mutex::new(IdState {
                next_segment_id: mask_type.segment_mask(),
                next_version_id: mask_type.version_mask(),
            }),
        }
    }

    /// Returns the role of this generator.
    #[must_use]
    pub const fn mask_type(&self) -> IdMaskType {
        self.mask_type
    }

    /// Returns the next candidate segment id without consuming it.
    #[must_use]
    pub fn get_next_segment_id(&self) -> SegmentId {
        SegmentId::new(self.state.lock().next_segment_id)
    }

    /// Consumes the current candidate segment id.
    pub fn commit_next_segment_id(&self) {
        let mut state = self.state.lock();
        state.next_segment_id += 1;
    }

    /// Returns the next version id without consuming it.
    #[must_use]
    pub fn get_next_version_id(&self) -> VersionId {
        VersionId::new(self.state.lock().next_version_id)
    }

    /// Issues a fresh version id.
    ///
    /// # Errors
    ///
    /// Returns `Abort` once the role band is exhausted.
    pub fn generate_version_id(&self) -> CoreResult<VersionId> {
        let mut state = self.state.lock();
        let id = state.next_version_id;
        if id >= self.mask_type.version_mask() + ID_BAND_WIDTH {
            return Err(CoreError::abort(format!(
                "version id band of {:?} exhausted",
                self.mask_type
            )));
        }
        state.next_version_id += 1;
        Ok(VersionId::new(id))
    }

    fn in_version_band(&self, id: VersionId) -> bool {
        let mask = self.mask_type.version_mask();
        id.as_i32() >= mask && id.as_i32() < mask + ID_BAND_WIDTH
    }

    /// Rebases the version counter so the next issued id is `id + 1`.
    ///
    /// Used when a caller requires a specific id, or after an open observed
    /// a higher committed id than this generator has issued.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgs` if `id` is outside this generator's band or is
    /// not above every id already issued.
    pub fn update_base_version_id(&self, id: VersionId) -> CoreResult<()> {
        if !self.in_version_band(id) {
            return Err(CoreError::invalid_args(format!(
                "version id {id} is outside the {:?} band",
                self.mask_type
            )));
        }
        let mut state = self.state.lock();
        if id.as_i32() < state.next_version_id {
            return Err(CoreError::invalid_args(format!(
                "version id {id} regresses below next id {}",
                state.next_version_id
            )));
        }
        state.next_version_id = id.as_i32() + 1;
        debug!(version_id = %id, "rebased version id");
        Ok(())
    }

    /// Moves both counters past everything `version` records for this role.
    ///
    /// Counters never move backward.
    pub fn update_base_version(&self, version: &Version) {
        let mut state = self.state.lock();

        let max_own_segment = version
            .segments()
            .iter()
            .map(|s| s.segment_id.as_i32())
            .chain(std::iter::once(version.last_segment_id().as_i32()))
            .filter(|&raw| self.mask_type.contains_raw(raw))
            .max();
        if let Some(raw) = max_own_segment {
            state.next_segment_id = state.next_segment_id.max(raw + 1);
        }

        let version_id = version.version_id();
        if version_id.is_valid() && self.in_version_band(version_id) {
            state.next_version_id = state.next_version_id.max(version_id.as_i32() + 1);
        }

        info!(
            next_segment_id = state.next_segment_id,
            next_version_id = state.next_version_id,
            "id generator rebased from version {}",
            version_id
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PRIVATE_SEGMENT_ID_MASK, PUBLIC_SEGMENT_ID_MASK, PUBLIC_VERSION_ID_MASK};
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn segment_id_is_reusable_until_committed() {
        let ids = IdGenerator::new(IdMaskType::BuildPublic);
        let first = ids.get_next_segment_id();
        assert_eq!(first.as_i32(), PUBLIC_SEGMENT_ID_MASK);
        assert_eq!(ids.get_next_segment_id(), first);

        ids.commit_next_segment_id();
        assert_eq!(ids.get_next_segment_id().as_i32(), PUBLIC_SEGMENT_ID_MASK + 1);
    }

    #[test]
    fn version_ids_advance() {
        let ids = IdGenerator::new(IdMaskType::BuildPublic);
        let a = ids.generate_version_id().unwrap();
        let b = ids.generate_version_id().unwrap();
        assert_eq!(a.as_i32(), PUBLIC_VERSION_ID_MASK);
        assert_eq!(b.as_i32(), PUBLIC_VERSION_ID_MASK + 1);
    }

    #[test]
    fn update_base_version_id_rejects_regression() {
        let ids = IdGenerator::new(IdMaskType::BuildPublic);
        let issued = ids.generate_version_id().unwrap();

        assert!(matches!(
            ids.update_base_version_id(issued),
            Err(CoreError::InvalidArgs { .. })
        ));

        let target = VersionId::new(issued.as_i32() + 10);
        ids.update_base_version_id(target).unwrap();
        assert_eq!(ids.generate_version_id().unwrap().as_i32(), target.as_i32() + 1);
    }

    #[test]
    fn update_base_version_id_rejects_foreign_band() {
        let ids = IdGenerator::new(IdMaskType::BuildPublic);
        assert!(ids.update_base_version_id(VersionId::new(5)).is_err());
    }

    #[test]
    fn update_base_version_moves_counters_forward_only() {
        let ids = IdGenerator::new(IdMaskType::BuildPublic);
        let mut version = Version::new(VersionId::new(PUBLIC_VERSION_ID_MASK + 4));
        version.add_segment(SegmentId::new(PUBLIC_SEGMENT_ID_MASK + 2), 0);
        version.set_last_segment_id(SegmentId::new(PUBLIC_SEGMENT_ID_MASK + 7));
        version.add_segment(SegmentId::new(PRIVATE_SEGMENT_ID_MASK + 100), 0);

        ids.update_base_version(&version);
        assert_eq!(ids.get_next_segment_id().as_i32(), PUBLIC_SEGMENT_ID_MASK + 8);
        assert_eq!(ids.get_next_version_id().as_i32(), PUBLIC_VERSION_ID_MASK + 5);

        let older = Version::new(VersionId::new(PUBLIC_VERSION_ID_MASK + 1));
        ids.update_base_version(&older);
        assert_eq!(ids.get_next_version_id().as_i32(), PUBLIC_VERSION_ID_MASK + 5);
    }

    #[test]
    fn concurrent_version_ids_are_distinct() {
        let ids = Arc::new(IdGenerator::new(IdMaskType::BuildPrivate));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ids = Arc::clone(&ids);
                thread::spawn(move || {
                    let mut local = Vec::new();
                    for _ in 0..200 {
                        local.push(ids.generate_version_id().unwrap());
                    }
                    local
                })
            })
            .collect();

        let mut all = HashSet::new();
        for handle in handles {
            let local = handle.join().unwrap();
            assert!(local.windows(2).all(|w| w[0] < w[1]));
            for id in local {
                assert!(all.insert(id));
            }
        }
        assert_eq!(all.len(), 1600);
    }
}
