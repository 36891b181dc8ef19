//! Which versions a clean pass must keep.

use crate::config::CleanOptions;
use crate::fence::{FenceMeta, RangeInfo};
use crate::types::VersionId;
use crate::version::{Version, VersionCoord};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

const US_PER_HOUR: i64 = 3_600 * 1_000_000;

/// A complete version found on disk.
#[derive(Debug, Clone)]
pub(crate) struct DiskVersion {
    pub coord: VersionCoord,
    pub version: Version,
}

/// Outcome of the reservation step.
#[derive(Debug, Default)]
pub(crate) struct Reservation {
    pub versions: BTreeSet<VersionCoord>,
    pub tolerant_fences: BTreeSet<String>,
}

/// Fences close enough to the newest fence of their range to belong to a
/// writer that may still be active.
pub(crate) fn tolerant_fences(fences: &[FenceMeta], deviation_us: i64) -> BTreeSet<String> {
    let mut newest: BTreeMap<RangeInfo, i64> = BTreeMap::new();
    for fence in fences {
        newest
            .entry(fence.range)
            .and_modify(|ts| *ts = (*ts).max(fence.timestamp_us))
            .or_insert(fence.timestamp_us);
    }
    fences
        .iter()
        .filter(|fence| {
            let newest_ts = newest.get(&fence.range).copied().unwrap_or(fence.timestamp_us);
            newest_ts.saturating_sub(fence.timestamp_us) <= deviation_us
        })
        .map(|fence| fence.name.clone())
        .collect()
}

/// Returns the number of distinct public version ids.
pub(crate) fn public_version_count(versions: &[DiskVersion]) -> usize {
    versions
        .iter()
        .filter(|v| !v.coord.version_id.is_private())
        .map(|v| v.coord.version_id)
        .collect::<BTreeSet<_>>()
        .len()
}

fn committed_concurrently(id: VersionId, current_max: VersionId) -> bool {
    current_max.is_valid() && id.role() == current_max.role() && id > current_max
}

/// Computes the reserved versions of a clean pass.
///
/// Public versions are reserved by id, covering every location the id was
/// published to; private versions are reserved by coordinate.
pub(crate) fn reserve_versions(
    versions: &[DiskVersion],
    fences: &[FenceMeta],
    options: &CleanOptions,
    explicit: &[VersionCoord],
    now_us: i64,
) -> Reservation {
    let mut reserved_ids: BTreeSet<VersionId> = BTreeSet::new();
    let mut reserved_coords: BTreeSet<VersionCoord> = BTreeSet::new();

    let mut public: BTreeMap<VersionId, &Version> = BTreeMap::new();
    for disk in versions {
        let id = disk.coord.version_id;
        if committed_concurrently(id, options.current_max_version_id) {
            reserved_coords.insert(disk.coord.clone());
        }
        if !id.is_private() {
            public.entry(id).or_insert(&disk.version);
        }
    }

    let keep = options.keep_version_count.max(1) as usize;
    reserved_ids.extend(public.keys().rev().take(keep).copied());

    if options.keep_version_hour > 0 {
        let window = i64::try_from(options.keep_version_hour)
            .unwrap_or(i64::MAX)
            .saturating_mul(US_PER_HOUR);
        let cutoff = now_us.saturating_sub(window);
        reserved_ids.extend(
            public
                .iter()
                .filter(|(_, v)| v.commit_time() >= cutoff)
                .map(|(id, _)| *id),
        );
    }

    let on_disk: BTreeSet<&VersionCoord> = versions.iter().map(|v| &v.coord).collect();
    for coord in explicit {
        if on_disk.contains(coord) {
            reserved_coords.insert(coord.clone());
        } else {
            warn!(version = %coord, "reserved version not found on disk");
        }
    }
    for coord in &reserved_coords {
        if !coord.version_id.is_private() {
            reserved_ids.insert(coord.version_id);
        }
    }

    if let Some(id) = merge_coverage_candidate(&public, &reserved_ids) {
        debug!(version_id = %id, "kept to preserve merge coverage");
        reserved_ids.insert(id);
    }

    let tolerant = tolerant_fences(fences, options.fence_ts_tolerant_deviation_us);
    for fence in &tolerant {
        let newest_private = versions
            .iter()
            .filter(|v| &v.coord.fence_name == fence && v.coord.version_id.is_private())
            .max_by_key(|v| v.coord.version_id);
        if let Some(disk) = newest_private {
            reserved_coords.insert(disk.coord.clone());
        }
    }

    for disk in versions {
        if reserved_ids.contains(&disk.coord.version_id) {
            reserved_coords.insert(disk.coord.clone());
        }
    }

    Reservation {
        versions: reserved_coords,
        tolerant_fences: tolerant,
    }
}

/// The newest unreserved public version older than the oldest reserved one,
/// if its merged segments differ from that reserved version's.
fn merge_coverage_candidate(
    public: &BTreeMap<VersionId, &Version>,
    reserved: &BTreeSet<VersionId>,
) -> Option<VersionId> {
    let oldest_reserved = public.keys().find(|id| reserved.contains(id))?;
    let reserved_merged = public.get(oldest_reserved)?.merged_segments();
    let (candidate, version) = public
        .range(..*oldest_reserved)
        .rev()
        .find(|(id, _)| !reserved.contains(id))?;
    (version.merged_segments() != reserved_merged).then_some(*candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SegmentId, PRIVATE_VERSION_ID_MASK, PUBLIC_VERSION_ID_MASK};

    fn public_version(raw: i32, merged: &[i32], commit_time: i64) -> DiskVersion {
        let id = VersionId::new(PUBLIC_VERSION_ID_MASK + raw);
        let mut version = Version::new(id);
        for m in merged {
            version.add_segment(SegmentId::new(*m), 0);
        }
        version.set_commit_time(commit_time);
        DiskVersion {
            coord: VersionCoord::new(id, ""),
            version,
        }
    }

    fn fence(name_ts: i64, range: RangeInfo) -> FenceMeta {
        FenceMeta {
            name: FenceMeta::encode_name(true, name_ts, range),
            is_public: true,
            timestamp_us: name_ts,
            range,
        }
    }

    fn ids(reservation: &Reservation) -> Vec<i32> {
        reservation
            .versions
            .iter()
            .map(|c| c.version_id.as_i32() - PUBLIC_VERSION_ID_MASK)
            .collect()
    }

    #[test]
    fn newest_versions_are_kept() {
        let versions: Vec<_> = (0..5).map(|i| public_version(i, &[1], 0)).collect();
        let options = CleanOptions::new().keep_version_count(2);
        let reservation = reserve_versions(&versions, &[], &options, &[], 0);
        assert_eq!(ids(&reservation), vec![3, 4]);
    }

    #[test]
    fn recent_versions_are_kept() {
        let now = 10 * US_PER_HOUR;
        let versions = vec![
            public_version(0, &[1], 0),
            public_version(1, &[1], now - US_PER_HOUR / 2),
            public_version(2, &[1], now),
        ];
        let options = CleanOptions::new().keep_version_count(1).keep_version_hour(1);
        let reservation = reserve_versions(&versions, &[], &options, &[], now);
        assert_eq!(ids(&reservation), vec![1, 2]);
    }

    #[test]
    fn concurrently_committed_versions_are_kept() {
        let versions: Vec<_> = (0..5).map(|i| public_version(i, &[1], 0)).collect();
        let options = CleanOptions::new()
            .keep_version_count(1)
            .current_max_version_id(VersionId::new(PUBLIC_VERSION_ID_MASK + 1));
        let reservation = reserve_versions(&versions, &[], &options, &[], 0);
        assert_eq!(ids(&reservation), vec![2, 3, 4]);
    }

    #[test]
    fn merge_coverage_keeps_previous_shape() {
        let versions = vec![
            public_version(0, &[1], 0),
            public_version(1, &[1, 2], 0),
            public_version(2, &[5], 0),
        ];
        let options = CleanOptions::new().keep_version_count(1);
        let reservation = reserve_versions(&versions, &[], &options, &[], 0);
        assert_eq!(ids(&reservation), vec![1, 2]);
    }

    #[test]
    fn same_merge_shape_needs_no_extra_version() {
        let versions = vec![public_version(0, &[1], 0), public_version(1, &[1], 0)];
        let options = CleanOptions::new().keep_version_count(1);
        let reservation = reserve_versions(&versions, &[], &options, &[], 0);
        assert_eq!(ids(&reservation), vec![1]);
    }

    #[test]
    fn explicit_reservations_must_exist() {
        let versions: Vec<_> = (0..3).map(|i| public_version(i, &[], 0)).collect();
        let explicit = vec![
            VersionCoord::new(VersionId::new(PUBLIC_VERSION_ID_MASK), ""),
            VersionCoord::new(VersionId::new(PUBLIC_VERSION_ID_MASK + 9), ""),
        ];
        let options = CleanOptions::new().keep_version_count(1);
        let reservation = reserve_versions(&versions, &[], &options, &explicit, 0);
        assert_eq!(ids(&reservation), vec![0, 2]);
    }

    #[test]
    fn public_id_reserves_every_location() {
        let mut versions = vec![public_version(0, &[], 0)];
        let mirrored = DiskVersion {
            coord: VersionCoord::new(VersionId::new(PUBLIC_VERSION_ID_MASK), "__FENCE__pub_1_0_65535"),
            version: versions[0].version.clone(),
        };
        versions.push(mirrored);
        let reservation = reserve_versions(&versions, &[], &CleanOptions::new(), &[], 0);
        assert_eq!(reservation.versions.len(), 2);
    }

    #[test]
    fn tolerance_is_per_range() {
        let half = RangeInfo::new(0, 32767);
        let fences = vec![
            fence(100, RangeInfo::full()),
            fence(150, RangeInfo::full()),
            fence(10, half),
        ];
        let tolerant = tolerant_fences(&fences, 60);
        assert!(tolerant.contains(&fences[0].name));
        assert!(tolerant.contains(&fences[1].name));
        assert!(tolerant.contains(&fences[2].name));

        let tolerant = tolerant_fences(&fences, 10);
        assert!(!tolerant.contains(&fences[0].name));
        assert!(tolerant.contains(&fences[1].name));
    }

    #[test]
    fn newest_private_version_of_tolerant_fence_is_kept() {
        let f = fence(100, RangeInfo::full());
        let private = |raw: i32| {
            let id = VersionId::new(PRIVATE_VERSION_ID_MASK + raw);
            DiskVersion {
                coord: VersionCoord::new(id, f.name.clone()),
                version: Version::new(id),
            }
        };
        let versions = vec![private(0), private(1)];
        let reservation = reserve_versions(
            &versions,
            std::slice::from_ref(&f),
            &CleanOptions::new(),
            &[],
            0,
        );
        assert_eq!(reservation.versions.len(), 1);
        assert!(reservation.versions.contains(&versions[1].coord));
    }

    #[test]
    fn public_count_ignores_private_and_mirrors() {
        let mut versions = vec![public_version(0, &[], 0), public_version(0, &[], 0)];
        let id = VersionId::new(PRIVATE_VERSION_ID_MASK);
        versions.push(DiskVersion {
            coord: VersionCoord::new(id, "f"),
            version: Version::new(id),
        });
        assert_eq!(public_version_count(&versions), 1);
    }
}
