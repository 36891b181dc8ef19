//! Garbage collection of versions, segments and fences.
//!
//! A clean pass enumerates every version at the tablet root and in every
//! fence, decides which must be kept, follows the kept versions to the
//! segments and fences they reference, and removes the rest in a fixed
//! order: segments, versions, orphan version files, fences, patch indexes.
//!
//! Every removal tolerates a missing target, so a pass interrupted halfway
//! is finished by the next one. Two things are never removed because a
//! writer may still be producing them: segments not yet covered by a
//! committed high-water mark, and version files without companions that are
//! newer than the caller's committed maximum. In a fence inside the
//! timestamp tolerance the mark is the one that fence's own versions
//! reached; everywhere else it is the highest segment id any version has
//! seen in the id band.

mod reserved;

use crate::config::CleanOptions;
use crate::error::CoreResult;
use crate::fence::{list_fences, FenceDirFinder, FenceMeta, ROOT_FENCE_NAME};
use crate::layout::{self, in_fence};
use crate::metrics::{
    MetricsRecorder, NoopMetrics, TabletStats, CLEAN_REMOVED_FENCES, CLEAN_REMOVED_SEGMENTS,
    CLEAN_REMOVED_VERSIONS,
};
use crate::types::{now_us, IdMaskType, SegmentId};
use crate::version::{
    list_orphan_version_files, list_segments, list_versions, load_version, remove_version_files,
    VersionCoord,
};
use reserved::{public_version_count, reserve_versions, DiskVersion, Reservation};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tablet_storage::Directory;
use tracing::{debug, info, warn};

/// What a clean pass kept and removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanReport {
    /// Versions kept by the pass.
    pub reserved_versions: Vec<VersionCoord>,
    /// Removed segment directories.
    pub removed_segments: Vec<PathBuf>,
    /// Removed versions.
    pub removed_versions: Vec<VersionCoord>,
    /// Removed version files that had no companion.
    pub removed_orphans: Vec<VersionCoord>,
    /// Removed fence directories.
    pub removed_fences: Vec<String>,
    /// Removed segment directories inside patch indexes.
    pub removed_patch_segments: Vec<PathBuf>,
    /// Removed patch index directories.
    pub removed_patch_indexes: Vec<String>,
}

impl CleanReport {
    /// Returns true if nothing was removed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.removed_segments.is_empty()
            && self.removed_versions.is_empty()
            && self.removed_orphans.is_empty()
            && self.removed_fences.is_empty()
            && self.removed_patch_segments.is_empty()
            && self.removed_patch_indexes.is_empty()
    }
}

#[derive(Debug, Default)]
struct CleanState {
    fences: Vec<FenceMeta>,
    versions: Vec<DiskVersion>,
    orphans: Vec<VersionCoord>,
    reservation: Reservation,
    reserved_segments: BTreeSet<(String, SegmentId)>,
    reserved_segment_ids: BTreeSet<SegmentId>,
    reserved_fences: BTreeSet<String>,
    high_water: HashMap<IdMaskType, SegmentId>,
    fence_high_water: HashMap<String, HashMap<IdMaskType, SegmentId>>,
}

fn above_high_water(high_water: &HashMap<IdMaskType, SegmentId>, segment_id: SegmentId) -> bool {
    match segment_id.role() {
        Some(role) => high_water
            .get(&role)
            .map_or(true, |high| segment_id > *high),
        None => true,
    }
}

fn raise_high_water(high_water: &mut HashMap<IdMaskType, SegmentId>, segment_id: SegmentId) {
    if let Some(role) = segment_id.role() {
        high_water
            .entry(role)
            .and_modify(|high| *high = (*high).max(segment_id))
            .or_insert(segment_id);
    }
}

impl CleanState {
    fn is_in_flight(&self, segment_id: SegmentId) -> bool {
        above_high_water(&self.high_water, segment_id)
    }

    /// A tolerant fence may belong to a live writer: only what that fence
    /// itself committed bounds its segments, and a fence without versions of
    /// its own keeps all of them.
    fn is_in_flight_at(&self, location: &str, segment_id: SegmentId) -> bool {
        if !self.reservation.tolerant_fences.contains(location) {
            return self.is_in_flight(segment_id);
        }
        self.fence_high_water
            .get(location)
            .map_or(true, |high_water| above_high_water(high_water, segment_id))
    }

    /// Root and every fence that survives the pass.
    fn kept_locations(&self) -> Vec<String> {
        let mut locations = vec![ROOT_FENCE_NAME.to_string()];
        locations.extend(
            self.fences
                .iter()
                .filter(|f| self.reserved_fences.contains(&f.name))
                .map(|f| f.name.clone()),
        );
        locations
    }

    fn is_kept_location(&self, fence_name: &str) -> bool {
        fence_name == ROOT_FENCE_NAME || self.reserved_fences.contains(fence_name)
    }
}

/// Removes versions, segments and fences no reader can reach anymore.
pub struct VersionCleaner {
    directory: Arc<dyn Directory>,
    metrics: Arc<dyn MetricsRecorder>,
    stats: Arc<TabletStats>,
    state: CleanState,
}

impl VersionCleaner {
    /// Creates a cleaner over a tablet directory.
    #[must_use]
    pub fn new(directory: Arc<dyn Directory>) -> Self {
        Self {
            directory,
            metrics: Arc::new(NoopMetrics),
            stats: Arc::new(TabletStats::new()),
            state: CleanState::default(),
        }
    }

    /// Attaches a metrics recorder.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsRecorder>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Attaches shared tablet statistics.
    #[must_use]
    pub fn with_stats(mut self, stats: Arc<TabletStats>) -> Self {
        self.stats = stats;
        self
    }

    /// Forgets everything learned by the previous pass.
    pub fn reset(&mut self) {
        self.state = CleanState::default();
    }

    /// Runs one clean pass.
    ///
    /// `reserved_versions` are versions readers currently hold; they and
    /// everything they reference survive the pass.
    ///
    /// # Errors
    ///
    /// Any listing, load or removal failure aborts the pass. What was
    /// removed before the failure stays removed.
    pub fn clean(
        &mut self,
        options: &CleanOptions,
        reserved_versions: &[VersionCoord],
    ) -> CoreResult<CleanReport> {
        self.clean_at(options, reserved_versions, now_us())
    }

    /// Runs one clean pass with `now_us` as the wall-clock time.
    ///
    /// # Errors
    ///
    /// See [`VersionCleaner::clean`].
    pub fn clean_at(
        &mut self,
        options: &CleanOptions,
        reserved_versions: &[VersionCoord],
        now_us: i64,
    ) -> CoreResult<CleanReport> {
        self.reset();
        self.collect()?;

        let keep = options.keep_version_count.max(1) as usize;
        let public_count = public_version_count(&self.state.versions);
        if !options.ignore_keep_version_count && public_count <= keep {
            debug!(public_count, keep, "nothing to clean");
            return Ok(CleanReport::default());
        }

        self.state.reservation = reserve_versions(
            &self.state.versions,
            &self.state.fences,
            options,
            reserved_versions,
            now_us,
        );
        resolve_references(self.directory.as_ref(), &mut self.state)?;

        let mut report = CleanReport {
            reserved_versions: self.state.reservation.versions.iter().cloned().collect(),
            ..CleanReport::default()
        };
        self.remove_segments(&mut report)?;
        self.remove_versions(options, &mut report)?;
        self.remove_fences(&mut report)?;
        self.remove_patch_indexes(&mut report)?;

        self.record(&report);
        info!(
            reserved = report.reserved_versions.len(),
            segments = report.removed_segments.len(),
            versions = report.removed_versions.len(),
            fences = report.removed_fences.len(),
            "clean finished"
        );
        Ok(report)
    }

    fn collect(&mut self) -> CoreResult<()> {
        let directory = self.directory.as_ref();
        self.state.fences = list_fences(directory)?;

        let mut locations = vec![ROOT_FENCE_NAME.to_string()];
        locations.extend(self.state.fences.iter().map(|f| f.name.clone()));
        for location in &locations {
            for id in list_versions(directory, location)? {
                let version = load_version(directory, location, id)?;
                self.state.versions.push(DiskVersion {
                    coord: VersionCoord::new(id, location.clone()),
                    version,
                });
            }
            for id in list_orphan_version_files(directory, location)? {
                self.state.orphans.push(VersionCoord::new(id, location.clone()));
            }
        }

        for disk in &self.state.versions {
            let version = &disk.version;
            let fence_high_water = self
                .state
                .fence_high_water
                .entry(version.fence_name().to_string())
                .or_default();
            for id in version.segment_ids().chain([version.last_segment_id()]) {
                raise_high_water(&mut self.state.high_water, id);
                raise_high_water(fence_high_water, id);
            }
        }
        debug!(
            fences = self.state.fences.len(),
            versions = self.state.versions.len(),
            orphans = self.state.orphans.len(),
            "collected tablet contents"
        );
        Ok(())
    }

    fn remove_segments(&self, report: &mut CleanReport) -> CoreResult<()> {
        let directory = self.directory.as_ref();
        for location in self.state.kept_locations() {
            for segment_id in list_segments(directory, &location)? {
                if self
                    .state
                    .reserved_segments
                    .contains(&(location.clone(), segment_id))
                    || self.state.is_in_flight_at(&location, segment_id)
                {
                    continue;
                }
                let path = in_fence(&location, &layout::segment_dir_name(segment_id));
                directory.remove_directory(&path, true)?;
                info!(path = %path.display(), "removed segment");
                report.removed_segments.push(path);
            }
        }
        Ok(())
    }

    fn remove_versions(&self, options: &CleanOptions, report: &mut CleanReport) -> CoreResult<()> {
        let directory = self.directory.as_ref();
        for disk in &self.state.versions {
            let coord = &disk.coord;
            if self.state.reservation.versions.contains(coord)
                || !self.state.is_kept_location(&coord.fence_name)
            {
                continue;
            }
            remove_version_files(directory, &coord.fence_name, coord.version_id)?;
            info!(version = %coord, "removed version");
            report.removed_versions.push(coord.clone());
        }

        let current_max = options.current_max_version_id;
        for coord in &self.state.orphans {
            let committed = current_max.is_valid()
                && coord.version_id.role() == current_max.role()
                && coord.version_id <= current_max;
            if !committed || !self.state.is_kept_location(&coord.fence_name) {
                continue;
            }
            remove_version_files(directory, &coord.fence_name, coord.version_id)?;
            info!(version = %coord, "removed orphan version file");
            report.removed_orphans.push(coord.clone());
        }
        Ok(())
    }

    fn remove_fences(&self, report: &mut CleanReport) -> CoreResult<()> {
        for fence in &self.state.fences {
            if self.state.reserved_fences.contains(&fence.name) {
                continue;
            }
            self.directory
                .remove_directory(Path::new(&fence.name), true)?;
            info!(fence = %fence.name, "removed fence");
            report.removed_fences.push(fence.name.clone());
        }
        Ok(())
    }

    fn remove_patch_indexes(&self, report: &mut CleanReport) -> CoreResult<()> {
        let directory = self.directory.as_ref();
        for name in directory.list_dir(Path::new(ROOT_FENCE_NAME))? {
            if layout::parse_patch_index_dir_name(&name).is_err() {
                continue;
            }
            let patch_dir = in_fence(ROOT_FENCE_NAME, &name);
            for entry in directory.list_dir(&patch_dir)? {
                let Ok(segment_id) = layout::parse_segment_dir_name(&entry) else {
                    continue;
                };
                if self.state.reserved_segment_ids.contains(&segment_id)
                    || self.state.is_in_flight(segment_id)
                {
                    continue;
                }
                let path = patch_dir.join(&entry);
                directory.remove_directory(&path, true)?;
                debug!(path = %path.display(), "removed patch segment");
                report.removed_patch_segments.push(path);
            }
            if directory.list_dir(&patch_dir)?.is_empty() {
                directory.remove_directory(&patch_dir, true)?;
                info!(patch_index = %name, "removed patch index");
                report.removed_patch_indexes.push(name);
            }
        }
        Ok(())
    }

    fn record(&self, report: &CleanReport) {
        let segments = (report.removed_segments.len() + report.removed_patch_segments.len()) as u64;
        let versions = (report.removed_versions.len() + report.removed_orphans.len()) as u64;
        let fences = report.removed_fences.len() as u64;
        self.metrics
            .record(CLEAN_REMOVED_SEGMENTS, i64::try_from(segments).unwrap_or(i64::MAX));
        self.metrics
            .record(CLEAN_REMOVED_VERSIONS, i64::try_from(versions).unwrap_or(i64::MAX));
        self.metrics
            .record(CLEAN_REMOVED_FENCES, i64::try_from(fences).unwrap_or(i64::MAX));
        self.stats.record_clean(segments, versions, fences);
    }
}

/// Follows reserved versions to the segments and fences they reference.
fn resolve_references(directory: &dyn Directory, state: &mut CleanState) -> CoreResult<()> {
    state
        .reserved_fences
        .extend(state.reservation.tolerant_fences.iter().cloned());

    for disk in &state.versions {
        if !state.reservation.versions.contains(&disk.coord) {
            continue;
        }
        for fence in [disk.coord.fence_name.as_str(), disk.version.fence_name()] {
            if fence != ROOT_FENCE_NAME {
                state.reserved_fences.insert(fence.to_string());
            }
        }

        let finder = FenceDirFinder::new(directory, disk.version.fence_name());
        for segment_id in disk.version.segment_ids() {
            state.reserved_segment_ids.insert(segment_id);
            match finder.locate_segment(segment_id)? {
                Some(location) => {
                    if location != ROOT_FENCE_NAME {
                        state.reserved_fences.insert(location.clone());
                    }
                    state.reserved_segments.insert((location, segment_id));
                }
                None => warn!(
                    version = %disk.coord,
                    segment_id = %segment_id,
                    "reserved version references a missing segment"
                ),
            }
        }
    }
    Ok(())
}
