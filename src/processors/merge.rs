//! Alignment of acoustic records with GPS position fixes.
//!
//! Two interchangeable algorithms are provided:
//! - [`PositionMerger::merge_positions`]: as-of join that accepts the closest
//!   fix in a given direction only within a tolerance
//! - [`PositionMerger::merge_positions_interpolated`]: time-weighted linear
//!   interpolation on the union of both timelines, with a nearest-fix
//!   fallback outside the span of the track
//!
//! Both sort their inputs first (stable), keep one output row per acoustic
//! record and flag each row with `position_matched`.

use std::str::FromStr;

use chrono::{Duration, NaiveDateTime};
use log::{debug, info};
use thiserror::Error;

use crate::config::{CoordinateConfig, ProcessingConfig};
use crate::core::table::{Column, Table, TableError};
use crate::core::time::{parse_duration, TimeError};
use crate::core::transforms::{CoordinateTransformer, TransformError};

/// Errors that can occur while merging positions.
#[derive(Error, Debug)]
pub enum MergeError {
    #[error(transparent)]
    Schema(#[from] TableError),

    #[error(transparent)]
    Time(#[from] TimeError),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error("invalid merge direction '{0}' (expected nearest, forward or backward)")]
    InvalidDirection(String),
}

/// Result type for merge operations.
pub type Result<T> = std::result::Result<T, MergeError>;

/// Which side of an acoustic timestamp a fix may come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// Closest fix on either side; ties go to the earlier fix
    #[default]
    Nearest,
    /// Closest fix at or after the timestamp
    Forward,
    /// Closest fix at or before the timestamp
    Backward,
}

impl FromStr for Direction {
    type Err = MergeError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nearest" => Ok(Direction::Nearest),
            "forward" => Ok(Direction::Forward),
            "backward" => Ok(Direction::Backward),
            _ => Err(MergeError::InvalidDirection(s.to_string())),
        }
    }
}

/// A single GPS fix in WGS84 degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionFix {
    pub timestamp: NaiveDateTime,
    pub latitude: f64,
    pub longitude: f64,
}

/// Position fixes sorted ascending by timestamp.
#[derive(Debug, Clone, Default)]
pub struct PositionTrack {
    fixes: Vec<PositionFix>,
}

impl PositionTrack {
    /// Build a track from fixes in any order. The sort is stable.
    pub fn from_fixes(mut fixes: Vec<PositionFix>) -> Self {
        fixes.sort_by_key(|f| f.timestamp);
        Self { fixes }
    }

    /// Extract fixes from a position table. Rows missing either coordinate
    /// are not fixes and are skipped.
    pub fn from_table(table: &Table, lat_col: &str, lon_col: &str) -> Result<Self> {
        let lat = table.require(lat_col)?;
        let lon = table.require(lon_col)?;

        let fixes: Vec<PositionFix> = table
            .timestamps
            .iter()
            .zip(lat.values.iter().zip(&lon.values))
            .filter_map(|(&timestamp, (la, lo))| {
                Some(PositionFix {
                    timestamp,
                    latitude: (*la)?,
                    longitude: (*lo)?,
                })
            })
            .collect();

        let skipped = table.len() - fixes.len();
        if skipped > 0 {
            debug!("Skipped {} position rows with missing coordinates", skipped);
        }

        Ok(Self::from_fixes(fixes))
    }

    pub fn fixes(&self) -> &[PositionFix] {
        &self.fixes
    }

    pub fn len(&self) -> usize {
        self.fixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fixes.is_empty()
    }

    fn timestamps(&self) -> Vec<NaiveDateTime> {
        self.fixes.iter().map(|f| f.timestamp).collect()
    }

    /// One fix per distinct timestamp; the last fix of a tie wins.
    fn deduplicated(&self) -> Vec<PositionFix> {
        let mut out: Vec<PositionFix> = Vec::with_capacity(self.fixes.len());
        for fix in &self.fixes {
            match out.last_mut() {
                Some(last) if last.timestamp == fix.timestamp => *last = *fix,
                _ => out.push(*fix),
            }
        }
        if out.len() < self.fixes.len() {
            debug!(
                "Collapsed {} position fixes sharing a timestamp",
                self.fixes.len() - out.len()
            );
        }
        out
    }
}

/// Index of the fix matched to `t` in a sorted timeline, before any
/// tolerance check.
pub(crate) fn asof_index(
    times: &[NaiveDateTime],
    t: NaiveDateTime,
    direction: Direction,
) -> Option<usize> {
    // last index with time <= t
    let backward = || {
        let idx = times.partition_point(|&p| p <= t);
        idx.checked_sub(1)
    };
    // first index with time >= t
    let forward = || {
        let idx = times.partition_point(|&p| p < t);
        (idx < times.len()).then_some(idx)
    };

    match direction {
        Direction::Backward => backward(),
        Direction::Forward => forward(),
        Direction::Nearest => match (backward(), forward()) {
            (Some(b), Some(f)) => {
                if t - times[b] <= times[f] - t {
                    Some(b)
                } else {
                    Some(f)
                }
            }
            (b, f) => b.or(f),
        },
    }
}

/// Fill interior gaps by time-weighted linear interpolation.
///
/// Only entries strictly between two known values are filled; leading and
/// trailing gaps stay missing. `limit` caps how many consecutive entries of
/// one gap are filled, counting from its start.
pub(crate) fn interpolate_time(
    times: &[NaiveDateTime],
    values: &[Option<f64>],
    limit: Option<usize>,
) -> Vec<Option<f64>> {
    let mut out = values.to_vec();
    let mut prev: Option<usize> = None;

    for (i, value) in values.iter().enumerate() {
        let Some(v1) = *value else { continue };
        if let Some(p) = prev {
            let v0 = values[p].unwrap_or(v1);
            let t0 = times[p];
            let span = (times[i] - t0).num_milliseconds() as f64;
            let gap_end = match limit {
                Some(limit) => (p + 1 + limit).min(i),
                None => i,
            };
            for (j, slot) in out.iter_mut().enumerate().take(gap_end).skip(p + 1) {
                *slot = if span > 0.0 {
                    let w = (times[j] - t0).num_milliseconds() as f64 / span;
                    Some(v0 + (v1 - v0) * w)
                } else {
                    Some(v0)
                };
            }
        }
        prev = Some(i);
    }

    out
}

/// Carry the last known value over the trailing gap, at most `limit`
/// entries. Leading gaps are left alone.
fn hold_trailing(values: &mut [Option<f64>], limit: Option<usize>) {
    let Some(last) = values.iter().rposition(Option::is_some) else {
        return;
    };
    let held = values[last];
    let end = match limit {
        Some(limit) => (last + 1).saturating_add(limit).min(values.len()),
        None => values.len(),
    };
    for slot in &mut values[last + 1..end] {
        *slot = held;
    }
}

/// Per-row match flag written into every merged table, 1.0 or 0.0.
pub const POSITION_MATCHED: &str = "position_matched";

/// Percentage of rows flagged as matched; zero for an empty table.
fn match_rate(matched: &[bool]) -> f64 {
    if matched.is_empty() {
        return 0.0;
    }
    matched.iter().filter(|&&m| m).count() as f64 / matched.len() as f64 * 100.0
}

/// Reprojection applied after a merge.
#[derive(Debug)]
pub struct Reprojection {
    pub transformer: CoordinateTransformer,
    pub easting_col: String,
    pub northing_col: String,
    /// Names for suffixed copies of the geographic pair, as `(lat, lon)`
    pub keep_original: Option<(String, String)>,
}

/// Result of a merge: the acoustic table (time-sorted) extended with
/// position columns.
#[derive(Debug, Clone)]
pub struct MergedTable {
    pub table: Table,
    /// True iff both latitude and longitude are present for the row
    pub position_matched: Vec<bool>,
    /// `matched / total * 100`
    pub match_rate: f64,
    pub lat_col: String,
    pub lon_col: String,
}

impl MergedTable {
    pub fn latitude(&self) -> &[Option<f64>] {
        self.table
            .column(&self.lat_col)
            .map(|c| c.values.as_slice())
            .unwrap_or(&[])
    }

    pub fn longitude(&self) -> &[Option<f64>] {
        self.table
            .column(&self.lon_col)
            .map(|c| c.values.as_slice())
            .unwrap_or(&[])
    }

    pub fn matched_count(&self) -> usize {
        self.position_matched.iter().filter(|&&m| m).count()
    }

    pub fn into_table(self) -> Table {
        self.table
    }
}

/// Merges acoustic tables with position tracks.
#[derive(Debug)]
pub struct PositionMerger {
    pub lat_col: String,
    pub lon_col: String,
    reprojection: Option<Reprojection>,
    max_fallback_gap: Option<Duration>,
}

impl Default for PositionMerger {
    fn default() -> Self {
        Self::new("latitude", "longitude")
    }
}

impl PositionMerger {
    pub fn new(lat_col: impl Into<String>, lon_col: impl Into<String>) -> Self {
        Self {
            lat_col: lat_col.into(),
            lon_col: lon_col.into(),
            reprojection: None,
            max_fallback_gap: None,
        }
    }

    /// Build a merger from the coordinate and processing settings.
    pub fn from_config(coords: &CoordinateConfig, processing: &ProcessingConfig) -> Result<Self> {
        let columns = &coords.columns;
        let mut merger = Self::new(columns.input_lat.clone(), columns.input_lon.clone());

        if coords.transform_on_load {
            let transformer = CoordinateTransformer::new(&coords.input_crs, &coords.output_crs)?;
            let keep_original = columns.keep_original.then(|| {
                (
                    format!("{}{}", columns.input_lat, columns.original_lat_suffix),
                    format!("{}{}", columns.input_lon, columns.original_lon_suffix),
                )
            });
            merger = merger.with_reprojection(Reprojection {
                transformer,
                easting_col: columns.output_easting.clone(),
                northing_col: columns.output_northing.clone(),
                keep_original,
            });
        }

        if let Some(gap) = &processing.max_fallback_gap {
            merger = merger.with_max_fallback_gap(parse_duration(gap)?);
        }

        Ok(merger)
    }

    pub fn with_reprojection(mut self, reprojection: Reprojection) -> Self {
        self.reprojection = Some(reprojection);
        self
    }

    /// Cap the distance of the interpolated merge's nearest-fix fallback.
    pub fn with_max_fallback_gap(mut self, gap: Duration) -> Self {
        self.max_fallback_gap = Some(gap);
        self
    }

    pub fn reprojection(&self) -> Option<&Reprojection> {
        self.reprojection.as_ref()
    }

    /// Tolerance-bounded as-of join.
    ///
    /// Each acoustic record takes the fix chosen by `direction` if it lies
    /// within `tolerance`; otherwise its position stays missing.
    pub fn merge_positions(
        &self,
        acoustic: &Table,
        positions: &Table,
        tolerance: Duration,
        direction: Direction,
    ) -> Result<MergedTable> {
        let track = PositionTrack::from_table(positions, &self.lat_col, &self.lon_col)?;
        Ok(self.merge_track(acoustic, &track, tolerance, direction))
    }

    /// As-of join against an already extracted track.
    pub fn merge_track(
        &self,
        acoustic: &Table,
        track: &PositionTrack,
        tolerance: Duration,
        direction: Direction,
    ) -> MergedTable {
        let sorted = acoustic.sorted_by_time();
        let times = track.timestamps();

        let mut lat = Vec::with_capacity(sorted.len());
        let mut lon = Vec::with_capacity(sorted.len());

        for &t in &sorted.timestamps {
            let fix = asof_index(&times, t, direction)
                .filter(|&idx| (times[idx] - t).abs() <= tolerance)
                .map(|idx| track.fixes[idx]);
            lat.push(fix.map(|f| f.latitude));
            lon.push(fix.map(|f| f.longitude));
        }

        let merged = self.assemble(sorted, lat, lon);
        info!("Position match rate: {:.2}%", merged.match_rate);
        merged
    }

    /// Interpolated join on the union of acoustic and position timestamps.
    pub fn merge_positions_interpolated(
        &self,
        acoustic: &Table,
        positions: &Table,
    ) -> Result<MergedTable> {
        let track = PositionTrack::from_table(positions, &self.lat_col, &self.lon_col)?;
        Ok(self.interpolate_track(acoustic, &track))
    }

    /// Interpolated join against an already extracted track.
    pub fn interpolate_track(&self, acoustic: &Table, track: &PositionTrack) -> MergedTable {
        let sorted = acoustic.sorted_by_time();
        let fixes = track.deduplicated();

        // Union timeline of distinct acoustic and position timestamps
        let mut timeline: Vec<NaiveDateTime> = sorted
            .timestamps
            .iter()
            .copied()
            .chain(fixes.iter().map(|f| f.timestamp))
            .collect();
        timeline.sort_unstable();
        timeline.dedup();

        let mut known_lat = vec![None; timeline.len()];
        let mut known_lon = vec![None; timeline.len()];
        for fix in &fixes {
            if let Ok(idx) = timeline.binary_search(&fix.timestamp) {
                known_lat[idx] = Some(fix.latitude);
                known_lon[idx] = Some(fix.longitude);
            }
        }

        let interp_lat = interpolate_time(&timeline, &known_lat, None);
        let interp_lon = interpolate_time(&timeline, &known_lon, None);

        let fix_times: Vec<NaiveDateTime> = fixes.iter().map(|f| f.timestamp).collect();
        let mut fallback_count = 0usize;

        let mut lat = Vec::with_capacity(sorted.len());
        let mut lon = Vec::with_capacity(sorted.len());
        for &t in &sorted.timestamps {
            let (mut la, mut lo) = match timeline.binary_search(&t) {
                Ok(idx) => (interp_lat[idx], interp_lon[idx]),
                Err(_) => (None, None),
            };

            // Outside the span of the track: nearest fix
            if la.is_none() || lo.is_none() {
                let nearest = asof_index(&fix_times, t, Direction::Nearest)
                    .filter(|&idx| match self.max_fallback_gap {
                        Some(gap) => (fix_times[idx] - t).abs() <= gap,
                        None => true,
                    })
                    .map(|idx| fixes[idx]);
                if let Some(fix) = nearest {
                    fallback_count += 1;
                    la = la.or(Some(fix.latitude));
                    lo = lo.or(Some(fix.longitude));
                }
            }

            lat.push(la);
            lon.push(lo);
        }

        if fallback_count > 0 {
            debug!("{} records positioned by nearest-fix fallback", fallback_count);
        }

        let merged = self.assemble(sorted, lat, lon);
        info!("Position interpolation match rate: {:.2}%", merged.match_rate);
        merged
    }

    /// Fill remaining latitude/longitude gaps of a merged table by
    /// time-weighted interpolation, at most `limit` consecutive rows per gap.
    ///
    /// Rows after the last known position hold it (again up to `limit`);
    /// rows before the first known position stay missing.
    pub fn interpolate_positions(&self, merged: &MergedTable, limit: Option<usize>) -> MergedTable {
        let sorted = merged.table.sorted_by_time();
        let fill = |name: &str| {
            let values = sorted
                .column(name)
                .map(|c| c.values.clone())
                .unwrap_or_else(|| vec![None; sorted.len()]);
            let mut filled = interpolate_time(&sorted.timestamps, &values, limit);
            hold_trailing(&mut filled, limit);
            filled
        };
        let lat = fill(&self.lat_col);
        let lon = fill(&self.lon_col);
        self.assemble(sorted, lat, lon)
    }

    /// Attach position columns, the matched flags and optional projection.
    fn assemble(&self, mut table: Table, lat: Vec<Option<f64>>, lon: Vec<Option<f64>>) -> MergedTable {
        let position_matched: Vec<bool> = lat
            .iter()
            .zip(&lon)
            .map(|(a, b)| a.is_some() && b.is_some())
            .collect();
        let rate = match_rate(&position_matched);

        if let Some(reproj) = &self.reprojection {
            let (easting, northing) = reproj.transformer.forward_many(&lon, &lat);
            replace_column(&mut table, Column::new(reproj.easting_col.clone(), easting));
            replace_column(&mut table, Column::new(reproj.northing_col.clone(), northing));
            if let Some((lat_name, lon_name)) = &reproj.keep_original {
                replace_column(&mut table, Column::new(lon_name.clone(), lon.clone()));
                replace_column(&mut table, Column::new(lat_name.clone(), lat.clone()));
            }
        }

        replace_column(&mut table, Column::new(self.lat_col.clone(), lat));
        replace_column(&mut table, Column::new(self.lon_col.clone(), lon));
        let flags = position_matched
            .iter()
            .map(|&m| Some(if m { 1.0 } else { 0.0 }))
            .collect();
        replace_column(&mut table, Column::new(POSITION_MATCHED, flags));

        MergedTable {
            table,
            position_matched,
            match_rate: rate,
            lat_col: self.lat_col.clone(),
            lon_col: self.lon_col.clone(),
        }
    }
}

/// Set a column whose length is known to match the table.
fn replace_column(table: &mut Table, column: Column) {
    if table.has_column(&column.name) {
        debug!("Replacing existing column '{}'", column.name);
    }
    // Lengths always match here: every column is built from the sorted table
    if let Err(e) = table.set_column(column) {
        log::error!("{}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn t0() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2023, 10, 23)
            .unwrap()
            .and_hms_opt(0, 21, 14)
            .unwrap()
    }

    fn secs(s: i64) -> NaiveDateTime {
        t0() + Duration::seconds(s)
    }

    fn acoustic(offsets: &[i64]) -> Table {
        let values: Vec<f64> = offsets.iter().map(|&s| s as f64).collect();
        Table::from_columns(
            offsets.iter().map(|&s| secs(s)).collect(),
            vec![Column::from_values("backscatter", &values)],
        )
        .unwrap()
    }

    fn positions(rows: &[(i64, f64, f64)]) -> Table {
        let lat: Vec<f64> = rows.iter().map(|r| r.1).collect();
        let lon: Vec<f64> = rows.iter().map(|r| r.2).collect();
        Table::from_columns(
            rows.iter().map(|r| secs(r.0)).collect(),
            vec![
                Column::from_values("latitude", &lat),
                Column::from_values("longitude", &lon),
            ],
        )
        .unwrap()
    }

    fn close(a: Option<f64>, b: f64) -> bool {
        a.map_or(false, |a| (a - b).abs() < 1e-9)
    }

    #[test]
    fn test_direction_parse() {
        assert_eq!("Nearest".parse::<Direction>().unwrap(), Direction::Nearest);
        assert_eq!("backward".parse::<Direction>().unwrap(), Direction::Backward);
        assert!("sideways".parse::<Direction>().is_err());
    }

    #[test]
    fn test_asof_index_directions() {
        let times = vec![secs(0), secs(10), secs(10), secs(20)];
        assert_eq!(asof_index(&times, secs(12), Direction::Backward), Some(2));
        assert_eq!(asof_index(&times, secs(10), Direction::Forward), Some(1));
        assert_eq!(asof_index(&times, secs(12), Direction::Forward), Some(3));
        assert_eq!(asof_index(&times, secs(-1), Direction::Backward), None);
        assert_eq!(asof_index(&times, secs(21), Direction::Forward), None);
        assert_eq!(asof_index(&times, secs(16), Direction::Nearest), Some(3));
        // equidistant: earlier fix wins
        assert_eq!(asof_index(&times, secs(15), Direction::Nearest), Some(2));
    }

    #[test]
    fn test_tolerance_join_respects_tolerance() {
        let merger = PositionMerger::default();
        let merged = merger
            .merge_positions(
                &acoustic(&[0, 3, 20]),
                &positions(&[(1, 55.0, 12.0), (10, 55.1, 12.1)]),
                Duration::seconds(2),
                Direction::Nearest,
            )
            .unwrap();

        assert_eq!(merged.position_matched, vec![true, true, false]);
        assert!(close(merged.latitude()[0], 55.0));
        assert!(close(merged.latitude()[1], 55.0));
        assert_eq!(merged.latitude()[2], None);
        assert!((merged.match_rate - 200.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_tolerance_join_backward_and_forward() {
        let merger = PositionMerger::default();
        let fixes = positions(&[(0, 55.0, 12.0), (10, 56.0, 13.0)]);

        let backward = merger
            .merge_positions(&acoustic(&[6]), &fixes, Duration::seconds(10), Direction::Backward)
            .unwrap();
        assert!(close(backward.latitude()[0], 55.0));

        let forward = merger
            .merge_positions(&acoustic(&[6]), &fixes, Duration::seconds(10), Direction::Forward)
            .unwrap();
        assert!(close(forward.latitude()[0], 56.0));
    }

    #[test]
    fn test_tolerance_monotonic_match_rate() {
        let merger = PositionMerger::default();
        let a = acoustic(&[0, 4, 9, 15, 31, 47, 60]);
        let p = positions(&[(2, 55.0, 12.0), (30, 55.2, 12.2), (50, 55.4, 12.4)]);

        let mut last_rate = -1.0;
        for tol in [0, 1, 2, 5, 10, 20, 60] {
            let merged = merger
                .merge_positions(&a, &p, Duration::seconds(tol), Direction::Nearest)
                .unwrap();
            assert!(merged.match_rate >= last_rate);
            last_rate = merged.match_rate;
        }
        assert_eq!(last_rate, 100.0);
    }

    #[test]
    fn test_interpolated_midpoint() {
        let merger = PositionMerger::default();
        let merged = merger
            .merge_positions_interpolated(
                &acoustic(&[0, 1, 2]),
                &positions(&[(0, 55.0, 12.0), (2, 55.0, 12.2)]),
            )
            .unwrap();

        assert!(close(merged.latitude()[1], 55.0));
        assert!(close(merged.longitude()[1], 12.1));
        assert_eq!(merged.position_matched, vec![true, true, true]);
        assert_eq!(merged.match_rate, 100.0);
    }

    #[test]
    fn test_interpolation_is_time_weighted() {
        let merger = PositionMerger::default();
        // an extra acoustic timestamp between the fixes must not shift weights
        let merged = merger
            .merge_positions_interpolated(
                &acoustic(&[1, 2, 9]),
                &positions(&[(0, 50.0, 10.0), (10, 60.0, 20.0)]),
            )
            .unwrap();
        assert!(close(merged.latitude()[0], 51.0));
        assert!(close(merged.latitude()[1], 52.0));
        assert!(close(merged.longitude()[2], 19.0));
    }

    #[test]
    fn test_interpolated_nearest_fallback_outside_span() {
        let merger = PositionMerger::default();
        let merged = merger
            .merge_positions_interpolated(
                &acoustic(&[-100, 5, 500]),
                &positions(&[(0, 55.0, 12.0), (10, 56.0, 13.0)]),
            )
            .unwrap();

        assert!(close(merged.latitude()[0], 55.0));
        assert!(close(merged.latitude()[1], 55.5));
        assert!(close(merged.longitude()[2], 13.0));
        assert_eq!(merged.match_rate, 100.0);
    }

    #[test]
    fn test_fallback_gap_cap() {
        let merger = PositionMerger::default().with_max_fallback_gap(Duration::seconds(30));
        let merged = merger
            .merge_positions_interpolated(
                &acoustic(&[-100, 5, 20]),
                &positions(&[(0, 55.0, 12.0), (10, 56.0, 13.0)]),
            )
            .unwrap();
        assert_eq!(merged.position_matched, vec![false, true, true]);
    }

    #[test]
    fn test_interpolated_covers_track_span() {
        let merger = PositionMerger::default();
        let offsets: Vec<i64> = (0..=120).step_by(7).collect();
        let merged = merger
            .merge_positions_interpolated(
                &acoustic(&offsets),
                &positions(&[(0, 55.0, 12.0), (33, 55.3, 12.1), (120, 55.9, 12.8)]),
            )
            .unwrap();
        assert!(merged.position_matched.iter().all(|&m| m));
    }

    #[test]
    fn test_interpolated_independent_of_row_order() {
        let merger = PositionMerger::default();
        let fixes = [(0, 55.0, 12.0), (10, 55.5, 12.5), (20, 55.7, 12.9)];
        let mut reversed_fixes = fixes;
        reversed_fixes.reverse();

        let a = merger
            .merge_positions_interpolated(&acoustic(&[3, 12, 25, -4]), &positions(&fixes))
            .unwrap();
        let b = merger
            .merge_positions_interpolated(&acoustic(&[-4, 25, 12, 3]), &positions(&reversed_fixes))
            .unwrap();

        assert_eq!(a.table, b.table);
        assert_eq!(a.position_matched, b.position_matched);
    }

    #[test]
    fn test_empty_positions() {
        let merger = PositionMerger::default();
        let empty = positions(&[]);

        let interp = merger
            .merge_positions_interpolated(&acoustic(&[0, 1, 2]), &empty)
            .unwrap();
        assert!(interp.position_matched.iter().all(|&m| !m));
        assert_eq!(interp.match_rate, 0.0);

        let joined = merger
            .merge_positions(&acoustic(&[0, 1]), &empty, Duration::seconds(5), Direction::Nearest)
            .unwrap();
        assert_eq!(joined.match_rate, 0.0);
        assert_eq!(joined.latitude(), &[None, None]);
        assert_eq!(
            joined.into_table().column(POSITION_MATCHED).unwrap().values,
            vec![Some(0.0), Some(0.0)]
        );
    }

    #[test]
    fn test_matched_flags_survive_into_table() {
        let merger = PositionMerger::default();
        let merged = merger
            .merge_positions(
                &acoustic(&[0, 3, 20]),
                &positions(&[(1, 55.0, 12.0)]),
                Duration::seconds(2),
                Direction::Nearest,
            )
            .unwrap();

        let refilled = merger.interpolate_positions(&merged, None);
        let table = merged.into_table();
        assert_eq!(
            table.column(POSITION_MATCHED).unwrap().values,
            vec![Some(1.0), Some(1.0), Some(0.0)]
        );
        // recomputed, not duplicated, when positions are refilled
        assert_eq!(
            refilled.table.column_names().iter().filter(|c| *c == POSITION_MATCHED).count(),
            1
        );
    }

    #[test]
    fn test_missing_position_columns_is_schema_error() {
        let merger = PositionMerger::default();
        let bad = Table::from_columns(vec![secs(0)], vec![Column::from_values("lat", &[55.0])]).unwrap();
        let err = merger.merge_positions_interpolated(&acoustic(&[0]), &bad).unwrap_err();
        assert!(matches!(err, MergeError::Schema(TableError::MissingColumn { .. })));
    }

    #[test]
    fn test_output_is_time_sorted_one_to_one() {
        let merger = PositionMerger::default();
        let merged = merger
            .merge_positions(
                &acoustic(&[5, 1, 3, 3]),
                &positions(&[(0, 55.0, 12.0)]),
                Duration::seconds(60),
                Direction::Nearest,
            )
            .unwrap();
        assert_eq!(merged.table.len(), 4);
        assert!(merged.table.is_time_sorted());
        assert_eq!(
            merged.table.column("backscatter").unwrap().values,
            vec![Some(1.0), Some(3.0), Some(3.0), Some(5.0)]
        );
    }

    #[test]
    fn test_interpolate_positions_with_limit() {
        let merger = PositionMerger::default();
        let merged = merger
            .merge_positions(
                &acoustic(&[0, 1, 2, 3, 4]),
                &positions(&[(0, 55.0, 12.0), (4, 55.4, 12.4)]),
                Duration::zero(),
                Direction::Nearest,
            )
            .unwrap();
        assert_eq!(merged.matched_count(), 2);

        let limited = merger.interpolate_positions(&merged, Some(1));
        assert_eq!(limited.position_matched, vec![true, true, false, false, true]);
        assert!(close(limited.latitude()[1], 55.1));

        let full = merger.interpolate_positions(&merged, None);
        assert!(full.position_matched.iter().all(|&m| m));
        assert!(close(full.latitude()[3], 55.3));
    }

    #[test]
    fn test_interpolate_positions_holds_trailing_gap() {
        let merger = PositionMerger::default();
        let merged = merger
            .merge_positions(
                &acoustic(&[-1, 0, 1, 2, 3, 4]),
                &positions(&[(0, 55.0, 12.0), (1, 55.1, 12.1)]),
                Duration::zero(),
                Direction::Nearest,
            )
            .unwrap();

        let limited = merger.interpolate_positions(&merged, Some(2));
        assert_eq!(limited.position_matched, vec![false, true, true, true, true, false]);
        assert!(close(limited.latitude()[3], 55.1));
        assert!(close(limited.longitude()[4], 12.1));

        let full = merger.interpolate_positions(&merged, None);
        assert_eq!(full.latitude()[0], None);
        assert!(close(full.latitude()[5], 55.1));
    }

    #[test]
    fn test_reprojection_columns() {
        let merger = PositionMerger::default().with_reprojection(Reprojection {
            transformer: CoordinateTransformer::new("EPSG:4326", "EPSG:3857").unwrap(),
            easting_col: "easting".to_string(),
            northing_col: "northing".to_string(),
            keep_original: Some(("latitude_wgs84".to_string(), "longitude_wgs84".to_string())),
        });

        let merged = merger
            .merge_positions_interpolated(&acoustic(&[0, 1]), &positions(&[(0, 0.0, 0.0)]))
            .unwrap();

        let easting = merged.table.column("easting").unwrap();
        assert!(easting.values[0].unwrap().abs() < 1e-6);
        assert!(merged.table.has_column("northing"));
        assert_eq!(
            merged.table.column("longitude_wgs84").unwrap().values,
            vec![Some(0.0), Some(0.0)]
        );
    }
}
