//! Data processing modules.

pub mod merge;
pub mod reduction;
pub mod smoothing;
pub mod spatial;
pub mod statistics;
pub mod temporal;

// Re-export key types for convenience
pub use merge::{Direction, MergeError, MergedTable, PositionMerger};
pub use reduction::{AggregateBin, Aggregation, AggregationError, AggregationPlan, Reduction};
pub use smoothing::{fit_spline, lowess, savgol, SmoothingError, SmoothingMethod, Spline};
pub use spatial::{aggregate_by_hex, assign_hex_ids, hex_boundary, CoordinateSource, HexAggregation};
pub use statistics::{describe, detect_outliers, remove_outliers, stats_by_time, OutlierMethod, StatsSummary};
pub use temporal::{aggregate_by_time, find_gaps, rolling, RollingWindow, TimeAggregation};
