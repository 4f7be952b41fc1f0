//! Time-interval resampling and rolling windows.

use std::str::FromStr;

use chrono::{Duration, NaiveDateTime};
use log::debug;

use crate::core::table::{Column, Table};
use crate::core::time::{parse_duration, Interval};
use crate::processors::reduction::{
    aggregate_groups, AggregationError, Aggregation, AggregationPlan, Reduction,
};

pub type Result<T> = std::result::Result<T, AggregationError>;

/// Bins keyed by their (left) start time.
pub type TimeAggregation = Aggregation<NaiveDateTime>;

/// Resample `table` into left-closed bins of width `interval`.
///
/// The bin grid is anchored at midnight of the earliest day. Bins without
/// rows are not emitted.
pub fn aggregate_by_time(
    table: &Table,
    interval: Interval,
    plan: &AggregationPlan,
) -> Result<TimeAggregation> {
    let keys: Vec<Option<NaiveDateTime>> = match Interval::origin(&table.timestamps) {
        Some(origin) => table
            .timestamps
            .iter()
            .map(|&t| Some(interval.floor(origin, t)))
            .collect(),
        None => Vec::new(),
    };

    let aggregation = aggregate_groups(table, &keys, plan)?;
    debug!(
        "Resampled {} rows into {} bins of {}",
        table.len(),
        aggregation.len(),
        interval
    );
    Ok(aggregation)
}

impl Aggregation<NaiveDateTime> {
    /// Time-indexed table of the aggregated columns plus `row_count`.
    pub fn to_table(&self) -> Table {
        let mut columns: Vec<Column> = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, name)| Column::new(name.clone(), self.bins.iter().map(|b| b.values[i]).collect()))
            .collect();
        columns.push(Column::new(
            "row_count",
            self.bins.iter().map(|b| Some(b.row_count as f64)).collect(),
        ));

        Table {
            timestamps: self.bins.iter().map(|b| b.key).collect(),
            columns,
        }
    }
}

/// Rolling window extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollingWindow {
    /// Fixed number of rows; a window is only reduced when all of its rows
    /// have a value
    Rows(usize),
    /// Time span; rows sharing an instant are always in the same window
    Duration(Duration),
}

impl FromStr for RollingWindow {
    type Err = AggregationError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let text = s.trim();
        if let Ok(rows) = text.parse::<usize>() {
            return match rows {
                0 => Err(AggregationError::InvalidWindow(s.to_string())),
                n => Ok(RollingWindow::Rows(n)),
            };
        }
        let duration =
            parse_duration(text).map_err(|_| AggregationError::InvalidWindow(s.to_string()))?;
        if duration <= Duration::zero() {
            return Err(AggregationError::InvalidWindow(s.to_string()));
        }
        Ok(RollingWindow::Duration(duration))
    }
}

/// Rolling reduction of one series.
///
/// Rows are processed in time order and results are returned aligned with
/// the input rows. Trailing windows end at the current row; centered windows
/// are placed around it.
pub fn rolling(
    timestamps: &[NaiveDateTime],
    values: &[Option<f64>],
    window: RollingWindow,
    reduction: Reduction,
    center: bool,
) -> Vec<Option<f64>> {
    let n = values.len().min(timestamps.len());
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by_key(|&i| timestamps[i]);

    let times: Vec<NaiveDateTime> = order.iter().map(|&i| timestamps[i]).collect();
    let sorted: Vec<Option<f64>> = order.iter().map(|&i| values[i]).collect();

    let mut out = vec![None; n];
    if window == RollingWindow::Rows(0) {
        return out;
    }
    for (pos, &row) in order.iter().enumerate() {
        let (start, end) = match window {
            RollingWindow::Rows(w) => {
                let offset = if center { (w - 1) / 2 } else { 0 };
                let end = pos + 1 + offset;
                if end < w || end > n {
                    continue;
                }
                (end - w, end)
            }
            RollingWindow::Duration(w) => {
                let t = times[pos];
                // an edge past the representable range leaves that side open
                let (lower, upper) = if center {
                    (t.checked_sub_signed(w / 2), t.checked_add_signed(w / 2))
                } else {
                    (t.checked_sub_signed(w), Some(t))
                };
                (
                    lower.map_or(0, |lower| times.partition_point(|&p| p <= lower)),
                    upper.map_or(n, |upper| times.partition_point(|&p| p <= upper)),
                )
            }
        };

        let slice = &sorted[start..end];
        let present = slice.iter().filter(|v| v.is_some()).count();
        let enough = match window {
            RollingWindow::Rows(w) => present >= w,
            RollingWindow::Duration(_) => present >= 1,
        };
        if enough {
            out[row] = reduction.apply(slice);
        }
    }

    out
}

/// Rolling reduction of a named column, returned as a new column.
pub fn rolling_column(
    table: &Table,
    column: &str,
    window: RollingWindow,
    reduction: Reduction,
    center: bool,
) -> Result<Column> {
    let source = table.require(column)?;
    let values = rolling(&table.timestamps, &source.values, window, reduction, center);
    Ok(Column::new(format!("{}_rolling_{}", column, reduction), values))
}

/// Start times of the empty bins between the first and last timestamp.
pub fn find_gaps(timestamps: &[NaiveDateTime], interval: Interval) -> Vec<NaiveDateTime> {
    let Some(origin) = Interval::origin(timestamps) else {
        return Vec::new();
    };

    let mut occupied: Vec<NaiveDateTime> = timestamps.iter().map(|&t| interval.floor(origin, t)).collect();
    occupied.sort_unstable();
    occupied.dedup();

    let (Some(&first), Some(&last)) = (occupied.first(), occupied.last()) else {
        return Vec::new();
    };

    let step = interval.duration();
    let mut gaps = Vec::new();
    let mut bin = first;
    while bin < last {
        if occupied.binary_search(&bin).is_err() {
            gaps.push(bin);
        }
        bin += step;
    }

    if !gaps.is_empty() {
        debug!("Found {} empty {} bins", gaps.len(), interval);
    }
    gaps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::table::TableError;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2023, 10, 23)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn table(times: Vec<NaiveDateTime>, values: &[f64]) -> Table {
        Table::from_columns(times, vec![Column::from_values("sv", values)]).unwrap()
    }

    #[test]
    fn test_aggregate_left_closed_bins() {
        let t = table(
            vec![at(0, 21, 14), at(0, 24, 59), at(0, 25, 0), at(0, 41, 0)],
            &[1.0, 3.0, 10.0, 7.0],
        );
        let plan = AggregationPlan::new().with("sv", Reduction::Mean);

        let agg = aggregate_by_time(&t, Interval::minutes(5), &plan).unwrap();
        let keys: Vec<NaiveDateTime> = agg.keys().copied().collect();
        // the empty 00:30 and 00:35 bins are not emitted
        assert_eq!(keys, vec![at(0, 20, 0), at(0, 25, 0), at(0, 40, 0)]);
        assert_eq!(agg.column_values("sv").unwrap(), vec![Some(2.0), Some(10.0), Some(7.0)]);
        assert_eq!(agg.bins[0].row_count, 2);
    }

    #[test]
    fn test_aggregate_count_invariant() {
        let times: Vec<NaiveDateTime> = (0..50).map(|i| at(1, 0, 0) + Duration::seconds(i * 97)).collect();
        let values: Vec<f64> = (0..50).map(|i| i as f64).collect();
        let t = table(times, &values);
        let plan = AggregationPlan::new().with("sv", Reduction::Count);

        for interval in [Interval::minutes(1), Interval::minutes(15), Interval::hours(1), Interval::days(1)] {
            let agg = aggregate_by_time(&t, interval, &plan).unwrap();
            assert_eq!(agg.total_rows(), 50);
        }
    }

    #[test]
    fn test_aggregate_unknown_column() {
        let t = table(vec![at(0, 0, 0)], &[1.0]);
        let plan = AggregationPlan::new().with("depth", Reduction::Mean);
        let err = aggregate_by_time(&t, Interval::hours(1), &plan).unwrap_err();
        assert!(matches!(err, AggregationError::Schema(TableError::MissingColumn { .. })));
    }

    #[test]
    fn test_to_table_has_row_count() {
        let t = table(vec![at(0, 0, 0), at(0, 30, 0), at(2, 0, 0)], &[1.0, 2.0, 3.0]);
        let plan = AggregationPlan::new().with("sv", Reduction::Max);
        let out = aggregate_by_time(&t, Interval::hours(1), &plan).unwrap().to_table();
        assert_eq!(out.timestamps, vec![at(0, 0, 0), at(2, 0, 0)]);
        assert_eq!(out.column("sv").unwrap().values, vec![Some(2.0), Some(3.0)]);
        assert_eq!(out.column("row_count").unwrap().values, vec![Some(2.0), Some(1.0)]);
    }

    #[test]
    fn test_rolling_window_parse() {
        assert_eq!("3".parse::<RollingWindow>().unwrap(), RollingWindow::Rows(3));
        assert_eq!(
            "10min".parse::<RollingWindow>().unwrap(),
            RollingWindow::Duration(Duration::minutes(10))
        );
        assert!("0".parse::<RollingWindow>().is_err());
        assert!("0s".parse::<RollingWindow>().is_err());
        assert!("ten".parse::<RollingWindow>().is_err());
    }

    #[test]
    fn test_rolling_rows_needs_full_window() {
        let times: Vec<NaiveDateTime> = (0..5).map(|i| at(0, 0, i)).collect();
        let values = [Some(1.0), Some(2.0), None, Some(4.0), Some(5.0)];
        let out = rolling(&times, &values, RollingWindow::Rows(2), Reduction::Mean, false);
        assert_eq!(out, vec![None, Some(1.5), None, None, Some(4.5)]);
    }

    #[test]
    fn test_rolling_rows_centered() {
        let times: Vec<NaiveDateTime> = (0..4).map(|i| at(0, 0, i)).collect();
        let values = [Some(1.0), Some(2.0), Some(3.0), Some(4.0)];
        let out = rolling(&times, &values, RollingWindow::Rows(3), Reduction::Sum, true);
        assert_eq!(out, vec![None, Some(6.0), Some(9.0), None]);
    }

    #[test]
    fn test_rolling_duration_includes_shared_instant() {
        let times = vec![at(0, 0, 0), at(0, 0, 10), at(0, 0, 10), at(0, 0, 30)];
        let values = [Some(1.0), Some(2.0), Some(4.0), Some(8.0)];
        let out = rolling(
            &times,
            &values,
            RollingWindow::Duration(Duration::seconds(15)),
            Reduction::Sum,
            false,
        );
        // both rows at 00:00:10 see each other
        assert_eq!(out, vec![Some(1.0), Some(7.0), Some(7.0), Some(8.0)]);
    }

    #[test]
    fn test_rolling_duration_centered() {
        let times: Vec<NaiveDateTime> = (0..5).map(|i| at(0, i, 0)).collect();
        let values: Vec<Option<f64>> = (0..5).map(|i| Some(i as f64)).collect();
        let out = rolling(
            &times,
            &values,
            RollingWindow::Duration(Duration::minutes(2)),
            Reduction::Count,
            true,
        );
        // (t - 1min, t + 1min]
        assert_eq!(out, vec![Some(2.0), Some(2.0), Some(2.0), Some(2.0), Some(1.0)]);
    }

    #[test]
    fn test_rolling_extreme_windows() {
        let times: Vec<NaiveDateTime> = (0..3).map(|i| at(0, 0, i)).collect();
        let values = [Some(1.0), Some(2.0), Some(3.0)];

        let out = rolling(&times, &values, RollingWindow::Rows(0), Reduction::Sum, true);
        assert_eq!(out, vec![None, None, None]);

        let wide: RollingWindow = "100000000d".parse().unwrap();
        let out = rolling(&times, &values, wide, Reduction::Sum, false);
        assert_eq!(out, vec![Some(1.0), Some(3.0), Some(6.0)]);
        let out = rolling(&times, &values, wide, Reduction::Sum, true);
        assert_eq!(out, vec![Some(6.0), Some(6.0), Some(6.0)]);
    }

    #[test]
    fn test_rolling_unsorted_input_stays_aligned() {
        let times = vec![at(0, 0, 2), at(0, 0, 0), at(0, 0, 1)];
        let values = [Some(30.0), Some(10.0), Some(20.0)];
        let out = rolling(&times, &values, RollingWindow::Rows(2), Reduction::Mean, false);
        assert_eq!(out, vec![Some(25.0), None, Some(15.0)]);
    }

    #[test]
    fn test_find_gaps() {
        let times = vec![at(0, 1, 0), at(0, 7, 0), at(0, 26, 0)];
        let gaps = find_gaps(&times, Interval::minutes(5));
        assert_eq!(gaps, vec![at(0, 10, 0), at(0, 15, 0), at(0, 20, 0)]);
        assert!(find_gaps(&[], Interval::minutes(5)).is_empty());
    }
}
