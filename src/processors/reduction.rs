//! Named per-column reductions and the grouped results they produce.
//!
//! Aggregation requests name their reduction with a string (`mean`, `sum`,
//! ...). Names are resolved into [`Reduction`] when the request is built, so
//! an unknown name fails before any data is touched.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::core::table::{Table, TableError};
use crate::core::time::TimeError;

/// Errors raised by the temporal and spatial aggregators.
#[derive(Error, Debug)]
pub enum AggregationError {
    #[error(transparent)]
    Schema(#[from] TableError),

    #[error(transparent)]
    Time(#[from] TimeError),

    #[error(transparent)]
    Reduction(#[from] UnknownReduction),

    #[error("invalid rolling window '{0}': expected a row count or a duration such as 10min")]
    InvalidWindow(String),

    #[error("invalid hex resolution {0} (expected 0-15)")]
    InvalidResolution(u8),

    #[error(transparent)]
    Transform(#[from] crate::core::transforms::TransformError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown reduction '{0}' (expected one of: mean, sum, count, first, last, min, max, median, std)")]
pub struct UnknownReduction(pub String);

/// Supported reductions over a group of optional values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reduction {
    Mean,
    Sum,
    Count,
    First,
    Last,
    Min,
    Max,
    Median,
    Std,
}

impl Reduction {
    /// Reduce a group. Missing values are skipped.
    ///
    /// `count` and `sum` are always defined (zero for an all-missing group);
    /// the others are `None` when nothing is present, and `std` needs at
    /// least two values.
    pub fn apply(self, values: &[Option<f64>]) -> Option<f64> {
        let mut present = values.iter().filter_map(|v| *v);
        match self {
            Reduction::Count => Some(present.count() as f64),
            Reduction::Sum => Some(present.sum()),
            Reduction::First => present.next(),
            Reduction::Last => present.last(),
            Reduction::Min => present.reduce(f64::min),
            Reduction::Max => present.reduce(f64::max),
            Reduction::Mean => {
                let (sum, n) = present.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
                (n > 0).then(|| sum / n as f64)
            }
            Reduction::Median => {
                let mut sorted: Vec<f64> = present.collect();
                if sorted.is_empty() {
                    return None;
                }
                sorted.sort_by(f64::total_cmp);
                let mid = sorted.len() / 2;
                if sorted.len() % 2 == 0 {
                    Some((sorted[mid - 1] + sorted[mid]) / 2.0)
                } else {
                    Some(sorted[mid])
                }
            }
            Reduction::Std => {
                let data: Vec<f64> = present.collect();
                sample_std(&data)
            }
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Reduction::Mean => "mean",
            Reduction::Sum => "sum",
            Reduction::Count => "count",
            Reduction::First => "first",
            Reduction::Last => "last",
            Reduction::Min => "min",
            Reduction::Max => "max",
            Reduction::Median => "median",
            Reduction::Std => "std",
        }
    }
}

/// Sample standard deviation (ddof = 1); undefined below two samples.
pub(crate) fn sample_std(data: &[f64]) -> Option<f64> {
    let n = data.len();
    if n < 2 {
        return None;
    }
    let mean = data.iter().sum::<f64>() / n as f64;
    let ss: f64 = data.iter().map(|v| (v - mean).powi(2)).sum();
    Some((ss / (n - 1) as f64).sqrt())
}

impl FromStr for Reduction {
    type Err = UnknownReduction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mean" | "avg" | "average" => Ok(Reduction::Mean),
            "sum" => Ok(Reduction::Sum),
            "count" | "size" => Ok(Reduction::Count),
            "first" => Ok(Reduction::First),
            "last" => Ok(Reduction::Last),
            "min" => Ok(Reduction::Min),
            "max" => Ok(Reduction::Max),
            "median" => Ok(Reduction::Median),
            "std" => Ok(Reduction::Std),
            _ => Err(UnknownReduction(s.to_string())),
        }
    }
}

impl fmt::Display for Reduction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An ordered list of `column -> reduction` pairs.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AggregationPlan {
    entries: Vec<(String, Reduction)>,
}

impl AggregationPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a plan from `(column, reduction name)` pairs, rejecting
    /// unknown reduction names.
    pub fn parse<I, C, R>(pairs: I) -> Result<Self, UnknownReduction>
    where
        I: IntoIterator<Item = (C, R)>,
        C: Into<String>,
        R: AsRef<str>,
    {
        let mut plan = Self::new();
        for (column, reduction) in pairs {
            plan = plan.with(column, reduction.as_ref().parse()?);
        }
        Ok(plan)
    }

    /// Add or replace the reduction for a column.
    pub fn with(mut self, column: impl Into<String>, reduction: Reduction) -> Self {
        let column = column.into();
        match self.entries.iter_mut().find(|(c, _)| *c == column) {
            Some(entry) => entry.1 = reduction,
            None => self.entries.push((column, reduction)),
        }
        self
    }

    pub fn entries(&self) -> &[(String, Reduction)] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One group of an aggregation: its key, one reduced value per planned
/// column and the number of rows that fell into it.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateBin<K> {
    pub key: K,
    pub values: Vec<Option<f64>>,
    pub row_count: usize,
}

/// Result of grouping a table by a key. Bins are ordered by key and only
/// non-empty groups are present.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregation<K> {
    pub columns: Vec<String>,
    pub bins: Vec<AggregateBin<K>>,
}

impl<K> Aggregation<K> {
    pub fn len(&self) -> usize {
        self.bins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    /// Sum of row counts over all bins.
    pub fn total_rows(&self) -> usize {
        self.bins.iter().map(|b| b.row_count).sum()
    }

    /// Reduced values of one column, in bin order.
    pub fn column_values(&self, name: &str) -> Option<Vec<Option<f64>>> {
        let idx = self.columns.iter().position(|c| c == name)?;
        Some(self.bins.iter().map(|b| b.values[idx]).collect())
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.bins.iter().map(|b| &b.key)
    }
}

/// Group the rows of `table` by `keys` and reduce each planned column.
///
/// Rows whose key is `None` take no part. Every planned column must exist.
pub(crate) fn aggregate_groups<K: Ord + Clone>(
    table: &Table,
    keys: &[Option<K>],
    plan: &AggregationPlan,
) -> Result<Aggregation<K>, TableError> {
    let columns = plan
        .entries()
        .iter()
        .map(|(name, reduction)| Ok((table.require(name)?, *reduction)))
        .collect::<Result<Vec<_>, TableError>>()?;

    let mut groups: BTreeMap<K, Vec<usize>> = BTreeMap::new();
    for (row, key) in keys.iter().enumerate() {
        if let Some(key) = key {
            groups.entry(key.clone()).or_default().push(row);
        }
    }

    let bins = groups
        .into_iter()
        .map(|(key, rows)| {
            let values = columns
                .iter()
                .map(|(column, reduction)| {
                    let group: Vec<Option<f64>> = rows.iter().map(|&r| column.values[r]).collect();
                    reduction.apply(&group)
                })
                .collect();
            AggregateBin {
                key,
                values,
                row_count: rows.len(),
            }
        })
        .collect();

    Ok(Aggregation {
        columns: plan.entries().iter().map(|(name, _)| name.clone()).collect(),
        bins,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::table::Column;

    #[test]
    fn test_reductions_skip_missing() {
        let values = [Some(1.0), None, Some(3.0), Some(2.0)];
        assert_eq!(Reduction::Mean.apply(&values), Some(2.0));
        assert_eq!(Reduction::Sum.apply(&values), Some(6.0));
        assert_eq!(Reduction::Count.apply(&values), Some(3.0));
        assert_eq!(Reduction::First.apply(&values), Some(1.0));
        assert_eq!(Reduction::Last.apply(&values), Some(2.0));
        assert_eq!(Reduction::Min.apply(&values), Some(1.0));
        assert_eq!(Reduction::Max.apply(&values), Some(3.0));
        assert_eq!(Reduction::Median.apply(&values), Some(2.0));
        assert_eq!(Reduction::Std.apply(&values), Some(1.0));
    }

    #[test]
    fn test_reductions_all_missing() {
        let values = [None, None];
        assert_eq!(Reduction::Mean.apply(&values), None);
        assert_eq!(Reduction::Sum.apply(&values), Some(0.0));
        assert_eq!(Reduction::Count.apply(&values), Some(0.0));
        assert_eq!(Reduction::Std.apply(&[Some(4.0)]), None);
    }

    #[test]
    fn test_unknown_reduction_rejected() {
        assert!("mean".parse::<Reduction>().is_ok());
        assert_eq!(
            "mode".parse::<Reduction>(),
            Err(UnknownReduction("mode".to_string()))
        );
        assert!(AggregationPlan::parse([("depth", "mean"), ("temp", "avg2")]).is_err());
    }

    #[test]
    fn test_plan_replaces_duplicate_column() {
        let plan = AggregationPlan::new()
            .with("depth", Reduction::Mean)
            .with("depth", Reduction::Max);
        assert_eq!(plan.entries(), &[("depth".to_string(), Reduction::Max)]);
    }

    #[test]
    fn test_aggregate_groups_skips_missing_keys() {
        let t = chrono::NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let table = Table::from_columns(
            vec![t; 4],
            vec![Column::from_values("v", &[1.0, 2.0, 3.0, 4.0])],
        )
        .unwrap();
        let plan = AggregationPlan::new().with("v", Reduction::Sum);
        let keys = [Some("b"), None, Some("a"), Some("b")];

        let agg = aggregate_groups(&table, &keys, &plan).unwrap();
        assert_eq!(agg.keys().copied().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(agg.column_values("v").unwrap(), vec![Some(3.0), Some(5.0)]);
        assert_eq!(agg.total_rows(), 3);

        let missing = AggregationPlan::new().with("w", Reduction::Sum);
        assert!(aggregate_groups(&table, &keys, &missing).is_err());
    }
}
