//! Descriptive statistics and outlier detection.
//!
//! All statistics work on the present values of a column; the number of
//! missing entries is reported alongside but never enters a computation.
//! Degenerate spreads (zero variance, zero MAD) suppress outlier flags
//! instead of producing infinities.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use log::{debug, warn};
use rayon::prelude::*;
use thiserror::Error;

use crate::core::table::{Table, TableError};
use crate::core::time::Interval;
use crate::processors::reduction::sample_std;

/// Errors from statistics requests.
#[derive(Error, Debug)]
pub enum StatsError {
    #[error(transparent)]
    Schema(#[from] TableError),

    #[error("unknown outlier method '{0}' (expected iqr, zscore or modified_zscore)")]
    UnknownMethod(String),

    #[error("invalid outlier threshold '{0}'")]
    InvalidThreshold(String),
}

pub type Result<T> = std::result::Result<T, StatsError>;

/// Summary of one column (or one column within one time bin).
#[derive(Debug, Clone, PartialEq)]
pub struct StatsSummary {
    pub count: usize,
    pub mean: f64,
    /// Sample standard deviation; undefined below two values
    pub std: Option<f64>,
    pub min: f64,
    pub p05: f64,
    pub p25: f64,
    pub median: f64,
    pub p75: f64,
    pub p95: f64,
    pub max: f64,
    pub missing: usize,
}

impl StatsSummary {
    /// Summarise a column. Returns `None` when no value is present.
    pub fn from_values(values: &[Option<f64>]) -> Option<Self> {
        // non-finite readings count as missing
        let mut present: Vec<f64> = values.iter().filter_map(|v| *v).filter(|v| v.is_finite()).collect();
        let missing = values.len() - present.len();
        if present.is_empty() {
            return None;
        }
        present.sort_by(f64::total_cmp);

        let count = present.len();
        let q = |p| percentile(&present, p).unwrap_or(f64::NAN);

        Some(Self {
            count,
            mean: present.iter().sum::<f64>() / count as f64,
            std: sample_std(&present),
            min: present[0],
            p05: q(0.05),
            p25: q(0.25),
            median: q(0.5),
            p75: q(0.75),
            p95: q(0.95),
            max: present[count - 1],
            missing,
        })
    }

    /// One-line `key=value` rendering used by the text reports.
    pub fn to_line(&self) -> String {
        let std = self.std.map_or_else(|| "nan".to_string(), |s| format!("{s:.3}"));
        format!(
            "count={} mean={:.3} std={} min={:.3} p05={:.3} p25={:.3} median={:.3} p75={:.3} p95={:.3} max={:.3} missing={}",
            self.count, self.mean, std, self.min, self.p05, self.p25, self.median, self.p75, self.p95, self.max, self.missing
        )
    }
}

/// Linear-interpolated percentile of ascending `sorted` data, `q` in [0, 1].
pub fn percentile(sorted: &[f64], q: f64) -> Option<f64> {
    let n = sorted.len();
    if n == 0 {
        return None;
    }
    let pos = q.clamp(0.0, 1.0) * (n - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// Summary of a named column.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnStats {
    pub variable: String,
    pub summary: StatsSummary,
}

/// Summary of a named column within one time bin.
#[derive(Debug, Clone, PartialEq)]
pub struct BinnedStats {
    pub bin: NaiveDateTime,
    pub variable: String,
    pub summary: StatsSummary,
}

/// Descriptive statistics for `columns` (every column when empty).
///
/// Unknown columns are a schema error; columns without any value are left
/// out of the result.
pub fn describe(table: &Table, columns: &[String]) -> Result<Vec<ColumnStats>> {
    let selected = if columns.is_empty() {
        table.columns.iter().collect::<Vec<_>>()
    } else {
        columns
            .iter()
            .map(|name| table.require(name))
            .collect::<std::result::Result<Vec<_>, _>>()?
    };

    let stats: Vec<ColumnStats> = selected
        .par_iter()
        .filter_map(|column| {
            StatsSummary::from_values(&column.values).map(|summary| ColumnStats {
                variable: column.name.clone(),
                summary,
            })
        })
        .collect();

    if stats.len() < selected.len() {
        debug!("Omitted {} columns without values", selected.len() - stats.len());
    }
    Ok(stats)
}

/// Statistics per column within each time bin. Bins where a column has no
/// value are omitted for that column; unknown columns are skipped.
pub fn stats_by_time(table: &Table, interval: Interval, columns: &[String]) -> Vec<BinnedStats> {
    let Some(origin) = Interval::origin(&table.timestamps) else {
        return Vec::new();
    };

    let mut bins: BTreeMap<NaiveDateTime, Vec<usize>> = BTreeMap::new();
    for (row, &t) in table.timestamps.iter().enumerate() {
        bins.entry(interval.floor(origin, t)).or_default().push(row);
    }

    let mut out = Vec::new();
    for name in columns {
        let Some(column) = table.column(name) else {
            warn!("Column '{}' not found; skipped", name);
            continue;
        };
        for (&bin, rows) in &bins {
            let group: Vec<Option<f64>> = rows.iter().map(|&r| column.values[r]).collect();
            if let Some(summary) = StatsSummary::from_values(&group) {
                out.push(BinnedStats {
                    bin,
                    variable: name.clone(),
                    summary,
                });
            }
        }
    }
    out
}

/// Outlier rule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OutlierMethod {
    /// Outside `[Q1 - 1.5 IQR, Q3 + 1.5 IQR]`
    Iqr,
    /// `|x - mean| / std > threshold`, population std
    ZScore { threshold: f64 },
    /// `|0.6745 (x - median) / MAD| > threshold`
    ModifiedZScore { threshold: f64 },
}

const DEFAULT_Z_THRESHOLD: f64 = 3.0;

impl FromStr for OutlierMethod {
    type Err = StatsError;

    /// Accepts `iqr`, `zscore`, `modified_zscore` (also `mzscore`), with an
    /// optional `:threshold` suffix for the z-score rules.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        let (name, threshold) = match lower.split_once(':') {
            Some((name, t)) => {
                let t: f64 = t
                    .trim()
                    .parse()
                    .map_err(|_| StatsError::InvalidThreshold(t.to_string()))?;
                if !(t.is_finite() && t > 0.0) {
                    return Err(StatsError::InvalidThreshold(t.to_string()));
                }
                (name.trim().to_string(), t)
            }
            None => (lower.clone(), DEFAULT_Z_THRESHOLD),
        };

        match name.as_str() {
            "iqr" => Ok(OutlierMethod::Iqr),
            "zscore" | "z-score" | "z" => Ok(OutlierMethod::ZScore { threshold }),
            "modified_zscore" | "modified-zscore" | "mzscore" => {
                Ok(OutlierMethod::ModifiedZScore { threshold })
            }
            _ => Err(StatsError::UnknownMethod(s.to_string())),
        }
    }
}

impl fmt::Display for OutlierMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutlierMethod::Iqr => write!(f, "iqr"),
            OutlierMethod::ZScore { threshold } => write!(f, "zscore:{threshold}"),
            OutlierMethod::ModifiedZScore { threshold } => write!(f, "modified_zscore:{threshold}"),
        }
    }
}

fn median_of(sorted: &[f64]) -> Option<f64> {
    percentile(sorted, 0.5)
}

/// Flag outliers. Missing values are never flagged.
pub fn detect_outliers(values: &[Option<f64>], method: OutlierMethod) -> Vec<bool> {
    let mut present: Vec<f64> = values.iter().filter_map(|v| *v).collect();
    present.sort_by(f64::total_cmp);
    let mut flags = vec![false; values.len()];
    if present.is_empty() {
        return flags;
    }

    let rule: Box<dyn Fn(f64) -> bool> = match method {
        OutlierMethod::Iqr => {
            let q1 = percentile(&present, 0.25).unwrap_or(f64::NAN);
            let q3 = percentile(&present, 0.75).unwrap_or(f64::NAN);
            let iqr = q3 - q1;
            let (lower, upper) = (q1 - 1.5 * iqr, q3 + 1.5 * iqr);
            Box::new(move |x| x < lower || x > upper)
        }
        OutlierMethod::ZScore { threshold } => {
            let n = present.len() as f64;
            let mean = present.iter().sum::<f64>() / n;
            let std = (present.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();
            if !(std > 0.0) {
                return flags;
            }
            Box::new(move |x| ((x - mean) / std).abs() > threshold)
        }
        OutlierMethod::ModifiedZScore { threshold } => {
            let Some(median) = median_of(&present) else {
                return flags;
            };
            let mut deviations: Vec<f64> = present.iter().map(|v| (v - median).abs()).collect();
            deviations.sort_by(f64::total_cmp);
            let mad = median_of(&deviations).unwrap_or(0.0);
            if !(mad > 0.0) {
                return flags;
            }
            Box::new(move |x| (0.6745 * (x - median) / mad).abs() > threshold)
        }
    };

    for (flag, value) in flags.iter_mut().zip(values) {
        if let Some(v) = value {
            *flag = rule(*v);
        }
    }
    flags
}

/// Copy of `table` without the rows flagged as outliers in `column`.
pub fn remove_outliers(table: &Table, column: &str, method: OutlierMethod) -> Result<Table> {
    let values = &table.require(column)?.values;
    let flags = detect_outliers(values, method);
    let removed = flags.iter().filter(|&&f| f).count();
    debug!("Removing {} {} outliers from '{}'", removed, method, column);
    let keep: Vec<bool> = flags.iter().map(|f| !f).collect();
    Ok(table.filter_rows(&keep))
}
