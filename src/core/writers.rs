//! Data writers for tables, statistics reports and hex aggregates.
//!
//! - CSV tables with a leading `timestamp` column
//! - "Descriptive Statistics" text reports
//! - Time-binned statistics as long-format CSV plus a grouped text report
//! - Hex aggregates with a closed WKT polygon per cell

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use thiserror::Error;

use super::table::Table;
use crate::processors::spatial::{boundary_wkt, HexAggregation};
use crate::processors::statistics::{BinnedStats, ColumnStats, StatsSummary};

/// Timestamp layout used in every written file.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Errors that can occur during write operations.
#[derive(Error, Debug)]
pub enum WriteError {
    /// Failed to create parent directories.
    #[error("failed to create parent directories for '{path}': {source}")]
    CreateDirectory {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to create or open file for writing.
    #[error("failed to create file '{path}': {source}")]
    CreateFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to write data to file.
    #[error("failed to write to file '{path}': {source}")]
    WriteFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// CSV writing error.
    #[error("CSV write error for '{path}': {source}")]
    CsvError {
        path: String,
        #[source]
        source: csv::Error,
    },
}

/// Result type for write operations.
pub type Result<T> = std::result::Result<T, WriteError>;

/// Creates parent directories for a file path if they don't exist.
pub(crate) fn ensure_parent_dirs(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| WriteError::CreateDirectory {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
    }
    Ok(())
}

/// Creates a buffered writer for the given path.
fn create_buffered_writer(path: &Path) -> Result<BufWriter<File>> {
    ensure_parent_dirs(path)?;
    let file = File::create(path).map_err(|e| WriteError::CreateFile {
        path: path.display().to_string(),
        source: e,
    })?;
    Ok(BufWriter::new(file))
}

fn create_csv_writer(path: &Path) -> Result<csv::Writer<BufWriter<File>>> {
    Ok(csv::Writer::from_writer(create_buffered_writer(path)?))
}

fn csv_error(path: &Path) -> impl Fn(csv::Error) -> WriteError + '_ {
    move |source| WriteError::CsvError {
        path: path.display().to_string(),
        source,
    }
}

fn io_error(path: &Path) -> impl Fn(std::io::Error) -> WriteError + '_ {
    move |source| WriteError::WriteFile {
        path: path.display().to_string(),
        source,
    }
}

fn format_timestamp(t: NaiveDateTime) -> String {
    t.format(TIMESTAMP_FORMAT).to_string()
}

fn format_value(v: Option<f64>) -> String {
    v.map(|v| v.to_string()).unwrap_or_default()
}

fn std_cell(summary: &StatsSummary) -> String {
    summary.std.map(|s| s.to_string()).unwrap_or_default()
}

fn summary_cells(summary: &StatsSummary) -> Vec<String> {
    vec![
        summary.count.to_string(),
        summary.mean.to_string(),
        std_cell(summary),
        summary.min.to_string(),
        summary.p05.to_string(),
        summary.p25.to_string(),
        summary.median.to_string(),
        summary.p75.to_string(),
        summary.p95.to_string(),
        summary.max.to_string(),
        summary.missing.to_string(),
    ]
}

const SUMMARY_HEADER: [&str; 11] = [
    "count", "mean", "std", "min", "p05", "p25", "median", "p75", "p95", "max", "missing",
];

/// Write a table as CSV: `timestamp` followed by every column, missing
/// values as empty cells.
pub fn write_table_csv(path: &Path, table: &Table) -> Result<()> {
    let mut writer = create_csv_writer(path)?;

    let header: Vec<String> = std::iter::once("timestamp".to_string())
        .chain(table.column_names())
        .collect();
    writer.write_record(&header).map_err(csv_error(path))?;

    for (row, &t) in table.timestamps.iter().enumerate() {
        let record: Vec<String> = std::iter::once(format_timestamp(t))
            .chain(table.columns.iter().map(|c| format_value(c.values[row])))
            .collect();
        writer.write_record(&record).map_err(csv_error(path))?;
    }

    writer.flush().map_err(io_error(path))
}

/// Write the "Descriptive Statistics" text report.
pub fn write_stats_report(path: &Path, stats: &[ColumnStats]) -> Result<()> {
    let mut writer = create_buffered_writer(path)?;
    let mut lines = vec![
        "Descriptive Statistics".to_string(),
        "======================".to_string(),
        String::new(),
    ];
    for entry in stats {
        lines.push(format!("Variable: {}", entry.variable));
        lines.push(entry.summary.to_line());
        lines.push(String::new());
    }
    writer
        .write_all(lines.join("\n").as_bytes())
        .and_then(|_| writer.flush())
        .map_err(io_error(path))
}

/// Write time-binned statistics next to `path` as `.csv` (long format)
/// and `.txt` (grouped by bin). Returns both paths.
pub fn write_binned_stats(path: &Path, stats: &[BinnedStats]) -> Result<(PathBuf, PathBuf)> {
    let csv_path = path.with_extension("csv");
    let txt_path = path.with_extension("txt");

    let mut writer = create_csv_writer(&csv_path)?;
    let header: Vec<&str> = ["timestamp", "variable"].into_iter().chain(SUMMARY_HEADER).collect();
    writer.write_record(&header).map_err(csv_error(&csv_path))?;
    for entry in stats {
        let record: Vec<String> = [format_timestamp(entry.bin), entry.variable.clone()]
            .into_iter()
            .chain(summary_cells(&entry.summary))
            .collect();
        writer.write_record(&record).map_err(csv_error(&csv_path))?;
    }
    writer.flush().map_err(io_error(&csv_path))?;

    let mut sorted: Vec<&BinnedStats> = stats.iter().collect();
    sorted.sort_by_key(|s| s.bin);

    let mut lines = vec![
        "Descriptive Statistics by Time".to_string(),
        "==============================".to_string(),
        String::new(),
    ];
    let mut current: Option<NaiveDateTime> = None;
    for entry in sorted {
        if current != Some(entry.bin) {
            if current.is_some() {
                lines.push(String::new());
            }
            lines.push(format!("Time: {}", format_timestamp(entry.bin)));
            lines.push("-".repeat(50));
            current = Some(entry.bin);
        }
        lines.push(format!("  Variable: {}", entry.variable));
        lines.push(format!("    {}", entry.summary.to_line()));
    }

    let mut text = create_buffered_writer(&txt_path)?;
    text.write_all(lines.join("\n").as_bytes())
        .and_then(|_| text.flush())
        .map_err(io_error(&txt_path))?;

    Ok((csv_path, txt_path))
}

/// Write a hex aggregate: `cell_id`, aggregated columns, `row_count` and
/// the closed cell polygon as WKT.
pub fn write_hex_csv(path: &Path, aggregation: &HexAggregation) -> Result<()> {
    let mut writer = create_csv_writer(path)?;

    let header: Vec<String> = std::iter::once("cell_id".to_string())
        .chain(aggregation.columns.iter().cloned())
        .chain(["row_count".to_string(), "geometry_wkt".to_string()])
        .collect();
    writer.write_record(&header).map_err(csv_error(path))?;

    for bin in &aggregation.bins {
        let record: Vec<String> = std::iter::once(bin.key.to_string())
            .chain(bin.values.iter().map(|v| format_value(*v)))
            .chain([bin.row_count.to_string(), boundary_wkt(bin.key)])
            .collect();
        writer.write_record(&record).map_err(csv_error(path))?;
    }

    writer.flush().map_err(io_error(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::table::Column;
    use crate::core::time::Interval;
    use crate::processors::reduction::{AggregationPlan, Reduction};
    use crate::processors::spatial::{aggregate_by_hex, CoordinateSource};
    use crate::processors::statistics::{describe, stats_by_time};
    use chrono::NaiveDate;
    use std::fs;
    use tempfile::tempdir;

    fn at(m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2023, 10, 23)
            .unwrap()
            .and_hms_opt(0, m, 0)
            .unwrap()
    }

    fn create_test_table() -> Table {
        Table::from_columns(
            vec![at(0), at(1), at(7)],
            vec![
                Column::new("sv", vec![Some(-60.5), None, Some(-58.0)]),
                Column::from_values("latitude", &[55.6, 55.6, 55.61]),
                Column::from_values("longitude", &[12.9, 12.9, 12.91]),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_write_table_csv() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("merged.csv");

        write_table_csv(&path, &create_test_table()).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "timestamp,sv,latitude,longitude");
        assert_eq!(lines[1], "2023-10-23 00:00:00,-60.5,55.6,12.9");
        assert_eq!(lines[2], "2023-10-23 00:01:00,,55.6,12.9");
        assert_eq!(lines.len(), 4);
    }

    #[test]
    fn test_write_stats_report() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stats.txt");
        let stats = describe(&create_test_table(), &["sv".to_string()]).unwrap();

        write_stats_report(&path, &stats).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("Descriptive Statistics"));
        assert!(content.contains("Variable: sv"));
        assert!(content.contains("count=2"));
        assert!(content.contains("missing=1"));
    }

    #[test]
    fn test_write_binned_stats() {
        let dir = tempdir().unwrap();
        let stats = stats_by_time(&create_test_table(), Interval::minutes(5), &["sv".to_string()]);

        let (csv_path, txt_path) = write_binned_stats(&dir.path().join("by_time"), &stats).unwrap();

        let csv = fs::read_to_string(csv_path).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert!(lines[0].starts_with("timestamp,variable,count,mean,std"));
        assert_eq!(lines.len(), 3);

        let text = fs::read_to_string(txt_path).unwrap();
        assert!(text.contains("Time: 2023-10-23 00:05:00"));
    }

    #[test]
    fn test_write_hex_csv() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("hex.csv");
        let plan = AggregationPlan::new().with("sv", Reduction::Mean);
        let agg = aggregate_by_hex(
            &create_test_table(),
            &CoordinateSource::geographic("latitude", "longitude"),
            7,
            &plan,
        )
        .unwrap();

        write_hex_csv(&path, &agg).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "cell_id,sv,row_count,geometry_wkt");
        assert_eq!(lines.len(), agg.len() + 1);
        assert!(lines[1].contains("POLYGON(("));
    }
}
