//! Data loaders for acoustic logs and GPS position files.
//!
//! This module provides parsers for:
//! - Acoustic sensor logs (CSV, or TSV for `.tsv`/`.txt` files)
//! - Position tracks with timestamp, latitude and longitude columns
//!
//! Header names are lower-cased and trimmed before anything else looks at
//! them, so the merger only ever sees normalised column names.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};

use csv::ReaderBuilder;
use log::{debug, info, warn};
use regex::Regex;
use thiserror::Error;

use super::table::{Column, Table, TableError};
use super::time::{parse_timestamp, TimeError};
use crate::config::{CoordinateColumns, DataConfig};

/// Timestamp header candidates, in order of preference.
const TIMESTAMP_CANDIDATES: &[&str] = &["time", "timestamp", "datetime", "date"];

/// Errors that can occur during file loading.
#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("No input files provided")]
    NoFiles,

    #[error("Empty file: {0}")]
    EmptyFile(PathBuf),

    #[error("{path}: {source}")]
    Schema {
        path: PathBuf,
        #[source]
        source: TableError,
    },

    #[error("{path}, row {row}: {source}")]
    Timestamp {
        path: PathBuf,
        row: usize,
        #[source]
        source: TimeError,
    },

    #[error("Invalid file pattern '{0}'")]
    InvalidPattern(String),
}

/// Result type for loader operations.
pub type Result<T> = std::result::Result<T, LoaderError>;

/// Translate a shell-style pattern (`*`, `?`) into an anchored regex.
fn glob_to_regex(pattern: &str) -> Result<Regex> {
    let mut expr = String::with_capacity(pattern.len() * 2 + 2);
    expr.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            other => expr.push_str(&regex::escape(&other.to_string())),
        }
    }
    expr.push('$');
    Regex::new(&expr).map_err(|_| LoaderError::InvalidPattern(pattern.to_string()))
}

/// List files in `root_dir` whose names match `pattern`, sorted by path.
///
/// A missing directory yields an empty list; callers report that as a
/// user-facing failure.
pub fn get_file_list(root_dir: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let matcher = glob_to_regex(pattern)?;

    let mut files: Vec<PathBuf> = fs::read_dir(root_dir)
        .into_iter()
        .flatten()
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .file_name()
                    .map(|name| matcher.is_match(&name.to_string_lossy()))
                    .unwrap_or(false)
        })
        .collect();

    files.sort();

    if files.is_empty() {
        warn!(
            "No files found at {} with pattern {}",
            root_dir.display(),
            pattern
        );
    }

    Ok(files)
}

/// Field delimiter chosen from the file extension.
fn delimiter_for(path: &Path) -> u8 {
    match path
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .as_deref()
    {
        Some("tsv") | Some("txt") => b'\t',
        _ => b',',
    }
}

/// Normalise raw headers: lower-case, trim, then apply the rename map.
fn normalise_headers(raw: &csv::StringRecord, column_map: &HashMap<String, String>) -> Vec<String> {
    raw.iter()
        .map(|h| {
            let lower = h.trim().to_lowercase();
            column_map.get(&lower).cloned().unwrap_or(lower)
        })
        .collect()
}

fn resolve_timestamp_index(headers: &[String], preferred: &str) -> Option<usize> {
    let preferred = preferred.trim().to_lowercase();
    headers
        .iter()
        .position(|h| *h == preferred)
        .or_else(|| {
            TIMESTAMP_CANDIDATES
                .iter()
                .find_map(|cand| headers.iter().position(|h| h == cand))
        })
}

/// Parse a numeric cell. Empty and non-numeric cells are missing.
#[inline]
fn parse_number(cell: &str) -> Option<f64> {
    let s = cell.trim();
    if s.is_empty() {
        return None;
    }
    s.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Load one delimited file into a [`Table`].
///
/// The timestamp column is resolved case-insensitively (configured name
/// first, then `time`, `timestamp`, `datetime`, `date`). Numeric columns are
/// kept with unparseable cells as missing; columns that contain text but no
/// numbers at all are dropped.
pub fn load_table(path: &Path, config: &DataConfig) -> Result<Table> {
    let file = File::open(path)?;
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .delimiter(delimiter_for(path))
        .from_reader(BufReader::new(file));

    let headers = normalise_headers(reader.headers()?, &config.column_map);
    let ts_idx = resolve_timestamp_index(&headers, &config.timestamp_column).ok_or_else(|| {
        LoaderError::Schema {
            path: path.to_path_buf(),
            source: TableError::MissingColumn {
                column: config.timestamp_column.clone(),
                available: headers.clone(),
            },
        }
    })?;

    let mut timestamps = Vec::with_capacity(4096);
    let mut values: Vec<Vec<Option<f64>>> = vec![Vec::with_capacity(4096); headers.len()];
    let mut has_number = vec![false; headers.len()];
    let mut has_text = vec![false; headers.len()];

    for (row, result) in reader.records().enumerate() {
        let record = result?;

        let raw_ts = record.get(ts_idx).unwrap_or("");
        let t = parse_timestamp(raw_ts).map_err(|source| LoaderError::Timestamp {
            path: path.to_path_buf(),
            row: row + 1,
            source,
        })?;
        timestamps.push(t);

        for (col, column_values) in values.iter_mut().enumerate() {
            if col == ts_idx {
                continue;
            }
            let cell = record.get(col).unwrap_or("");
            let parsed = parse_number(cell);
            if parsed.is_some() {
                has_number[col] = true;
            } else if !cell.trim().is_empty() {
                has_text[col] = true;
            }
            column_values.push(parsed);
        }
    }

    if timestamps.is_empty() {
        return Err(LoaderError::EmptyFile(path.to_path_buf()));
    }

    let mut table = Table::new(timestamps);
    for (col, (name, column_values)) in headers.iter().zip(values).enumerate() {
        if col == ts_idx {
            continue;
        }
        if has_text[col] && !has_number[col] {
            debug!("Dropping non-numeric column '{}' from {}", name, path.display());
            continue;
        }
        table
            .push_column(Column::new(name.clone(), column_values))
            .map_err(|source| LoaderError::Schema {
                path: path.to_path_buf(),
                source,
            })?;
    }

    Ok(table)
}

/// Load and concatenate acoustic log files.
pub fn load_acoustic_files(paths: &[PathBuf], config: &DataConfig) -> Result<Table> {
    if paths.is_empty() {
        return Err(LoaderError::NoFiles);
    }

    info!("Loading {} acoustic files", paths.len());

    let mut parts = Vec::with_capacity(paths.len());
    for path in paths {
        let table = load_table(path, config)?;
        debug!("{}: {} rows", path.display(), table.len());
        parts.push(table);
    }

    Ok(Table::concat(parts))
}

/// Load a position track.
///
/// Accepts `lat`/`latitude` for latitude and `long`/`lon`/`lng`/`longitude`
/// for longitude; the returned table names them after `columns.input_lat`
/// and `columns.input_lon`. Entries already in `config.column_map` win over
/// these aliases.
pub fn load_positions(
    path: &Path,
    config: &DataConfig,
    columns: &CoordinateColumns,
) -> Result<Table> {
    let lat = columns.input_lat.as_str();
    let lon = columns.input_lon.as_str();

    let mut position_config = config.clone();
    for (alias, target) in [
        ("lat", lat),
        ("latitude", lat),
        ("long", lon),
        ("lon", lon),
        ("lng", lon),
        ("longitude", lon),
    ] {
        if alias == target {
            continue;
        }
        position_config
            .column_map
            .entry(alias.to_string())
            .or_insert_with(|| target.to_string());
    }

    let table = load_table(path, &position_config)?;
    for required in [lat, lon] {
        table.require(required).map_err(|source| LoaderError::Schema {
            path: path.to_path_buf(),
            source,
        })?;
    }

    let issues = validate_coordinates(&table, lat, lon);
    for issue in &issues {
        warn!("{}: {}", path.display(), issue);
    }

    info!("Loaded {} position fixes from {}", table.len(), path.display());
    Ok(table)
}

/// Check coordinate columns for missing or out-of-range values.
///
/// Returns a list of human-readable issues; an empty list means the
/// coordinates are valid.
pub fn validate_coordinates(table: &Table, lat_col: &str, lon_col: &str) -> Vec<String> {
    let mut issues = Vec::new();
    let (lat, lon) = match (table.column(lat_col), table.column(lon_col)) {
        (Some(lat), Some(lon)) => (lat, lon),
        (lat, lon) => {
            if lat.is_none() {
                issues.push(format!("Missing coordinate column: {}", lat_col));
            }
            if lon.is_none() {
                issues.push(format!("Missing coordinate column: {}", lon_col));
            }
            return issues;
        }
    };

    let missing = lat
        .values
        .iter()
        .zip(&lon.values)
        .filter(|(a, b)| a.is_none() || b.is_none())
        .count();
    if missing > 0 {
        issues.push(format!("{} rows with missing coordinates", missing));
    }

    let out_of_range = lat
        .values
        .iter()
        .zip(&lon.values)
        .filter(|(a, b)| match (a, b) {
            (Some(a), Some(b)) => !(-90.0..=90.0).contains(a) || !(-180.0..=180.0).contains(b),
            _ => false,
        })
        .count();
    if out_of_range > 0 {
        issues.push(format!("{} rows with out-of-range lat/lon values", out_of_range));
    }

    issues
}
