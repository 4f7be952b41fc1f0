//! On-disk cache of working tables.
//!
//! Each entry is a CSV table `<key>.csv` with a JSON sidecar
//! `<key>.meta.json` that records when it was saved; age-based eviction
//! reads only the sidecars.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::loaders::{load_table, LoaderError};
use super::table::Table;
use super::writers::{ensure_parent_dirs, write_table_csv, WriteError};
use crate::config::{CacheConfig, DataConfig};

const META_SUFFIX: &str = ".meta.json";

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("invalid cache key '{0}' (use letters, digits, '-', '_' or '.')")]
    InvalidKey(String),

    #[error("cache IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Write(#[from] WriteError),

    #[error(transparent)]
    Load(#[from] LoaderError),

    #[error("cache metadata error: {0}")]
    Metadata(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CacheError>;

/// Sidecar record written next to every cached table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheMetadata {
    pub saved_at: DateTime<Utc>,
    #[serde(default)]
    pub rows: usize,
    #[serde(default)]
    pub columns: Vec<String>,
}

/// Cache rooted at one directory, keyed by caller-chosen strings.
#[derive(Debug, Clone)]
pub struct CacheManager {
    dir: PathBuf,
}

impl CacheManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.dir.clone())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn validate_key(key: &str) -> Result<()> {
        let valid = !key.is_empty()
            && !key.starts_with('.')
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if valid {
            Ok(())
        } else {
            Err(CacheError::InvalidKey(key.to_string()))
        }
    }

    fn data_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.csv"))
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}{META_SUFFIX}"))
    }

    /// Write `table` under `key`, replacing any previous entry.
    pub fn save(&self, table: &Table, key: &str) -> Result<PathBuf> {
        Self::validate_key(key)?;
        let data_path = self.data_path(key);
        write_table_csv(&data_path, table)?;

        let meta = CacheMetadata {
            saved_at: Utc::now(),
            rows: table.len(),
            columns: table.column_names(),
        };
        let meta_path = self.meta_path(key);
        ensure_parent_dirs(&meta_path)?;
        fs::write(&meta_path, serde_json::to_string_pretty(&meta)?)?;

        info!("Cached {} rows as '{}'", table.len(), key);
        Ok(data_path)
    }

    /// Read the entry stored under `key`, if any.
    pub fn load(&self, key: &str) -> Result<Option<Table>> {
        Self::validate_key(key)?;
        let data_path = self.data_path(key);
        if !data_path.exists() {
            debug!("Cache miss for '{}'", key);
            return Ok(None);
        }
        let table = load_table(&data_path, &DataConfig::default())?;
        Ok(Some(table))
    }

    /// Metadata of the entry stored under `key`, if any.
    pub fn metadata(&self, key: &str) -> Result<Option<CacheMetadata>> {
        Self::validate_key(key)?;
        let meta_path = self.meta_path(key);
        if !meta_path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&meta_path)?;
        Ok(Some(serde_json::from_str(&text)?))
    }

    /// Keys of all entries with a metadata sidecar, sorted.
    pub fn keys(&self) -> Result<Vec<String>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut keys: Vec<String> = fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                name.strip_suffix(META_SUFFIX).map(str::to_string)
            })
            .collect();
        keys.sort();
        Ok(keys)
    }

    /// Remove entries. With `older_than`, only entries saved longer ago than
    /// that are removed; entries with unreadable metadata are kept.
    /// Returns the number of removed entries.
    pub fn clear(&self, older_than: Option<Duration>) -> Result<usize> {
        let now = Utc::now();
        let mut removed = 0;

        for key in self.keys()? {
            if let Some(max_age) = older_than {
                let saved_at = match self.metadata(&key) {
                    Ok(Some(meta)) => meta.saved_at,
                    Ok(None) => continue,
                    Err(e) => {
                        warn!("Keeping cache entry '{}': {}", key, e);
                        continue;
                    }
                };
                if now - saved_at <= max_age {
                    continue;
                }
            }

            for path in [self.data_path(&key), self.meta_path(&key)] {
                if path.exists() {
                    fs::remove_file(&path)?;
                }
            }
            removed += 1;
        }

        info!("Removed {} cache entries", removed);
        Ok(removed)
    }
}
