//! Configuration types for the survey console.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Where input data lives and how its columns are named.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// Directory holding acoustic CSV logs
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// File name pattern for acoustic logs (`*` and `?` wildcards)
    #[serde(default = "default_acoustic_pattern")]
    pub acoustic_pattern: String,

    /// Position track file (CSV or TSV)
    #[serde(default = "default_position_file")]
    pub position_file: PathBuf,

    /// Preferred timestamp header; common alternatives are also recognised
    #[serde(default = "default_timestamp_column")]
    pub timestamp_column: String,

    /// Header renames applied after lower-casing (e.g. `time -> timestamp`)
    #[serde(default)]
    pub column_map: HashMap<String, String>,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_acoustic_pattern() -> String {
    "*.csv".to_string()
}

fn default_position_file() -> PathBuf {
    PathBuf::from("./data/positions.txt")
}

fn default_timestamp_column() -> String {
    "timestamp".to_string()
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            acoustic_pattern: default_acoustic_pattern(),
            position_file: default_position_file(),
            timestamp_column: default_timestamp_column(),
            column_map: HashMap::new(),
        }
    }
}

/// Which coordinate pair downstream consumers treat as primary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PrimaryCoordinates {
    #[default]
    Geographic,
    Projected,
}

/// Column names used for coordinates before and after reprojection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinateColumns {
    #[serde(default = "default_lat_col")]
    pub input_lat: String,

    #[serde(default = "default_lon_col")]
    pub input_lon: String,

    #[serde(default = "default_easting_col")]
    pub output_easting: String,

    #[serde(default = "default_northing_col")]
    pub output_northing: String,

    /// Keep a suffixed copy of the geographic pair next to the projected one
    #[serde(default = "default_true")]
    pub keep_original: bool,

    #[serde(default = "default_wgs84_suffix")]
    pub original_lat_suffix: String,

    #[serde(default = "default_wgs84_suffix")]
    pub original_lon_suffix: String,
}

fn default_lat_col() -> String {
    "latitude".to_string()
}

fn default_lon_col() -> String {
    "longitude".to_string()
}

fn default_easting_col() -> String {
    "easting".to_string()
}

fn default_northing_col() -> String {
    "northing".to_string()
}

fn default_wgs84_suffix() -> String {
    "_wgs84".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for CoordinateColumns {
    fn default() -> Self {
        Self {
            input_lat: default_lat_col(),
            input_lon: default_lon_col(),
            output_easting: default_easting_col(),
            output_northing: default_northing_col(),
            keep_original: true,
            original_lat_suffix: default_wgs84_suffix(),
            original_lon_suffix: default_wgs84_suffix(),
        }
    }
}

/// Coordinate reference systems.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinateConfig {
    #[serde(default = "default_input_crs")]
    pub input_crs: String,

    /// Projected CRS (SWEREF99 TM by default)
    #[serde(default = "default_output_crs")]
    pub output_crs: String,

    /// Add projected columns after every merge
    #[serde(default = "default_true")]
    pub transform_on_load: bool,

    #[serde(default)]
    pub primary: PrimaryCoordinates,

    #[serde(default)]
    pub columns: CoordinateColumns,
}

fn default_input_crs() -> String {
    "EPSG:4326".to_string()
}

fn default_output_crs() -> String {
    "EPSG:3006".to_string()
}

impl Default for CoordinateConfig {
    fn default() -> Self {
        Self {
            input_crs: default_input_crs(),
            output_crs: default_output_crs(),
            transform_on_load: true,
            primary: PrimaryCoordinates::Geographic,
            columns: CoordinateColumns::default(),
        }
    }
}

/// How acoustic records are matched to position fixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MergeMethod {
    #[default]
    Tolerance,
    Interpolated,
}

/// Merge and aggregation defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Maximum time difference accepted by the tolerance join
    #[serde(default = "default_tolerance")]
    pub time_merge_tolerance: String,

    #[serde(default)]
    pub merge_method: MergeMethod,

    /// `nearest`, `forward` or `backward`
    #[serde(default = "default_direction")]
    pub merge_direction: String,

    /// Cap for the nearest-fix fallback of the interpolated merge; unbounded when absent
    #[serde(default)]
    pub max_fallback_gap: Option<String>,

    #[serde(default = "default_resolution")]
    pub default_resolution: u8,

    #[serde(default = "default_interval")]
    pub default_interval: String,
}

fn default_tolerance() -> String {
    "5s".to_string()
}

fn default_direction() -> String {
    "nearest".to_string()
}

fn default_resolution() -> u8 {
    8
}

fn default_interval() -> String {
    "5min".to_string()
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            time_merge_tolerance: default_tolerance(),
            merge_method: MergeMethod::Tolerance,
            merge_direction: default_direction(),
            max_fallback_gap: None,
            default_resolution: default_resolution(),
            default_interval: default_interval(),
        }
    }
}

/// Smoothing overlay defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmoothingConfig {
    #[serde(default = "default_lowess_frac")]
    pub lowess_frac: f64,

    #[serde(default = "default_savgol_window")]
    pub savgol_window: usize,

    #[serde(default = "default_savgol_polyorder")]
    pub savgol_polyorder: usize,

    #[serde(default = "default_rolling_window")]
    pub rolling_window: String,
}

fn default_lowess_frac() -> f64 {
    0.1
}

fn default_savgol_window() -> usize {
    11
}

fn default_savgol_polyorder() -> usize {
    2
}

fn default_rolling_window() -> String {
    "10min".to_string()
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            lowess_frac: default_lowess_frac(),
            savgol_window: default_savgol_window(),
            savgol_polyorder: default_savgol_polyorder(),
            rolling_window: default_rolling_window(),
        }
    }
}

/// Output directories for rendered artifacts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_plots_dir")]
    pub plots_dir: PathBuf,

    #[serde(default = "default_maps_dir")]
    pub maps_dir: PathBuf,

    #[serde(default = "default_reports_dir")]
    pub reports_dir: PathBuf,
}

fn default_plots_dir() -> PathBuf {
    PathBuf::from("outputs/plots")
}

fn default_maps_dir() -> PathBuf {
    PathBuf::from("outputs/maps")
}

fn default_reports_dir() -> PathBuf {
    PathBuf::from("outputs/reports")
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            plots_dir: default_plots_dir(),
            maps_dir: default_maps_dir(),
            reports_dir: default_reports_dir(),
        }
    }
}

/// On-disk cache of merged tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,

    /// Entries older than this are evicted by `cache clear`
    #[serde(default)]
    pub max_age_hours: Option<u64>,
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("./cache")
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: default_cache_dir(),
            max_age_hours: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl LoggingConfig {
    /// Parse the configured level, falling back to `Info`.
    pub fn level_filter(&self) -> log::LevelFilter {
        self.level.parse().unwrap_or(log::LevelFilter::Info)
    }
}

/// Main configuration combining all sub-configs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SurveyConfig {
    #[serde(default)]
    pub data: DataConfig,

    #[serde(default)]
    pub coordinates: CoordinateConfig,

    #[serde(default)]
    pub processing: ProcessingConfig,

    #[serde(default)]
    pub smoothing: SmoothingConfig,

    #[serde(default)]
    pub output: OutputConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl SurveyConfig {
    /// Load configuration from a YAML file.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: SurveyConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a YAML file.
    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_coordinate_config() {
        let config = CoordinateConfig::default();
        assert_eq!(config.input_crs, "EPSG:4326");
        assert_eq!(config.output_crs, "EPSG:3006");
        assert_eq!(config.columns.original_lat_suffix, "_wgs84");
        assert_eq!(config.primary, PrimaryCoordinates::Geographic);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = "processing:\n  time_merge_tolerance: 10s\n  merge_method: interpolated\n";
        let config: SurveyConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.processing.time_merge_tolerance, "10s");
        assert_eq!(config.processing.merge_method, MergeMethod::Interpolated);
        assert_eq!(config.processing.merge_direction, "nearest");
        assert_eq!(config.smoothing.lowess_frac, 0.1);
        assert!(config.coordinates.transform_on_load);
    }

    #[test]
    fn test_yaml_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.yaml");
        let mut config = SurveyConfig::default();
        config.processing.default_resolution = 6;
        config.to_yaml(&path).unwrap();

        let loaded = SurveyConfig::from_yaml(&path).unwrap();
        assert_eq!(loaded.processing.default_resolution, 6);
        assert_eq!(loaded.data.acoustic_pattern, "*.csv");
    }

    #[test]
    fn test_log_level_fallback() {
        let logging = LoggingConfig {
            level: "loud".to_string(),
        };
        assert_eq!(logging.level_filter(), log::LevelFilter::Info);
    }
}
