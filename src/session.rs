//! Interactive session state and command execution.
//!
//! A [`Session`] owns the configuration, the raw tables of the last load and
//! the single current working table. Load, aggregate and cache-load replace
//! the current table wholesale; every other command only reads it.

use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use chrono::Duration;
use log::{debug, error, info, warn};

use crate::config::{MergeMethod, PrimaryCoordinates, SurveyConfig};
use crate::core::cache::CacheManager;
use crate::core::loaders::{get_file_list, load_acoustic_files, load_positions, validate_coordinates};
use crate::core::table::Table;
use crate::core::time::{elapsed_hours, parse_duration, Interval};
use crate::core::transforms::CoordinateTransformer;
use crate::core::writers::{write_binned_stats, write_hex_csv, write_stats_report};
use crate::processors::merge::{Direction, PositionMerger};
use crate::processors::reduction::{AggregationPlan, Reduction};
use crate::processors::smoothing::{fit_spline, lowess, smooth_series, SmoothingMethod};
use crate::processors::spatial::{aggregate_by_hex, CoordinateSource};
use crate::processors::statistics::{describe, remove_outliers, stats_by_time, OutlierMethod};
use crate::processors::temporal::aggregate_by_time;
use crate::visualization::{plot_hex_map, plot_scatter, plot_time_series};

/// Name of the implicit time axis in commands.
pub const TIME_AXIS: &str = "timestamp";

/// Shared options of the two plot commands.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PlotOptions {
    /// Resample to this interval (mean) before plotting
    pub interval: Option<String>,
    /// Overlay method name (`lowess`, `savgol`, `rolling`, `spline`)
    pub smooth: Option<String>,
    /// Override of the configured LOWESS fraction
    pub frac: Option<f64>,
    /// Drop rows flagged by this method (`iqr`, `zscore[:t]`, `modified_zscore[:t]`)
    pub outliers: Option<String>,
}

/// A parsed console command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Set(Vec<(String, String)>),
    Load {
        dir: Option<PathBuf>,
        pattern: Option<String>,
        positions: Option<PathBuf>,
    },
    AggregateTime {
        interval: String,
        /// Columns to average; empty means every column
        columns: Vec<String>,
        reduction: Option<String>,
    },
    TimeSeriesPlot {
        y: String,
        options: PlotOptions,
    },
    ScatterPlot {
        y: String,
        x: Option<String>,
        options: PlotOptions,
    },
    HexMap {
        y: String,
        resolution: Option<u8>,
    },
    ComputeStats {
        columns: Vec<String>,
    },
    StatsByTime {
        interval: String,
        columns: Vec<String>,
    },
    CoordsInfo,
    CacheSave {
        key: String,
    },
    CacheLoad {
        key: String,
    },
    CacheClear {
        older_than_hours: Option<u64>,
    },
    Help,
    Exit,
}

/// Outcome of one command.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    pub ok: bool,
    pub message: String,
    pub artifact: Option<PathBuf>,
}

impl ExecutionResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
            artifact: None,
        }
    }

    pub fn with_artifact(message: impl Into<String>, artifact: PathBuf) -> Self {
        Self {
            ok: true,
            message: message.into(),
            artifact: Some(artifact),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
            artifact: None,
        }
    }
}

pub const HELP_TEXT: &str = "\
Commands:
  set key=value [...]                    # dir, pattern, positions, tolerance, direction,
                                         # method, resolution, interval, frac
  load dir=./data pattern=*.csv positions=positions.csv
  aggregate time 5min [columns=a,b] [reduction=mean]
  plot y=backscatter [5min] [smooth=lowess] [outliers=iqr]
  scatter y:backscatter [x:temperature] [smooth=lowess] [frac=0.1]
  map hex y=backscatter res=8            # hexagonal map
  stats columns=backscatter,temperature
  stats by time 1h [columns=backscatter]
  coords                                 # coordinate system summary
  cache save|load <key> | cache clear [older=24]
  help | exit";

/// Single-analyst working context.
#[derive(Debug)]
pub struct Session {
    config: SurveyConfig,
    cache: CacheManager,
    acoustic: Option<Table>,
    positions: Option<Table>,
    current: Option<Table>,
    match_rate: Option<f64>,
}

impl Session {
    pub fn new(config: SurveyConfig) -> Self {
        let cache = CacheManager::from_config(&config.cache);
        Self {
            config,
            cache,
            acoustic: None,
            positions: None,
            current: None,
            match_rate: None,
        }
    }

    pub fn config(&self) -> &SurveyConfig {
        &self.config
    }

    /// The current working table, if any.
    pub fn current(&self) -> Option<&Table> {
        self.current.as_ref()
    }

    pub fn acoustic(&self) -> Option<&Table> {
        self.acoustic.as_ref()
    }

    pub fn positions(&self) -> Option<&Table> {
        self.positions.as_ref()
    }

    /// Match rate of the last merge, in percent.
    pub fn match_rate(&self) -> Option<f64> {
        self.match_rate
    }

    /// Run a command. Failures are reported in the result, never raised.
    pub fn execute(&mut self, command: &Command) -> ExecutionResult {
        debug!("Executing {:?}", command);
        match self.dispatch(command) {
            Ok(result) => result,
            Err(e) => {
                error!("Command failed: {:#}", e);
                ExecutionResult::failure(format!("Error: {:#}", e))
            }
        }
    }

    /// Describe a command without running it.
    pub fn dry_run(&self, command: &Command) -> String {
        format!("Would execute: {:?}", command)
    }

    fn dispatch(&mut self, command: &Command) -> Result<ExecutionResult> {
        match command {
            Command::Set(params) => self.apply_settings(params),
            Command::Load {
                dir,
                pattern,
                positions,
            } => self.load(dir.clone(), pattern.clone(), positions.clone()),
            Command::AggregateTime {
                interval,
                columns,
                reduction,
            } => self.aggregate_time(interval, columns, reduction.as_deref()),
            Command::TimeSeriesPlot { y, options } => self.time_series_plot(y, options),
            Command::ScatterPlot { y, x, options } => self.scatter_plot(y, x.as_deref(), options),
            Command::HexMap { y, resolution } => self.hex_map(y, *resolution),
            Command::ComputeStats { columns } => self.compute_stats(columns),
            Command::StatsByTime { interval, columns } => self.stats_by_time(interval, columns),
            Command::CoordsInfo => Ok(ExecutionResult::success(self.coords_info())),
            Command::CacheSave { key } => {
                let table = self.require_current()?;
                let path = self.cache.save(table, key)?;
                Ok(ExecutionResult::with_artifact(
                    format!("Cached {} rows as '{}'", table.len(), key),
                    path,
                ))
            }
            Command::CacheLoad { key } => {
                let table = self
                    .cache
                    .load(key)?
                    .ok_or_else(|| anyhow!("No cache entry named '{}'", key))?;
                let rows = table.len();
                self.current = Some(table);
                Ok(ExecutionResult::success(format!(
                    "Loaded {} rows from cache '{}'",
                    rows, key
                )))
            }
            Command::CacheClear { older_than_hours } => {
                let hours = older_than_hours.or(self.config.cache.max_age_hours);
                let max_age = match hours {
                    Some(h) => Some(
                        i64::try_from(h)
                            .ok()
                            .and_then(Duration::try_hours)
                            .ok_or_else(|| anyhow!("Cache age of {} hours is out of range", h))?,
                    ),
                    None => None,
                };
                let removed = self.cache.clear(max_age)?;
                Ok(ExecutionResult::success(format!("Removed {} cache entries", removed)))
            }
            Command::Help => Ok(ExecutionResult::success(HELP_TEXT)),
            Command::Exit => Ok(ExecutionResult::success("exit")),
        }
    }

    fn require_current(&self) -> Result<&Table> {
        self.current
            .as_ref()
            .ok_or_else(|| anyhow!("No data loaded. Use 'load' command."))
    }

    fn apply_settings(&mut self, params: &[(String, String)]) -> Result<ExecutionResult> {
        if params.is_empty() {
            bail!("Nothing to set; use key=value");
        }

        for (key, value) in params {
            match key.as_str() {
                "dir" | "data_dir" => self.config.data.data_dir = PathBuf::from(value),
                "pattern" => self.config.data.acoustic_pattern = value.clone(),
                "positions" | "position_file" => {
                    self.config.data.position_file = PathBuf::from(value)
                }
                "tolerance" => {
                    parse_duration(value)?;
                    self.config.processing.time_merge_tolerance = value.clone();
                }
                "direction" => {
                    value.parse::<Direction>()?;
                    self.config.processing.merge_direction = value.clone();
                }
                "method" | "merge_method" => {
                    self.config.processing.merge_method = match value.as_str() {
                        "tolerance" => MergeMethod::Tolerance,
                        "interpolated" | "interpolate" => MergeMethod::Interpolated,
                        other => bail!("Unknown merge method '{}'", other),
                    }
                }
                "resolution" | "res" => {
                    self.config.processing.default_resolution = value
                        .parse()
                        .with_context(|| format!("Invalid resolution '{}'", value))?
                }
                "interval" => {
                    value.parse::<Interval>()?;
                    self.config.processing.default_interval = value.clone();
                }
                "frac" => {
                    self.config.smoothing.lowess_frac = value
                        .parse()
                        .with_context(|| format!("Invalid LOWESS fraction '{}'", value))?
                }
                other => bail!("Unknown setting '{}'", other),
            }
        }

        let summary: Vec<String> = params.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        Ok(ExecutionResult::success(format!(
            "Updated settings: {}",
            summary.join(", ")
        )))
    }

    fn load(
        &mut self,
        dir: Option<PathBuf>,
        pattern: Option<String>,
        positions: Option<PathBuf>,
    ) -> Result<ExecutionResult> {
        let data = &self.config.data;
        let dir = dir.unwrap_or_else(|| data.data_dir.clone());
        let pattern = pattern.unwrap_or_else(|| data.acoustic_pattern.clone());
        let position_file = positions.unwrap_or_else(|| data.position_file.clone());

        let files = get_file_list(&dir, &pattern)?;
        if files.is_empty() {
            return Ok(ExecutionResult::failure(format!(
                "No files found in {} with pattern {}",
                dir.display(),
                pattern
            )));
        }
        if !position_file.exists() {
            return Ok(ExecutionResult::failure(format!(
                "Position file not found: {}",
                position_file.display()
            )));
        }

        let acoustic = load_acoustic_files(&files, data)
            .with_context(|| format!("Failed to load acoustic files from {}", dir.display()))?;
        let positions = load_positions(&position_file, data, &self.config.coordinates.columns)?;

        let processing = &self.config.processing;
        let merger = PositionMerger::from_config(&self.config.coordinates, processing)?;
        let merged = match processing.merge_method {
            MergeMethod::Tolerance => {
                let tolerance = parse_duration(&processing.time_merge_tolerance)?;
                let direction: Direction = processing.merge_direction.parse()?;
                merger.merge_positions(&acoustic, &positions, tolerance, direction)?
            }
            MergeMethod::Interpolated => merger.merge_positions_interpolated(&acoustic, &positions)?,
        };

        for issue in validate_coordinates(&merged.table, &merged.lat_col, &merged.lon_col) {
            warn!("Merged table: {}", issue);
        }

        let message = format!(
            "Loaded {} rows from {} files; merged with {} position fixes (match rate {:.1}%)",
            acoustic.len(),
            files.len(),
            positions.len(),
            merged.match_rate
        );
        info!("{}", message);

        self.match_rate = Some(merged.match_rate);
        self.acoustic = Some(acoustic);
        self.positions = Some(positions);
        self.current = Some(merged.into_table());
        Ok(ExecutionResult::success(message))
    }

    fn aggregate_time(
        &mut self,
        interval: &str,
        columns: &[String],
        reduction: Option<&str>,
    ) -> Result<ExecutionResult> {
        let table = self.require_current()?;
        let interval: Interval = interval.parse()?;
        let reduction: Reduction = reduction.unwrap_or("mean").parse()?;

        let columns = if columns.is_empty() {
            table.column_names()
        } else {
            columns.to_vec()
        };
        let plan = columns
            .iter()
            .filter(|c| c.as_str() != "row_count")
            .fold(AggregationPlan::new(), |plan, c| plan.with(c.clone(), reduction));

        let aggregated = aggregate_by_time(table, interval, &plan)?.to_table();
        let rows = aggregated.len();
        self.current = Some(aggregated);
        Ok(ExecutionResult::success(format!(
            "Aggregated by {} ({}); rows: {}",
            interval, reduction, rows
        )))
    }

    /// Current table with outliers removed and, optionally, resampled.
    fn plot_frame(&self, y: &str, extra: Option<&str>, options: &PlotOptions) -> Result<Table> {
        let mut table = self.require_current()?.clone();
        table.require(y)?;

        if let Some(method) = &options.outliers {
            let method: OutlierMethod = method.parse()?;
            let before = table.len();
            table = remove_outliers(&table, y, method)?;
            info!("Removed {} outliers from '{}' ({})", before - table.len(), y, method);
        }

        if let Some(interval) = &options.interval {
            let interval: Interval = interval.parse()?;
            let mut plan = AggregationPlan::new().with(y, Reduction::Mean);
            if let Some(x) = extra {
                plan = plan.with(x, Reduction::Mean);
            }
            table = aggregate_by_time(&table, interval, &plan)?.to_table();
        }

        Ok(table.sorted_by_time())
    }

    fn smoothing_method(&self, options: &PlotOptions) -> Result<Option<SmoothingMethod>> {
        let name = match options.smooth.as_deref() {
            None | Some("false") | Some("none") | Some("no") => return Ok(None),
            Some("true") | Some("yes") => "lowess",
            Some(name) => name,
        };
        let mut method = SmoothingMethod::from_name(name, &self.config.smoothing)?;
        if let (SmoothingMethod::Lowess { frac }, Some(f)) = (&mut method, options.frac) {
            *frac = f;
        }
        Ok(Some(method))
    }

    fn time_series_plot(&self, y: &str, options: &PlotOptions) -> Result<ExecutionResult> {
        let table = self.plot_frame(y, None, options)?;
        let values = &table.require(y)?.values;
        let overlay = match self.smoothing_method(options)? {
            Some(method) => Some(smooth_series(&table.timestamps, values, method)?),
            None => None,
        };

        let out = self.config.output.plots_dir.join(format!("timeseries_{}.png", y));
        plot_time_series(&out, &table.timestamps, values, overlay.as_deref())?;
        Ok(ExecutionResult::with_artifact(
            format!("Saved plot to {}", out.display()),
            out,
        ))
    }

    fn scatter_plot(&self, y: &str, x: Option<&str>, options: &PlotOptions) -> Result<ExecutionResult> {
        let x_col = x.filter(|x| *x != TIME_AXIS);
        let table = self.plot_frame(y, x_col, options)?;
        let y_values = &table.require(y)?.values;

        let x_values: Vec<Option<f64>> = match x_col {
            Some(name) => table.require(name)?.values.clone(),
            None => elapsed_hours(&table.timestamps).into_iter().map(Some).collect(),
        };

        let overlay = match self.smoothing_method(options)? {
            None => None,
            Some(method) if x_col.is_none() => Some(smooth_series(&table.timestamps, y_values, method)?),
            Some(SmoothingMethod::Lowess { frac }) => Some(lowess(&x_values, y_values, frac)?),
            Some(SmoothingMethod::Spline { smoothing }) => {
                let spline = fit_spline(&x_values, y_values, smoothing)?;
                Some(x_values.iter().map(|v| v.map(|v| spline.eval(v))).collect())
            }
            Some(other) => bail!(
                "{} smoothing needs the time axis; use x={} or smooth=lowess",
                other.name(),
                TIME_AXIS
            ),
        };

        let name = match x_col {
            Some(x) => format!("scatter_{}_vs_{}.png", y, x),
            None => format!("scatter_{}.png", y),
        };
        let out = self.config.output.plots_dir.join(name);
        plot_scatter(&out, &x_values, y_values, overlay.as_deref())?;
        Ok(ExecutionResult::with_artifact(
            format!("Saved plot to {}", out.display()),
            out,
        ))
    }

    fn hex_map(&self, y: &str, resolution: Option<u8>) -> Result<ExecutionResult> {
        let table = self.require_current()?;
        let resolution = resolution.unwrap_or(self.config.processing.default_resolution);
        let coords = &self.config.coordinates;
        let columns = &coords.columns;
        let plan = AggregationPlan::new().with(y, Reduction::Mean);

        let aggregation = match coords.primary {
            PrimaryCoordinates::Geographic => aggregate_by_hex(
                table,
                &CoordinateSource::geographic(&columns.input_lat, &columns.input_lon),
                resolution,
                &plan,
            )?,
            PrimaryCoordinates::Projected => {
                let transformer = CoordinateTransformer::new(&coords.input_crs, &coords.output_crs)?;
                let source = CoordinateSource::Projected {
                    easting_col: &columns.output_easting,
                    northing_col: &columns.output_northing,
                    transformer: &transformer,
                };
                aggregate_by_hex(table, &source, resolution, &plan)?
            }
        };

        if aggregation.is_empty() {
            return Ok(ExecutionResult::failure(
                "No rows with a position; nothing to map",
            ));
        }

        let maps_dir = &self.config.output.maps_dir;
        let csv_path = maps_dir.join(format!("hex_{}_r{}.csv", y, resolution));
        write_hex_csv(&csv_path, &aggregation)?;
        let out = maps_dir.join(format!("hex_{}_r{}.png", y, resolution));
        plot_hex_map(&out, &aggregation, y)?;

        Ok(ExecutionResult::with_artifact(
            format!(
                "Saved map of {} cells ({} rows) to {}; cell table at {}",
                aggregation.len(),
                aggregation.total_rows(),
                out.display(),
                csv_path.display()
            ),
            out,
        ))
    }

    fn compute_stats(&self, columns: &[String]) -> Result<ExecutionResult> {
        let table = self.require_current()?;
        let stats = describe(table, columns)?;
        if stats.is_empty() {
            return Ok(ExecutionResult::failure("No column has valid values"));
        }

        let out = self.config.output.reports_dir.join("descriptive_stats.txt");
        write_stats_report(&out, &stats)?;

        let lines: Vec<String> = stats
            .iter()
            .map(|s| format!("{}: {}", s.variable, s.summary.to_line()))
            .collect();
        Ok(ExecutionResult::with_artifact(
            format!("{}\nSaved stats to {}", lines.join("\n"), out.display()),
            out,
        ))
    }

    fn stats_by_time(&self, interval: &str, columns: &[String]) -> Result<ExecutionResult> {
        let table = self.require_current()?;
        let interval: Interval = interval.parse()?;
        let columns = if columns.is_empty() {
            table.column_names()
        } else {
            columns.to_vec()
        };

        let stats = stats_by_time(table, interval, &columns);
        let base = self
            .config
            .output
            .reports_dir
            .join(format!("stats_by_time_{}", interval));
        let (csv_path, txt_path) = write_binned_stats(&base, &stats)?;

        Ok(ExecutionResult::with_artifact(
            format!(
                "Computed {} bin statistics; saved to {} and {}",
                stats.len(),
                csv_path.display(),
                txt_path.display()
            ),
            csv_path,
        ))
    }

    fn coords_info(&self) -> String {
        let coords = &self.config.coordinates;
        let columns = &coords.columns;
        let mut lines = vec![
            format!("Input CRS:  {}", coords.input_crs),
            format!("Output CRS: {}", coords.output_crs),
            format!("Primary:    {:?}", coords.primary),
            format!("Reproject on load: {}", coords.transform_on_load),
        ];

        match &self.current {
            Some(table) => {
                let present: Vec<&str> = [
                    columns.input_lat.as_str(),
                    columns.input_lon.as_str(),
                    columns.output_easting.as_str(),
                    columns.output_northing.as_str(),
                ]
                .into_iter()
                .filter(|c| table.has_column(c))
                .collect();
                lines.push(format!("Coordinate columns: {}", present.join(", ")));
                let issues = validate_coordinates(table, &columns.input_lat, &columns.input_lon);
                if issues.is_empty() {
                    lines.push("Coordinates valid".to_string());
                } else {
                    lines.extend(issues);
                }
            }
            None => lines.push("No data loaded".to_string()),
        }

        if let Some(rate) = self.match_rate {
            lines.push(format!("Last match rate: {:.1}%", rate));
        }
        lines.join("\n")
    }
}
