//! Command-line interface for the survey console.

pub mod interpreter;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::config::{MergeMethod, PrimaryCoordinates, SurveyConfig};
use crate::core::loaders::{get_file_list, load_acoustic_files, load_positions, load_table};
use crate::core::table::{Column, Table};
use crate::core::time::{parse_duration, Interval};
use crate::core::transforms::CoordinateTransformer;
use crate::core::writers::{write_binned_stats, write_hex_csv, write_stats_report, write_table_csv};
use crate::processors::merge::{Direction, PositionMerger};
use crate::processors::reduction::{AggregationPlan, Reduction};
use crate::processors::smoothing::{smooth_series, SmoothingMethod};
use crate::processors::spatial::{aggregate_by_hex, CoordinateSource};
use crate::processors::statistics::{describe, remove_outliers, stats_by_time, OutlierMethod};
use crate::processors::temporal::{aggregate_by_time, find_gaps};
use crate::session::{Command, Session};
use crate::visualization;
use interpreter::CommandInterpreter;

#[derive(Parser)]
#[command(name = "acoustic-survey")]
#[command(about = "Acoustic survey console: merge, aggregate and summarise survey logs", version)]
pub struct Cli {
    /// Path to YAML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive console (type 'help' for commands)
    Console,

    /// Merge acoustic logs with the position track and write the merged CSV
    Merge {
        /// Output CSV file
        output: PathBuf,
        /// Directory with acoustic logs (defaults to config)
        #[arg(long)]
        data_dir: Option<PathBuf>,
        /// File name pattern for acoustic logs
        #[arg(long)]
        pattern: Option<String>,
        /// Position track file
        #[arg(long)]
        positions: Option<PathBuf>,
        /// Use union-timeline interpolation instead of the tolerance join
        #[arg(long)]
        interpolate: bool,
        /// Tolerance for the join (e.g. 5s, 1min)
        #[arg(long)]
        tolerance: Option<String>,
        /// Join direction: nearest, forward or backward
        #[arg(long)]
        direction: Option<String>,
        /// After a tolerance join, interpolate remaining position gaps of at most this many rows
        #[arg(long)]
        fill_limit: Option<usize>,
    },

    /// Resample a table into fixed time bins
    Aggregate {
        /// Input CSV (e.g. a merged table)
        input: PathBuf,
        /// Output CSV
        output: PathBuf,
        /// Bin width (e.g. 5min, 1h, 1d)
        #[arg(short, long)]
        interval: Option<String>,
        /// Columns to reduce (defaults to all)
        #[arg(long, value_delimiter = ',')]
        columns: Vec<String>,
        /// Reduction: mean, sum, count, first, last, min, max, median, std
        #[arg(long, default_value = "mean")]
        reduction: String,
    },

    /// Aggregate a table into hexagonal cells
    Hex {
        /// Input CSV with coordinates
        input: PathBuf,
        /// Output CSV (cell_id, values, row_count, geometry_wkt)
        output: PathBuf,
        /// Column to average per cell
        #[arg(long, default_value = "backscatter")]
        column: String,
        /// Grid resolution (0-15)
        #[arg(short, long)]
        resolution: Option<u8>,
        /// Also render the map to this PNG
        #[arg(long)]
        plot: Option<PathBuf>,
    },

    /// Descriptive statistics report
    Stats {
        /// Input CSV
        input: PathBuf,
        /// Output report path
        output: PathBuf,
        /// Columns to summarise (defaults to all)
        #[arg(long, value_delimiter = ',')]
        columns: Vec<String>,
        /// Summarise per time bin instead (writes .csv and .txt)
        #[arg(long)]
        by_time: Option<String>,
        /// Drop outliers of the first column first (iqr, zscore[:t], modified_zscore[:t])
        #[arg(long)]
        outliers: Option<String>,
    },

    /// Smooth one column and write it next to the original
    Smooth {
        /// Input CSV
        input: PathBuf,
        /// Output CSV with an added `<column>_smooth` column
        output: PathBuf,
        /// Column to smooth
        #[arg(long, default_value = "backscatter")]
        column: String,
        /// lowess, savgol, rolling or spline
        #[arg(short, long, default_value = "lowess")]
        method: String,
        /// LOWESS fraction (overrides config)
        #[arg(long)]
        frac: Option<f64>,
        /// Also plot series and overlay to this PNG
        #[arg(long)]
        plot: Option<PathBuf>,
    },
}

/// Create a spinner for indeterminate operations
fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

/// Print a summary box
fn print_summary(title: &str, items: &[(&str, String)]) {
    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║ {:<62} ║", title);
    println!("╠══════════════════════════════════════════════════════════════╣");
    for (key, value) in items {
        let display_value = if value.chars().count() > 39 {
            let head: String = value.chars().take(36).collect();
            format!("{}...", head)
        } else {
            value.clone()
        };
        println!("║ {:<20}: {:<39} ║", key, display_value);
    }
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
}

pub fn run() {
    let cli = Cli::parse();

    // Read config before logging so its level can apply
    let loaded = cli.config.as_ref().map(|path| (path, SurveyConfig::from_yaml(path)));
    let fallback_level = match &loaded {
        Some((_, Ok(cfg))) => cfg.logging.level_filter(),
        _ => log::LevelFilter::Warn,
    };

    env_logger::Builder::new()
        .filter_level(match cli.verbose {
            0 => fallback_level,
            1 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        })
        .format_timestamp_secs()
        .init();

    let config = match loaded {
        Some((path, Ok(cfg))) => {
            info!("Loaded config from: {}", path.display());
            cfg
        }
        Some((path, Err(e))) => {
            warn!("Failed to load config from {}: {}, using defaults", path.display(), e);
            SurveyConfig::default()
        }
        None => SurveyConfig::default(),
    };

    let result = match cli.command {
        Commands::Console => cmd_console(config),
        Commands::Merge {
            output,
            data_dir,
            pattern,
            positions,
            interpolate,
            tolerance,
            direction,
            fill_limit,
        } => cmd_merge(
            &output,
            data_dir,
            pattern,
            positions,
            interpolate,
            tolerance,
            direction,
            fill_limit,
            &config,
        ),
        Commands::Aggregate {
            input,
            output,
            interval,
            columns,
            reduction,
        } => cmd_aggregate(&input, &output, interval, &columns, &reduction, &config),
        Commands::Hex {
            input,
            output,
            column,
            resolution,
            plot,
        } => cmd_hex(&input, &output, &column, resolution, plot.as_deref(), &config),
        Commands::Stats {
            input,
            output,
            columns,
            by_time,
            outliers,
        } => cmd_stats(&input, &output, &columns, by_time, outliers, &config),
        Commands::Smooth {
            input,
            output,
            column,
            method,
            frac,
            plot,
        } => cmd_smooth(&input, &output, &column, &method, frac, plot.as_deref(), &config),
    };

    if let Err(e) = result {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn cmd_console(config: SurveyConfig) -> Result<()> {
    let interpreter = CommandInterpreter::new().context("Failed to build command interpreter")?;
    let mut session = Session::new(config);

    println!("Acoustic survey console; type 'help' or 'exit'");
    println!("Scatter: scatter y:<col> [x:<col>] [smooth=lowess|savgol|rolling|spline] [frac=0.1]");

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("» ");
        io::stdout().flush()?;

        let line = match lines.next() {
            Some(line) => line?,
            None => {
                println!();
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let command = match interpreter.parse(&line) {
            Ok(command) => command,
            Err(e) => {
                println!("Invalid command: {}", e);
                continue;
            }
        };
        if let Err(e) = interpreter.validate(&command) {
            println!("Invalid command: {}", e);
            continue;
        }
        if command == Command::Exit {
            break;
        }

        let spinner = create_spinner("Working...");
        let result = session.execute(&command);
        spinner.finish_and_clear();

        if result.ok {
            println!("{}", result.message);
        } else {
            println!("✗ {}", result.message);
        }
        if let Some(artifact) = result.artifact {
            println!("Artifact: {}", artifact.display());
        }
    }

    println!("Bye!");
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn cmd_merge(
    output: &Path,
    data_dir: Option<PathBuf>,
    pattern: Option<String>,
    positions: Option<PathBuf>,
    interpolate: bool,
    tolerance: Option<String>,
    direction: Option<String>,
    fill_limit: Option<usize>,
    config: &SurveyConfig,
) -> Result<()> {
    let start = Instant::now();
    let data_dir = data_dir.unwrap_or_else(|| config.data.data_dir.clone());
    let pattern = pattern.unwrap_or_else(|| config.data.acoustic_pattern.clone());
    let position_file = positions.unwrap_or_else(|| config.data.position_file.clone());
    let tolerance = tolerance.unwrap_or_else(|| config.processing.time_merge_tolerance.clone());
    let direction = direction.unwrap_or_else(|| config.processing.merge_direction.clone());
    let interpolate = interpolate || config.processing.merge_method == MergeMethod::Interpolated;

    let files = get_file_list(&data_dir, &pattern)?;
    if files.is_empty() {
        bail!("No files found in {} with pattern {}", data_dir.display(), pattern);
    }

    let spinner = create_spinner("Loading acoustic logs and positions...");
    let loaded = load_acoustic_files(&files, &config.data).and_then(|acoustic| {
        load_positions(&position_file, &config.data, &config.coordinates.columns)
            .map(|positions| (acoustic, positions))
    });
    spinner.finish_and_clear();
    let (acoustic, positions) = loaded?;

    let merger = PositionMerger::from_config(&config.coordinates, &config.processing)?;
    let mut merged = if interpolate {
        merger.merge_positions_interpolated(&acoustic, &positions)?
    } else {
        let tolerance = parse_duration(&tolerance)?;
        let direction: Direction = direction.parse()?;
        merger.merge_positions(&acoustic, &positions, tolerance, direction)?
    };

    if let Some(limit) = fill_limit {
        merged = merger.interpolate_positions(&merged, Some(limit));
    }

    write_table_csv(output, &merged.table)?;
    let method = if interpolate { "interpolated" } else { "tolerance" };

    print_summary(
        "Merge Complete",
        &[
            ("Acoustic files", files.len().to_string()),
            ("Acoustic rows", acoustic.len().to_string()),
            ("Position fixes", positions.len().to_string()),
            ("Method", method.to_string()),
            ("Match rate", format!("{:.2}%", merged.match_rate)),
            ("Output CSV", output.display().to_string()),
            ("Duration", format!("{:.2?}", start.elapsed())),
        ],
    );
    Ok(())
}

/// Load a previously written table (merged, aggregated or cached).
fn load_input(input: &Path, config: &SurveyConfig) -> Result<Table> {
    load_table(input, &config.data).with_context(|| format!("Failed to load {}", input.display()))
}

fn cmd_aggregate(
    input: &Path,
    output: &Path,
    interval: Option<String>,
    columns: &[String],
    reduction: &str,
    config: &SurveyConfig,
) -> Result<()> {
    let start = Instant::now();
    let interval: Interval = interval
        .as_deref()
        .unwrap_or(&config.processing.default_interval)
        .parse()?;
    let reduction: Reduction = reduction.parse()?;

    let table = load_input(input, config)?;
    let columns = if columns.is_empty() {
        table.column_names()
    } else {
        columns.to_vec()
    };
    let plan = columns
        .iter()
        .fold(AggregationPlan::new(), |plan, c| plan.with(c.clone(), reduction));

    let aggregation = aggregate_by_time(&table, interval, &plan)?;
    let gaps = find_gaps(&table.timestamps, interval);
    if !gaps.is_empty() {
        warn!("{} empty {} bins between first and last record", gaps.len(), interval);
    }
    write_table_csv(output, &aggregation.to_table())?;

    print_summary(
        "Time Aggregation Complete",
        &[
            ("Input rows", table.len().to_string()),
            ("Interval", interval.to_string()),
            ("Reduction", reduction.to_string()),
            ("Bins", aggregation.len().to_string()),
            ("Empty bins", gaps.len().to_string()),
            ("Output CSV", output.display().to_string()),
            ("Duration", format!("{:.2?}", start.elapsed())),
        ],
    );
    Ok(())
}

fn cmd_hex(
    input: &Path,
    output: &Path,
    column: &str,
    resolution: Option<u8>,
    plot: Option<&Path>,
    config: &SurveyConfig,
) -> Result<()> {
    let start = Instant::now();
    let resolution = resolution.unwrap_or(config.processing.default_resolution);
    let table = load_input(input, config)?;
    let coords = &config.coordinates;
    let plan = AggregationPlan::new().with(column, Reduction::Mean);

    // Projected tables are mapped back to WGS84 before cell assignment
    let transformer = match coords.primary {
        PrimaryCoordinates::Projected => Some(CoordinateTransformer::new(
            &coords.input_crs,
            &coords.output_crs,
        )?),
        PrimaryCoordinates::Geographic => None,
    };
    let source = match &transformer {
        Some(transformer) => CoordinateSource::Projected {
            easting_col: &coords.columns.output_easting,
            northing_col: &coords.columns.output_northing,
            transformer,
        },
        None => CoordinateSource::geographic(&coords.columns.input_lat, &coords.columns.input_lon),
    };

    let spinner = create_spinner("Assigning hex cells...");
    let aggregation = aggregate_by_hex(&table, &source, resolution, &plan);
    spinner.finish_and_clear();
    let aggregation = aggregation?;

    write_hex_csv(output, &aggregation)?;
    if let Some(png) = plot {
        visualization::plot_hex_map(png, &aggregation, column)?;
    }

    print_summary(
        "Hex Aggregation Complete",
        &[
            ("Input rows", table.len().to_string()),
            ("Rows with a cell", aggregation.total_rows().to_string()),
            ("Resolution", resolution.to_string()),
            ("Cells", aggregation.len().to_string()),
            ("Output CSV", output.display().to_string()),
            (
                "Map PNG",
                plot.map(|p| p.display().to_string()).unwrap_or_else(|| "-".to_string()),
            ),
            ("Duration", format!("{:.2?}", start.elapsed())),
        ],
    );
    Ok(())
}

fn cmd_stats(
    input: &Path,
    output: &Path,
    columns: &[String],
    by_time: Option<String>,
    outliers: Option<String>,
    config: &SurveyConfig,
) -> Result<()> {
    let start = Instant::now();
    let mut table = load_input(input, config)?;

    if let Some(method) = outliers {
        let method: OutlierMethod = method.parse()?;
        let Some(target) = columns.first() else {
            bail!("--outliers needs --columns to name the column to filter");
        };
        let before = table.len();
        table = remove_outliers(&table, target, method)?;
        info!("Removed {} outlier rows using {}", before - table.len(), method);
    }

    let (summary_rows, written) = match by_time {
        Some(interval) => {
            let interval: Interval = interval.parse()?;
            let columns = if columns.is_empty() {
                table.column_names()
            } else {
                columns.to_vec()
            };
            let stats = stats_by_time(&table, interval, &columns);
            let (csv_path, txt_path) = write_binned_stats(output, &stats)?;
            (
                stats.len(),
                format!("{}, {}", csv_path.display(), txt_path.display()),
            )
        }
        None => {
            let stats = describe(&table, columns)?;
            write_stats_report(output, &stats)?;
            (stats.len(), output.display().to_string())
        }
    };

    print_summary(
        "Statistics Complete",
        &[
            ("Input rows", table.len().to_string()),
            ("Summaries", summary_rows.to_string()),
            ("Output", written),
            ("Duration", format!("{:.2?}", start.elapsed())),
        ],
    );
    Ok(())
}

fn cmd_smooth(
    input: &Path,
    output: &Path,
    column: &str,
    method: &str,
    frac: Option<f64>,
    plot: Option<&Path>,
    config: &SurveyConfig,
) -> Result<()> {
    let start = Instant::now();
    let mut method = SmoothingMethod::from_name(method, &config.smoothing)?;
    if let (SmoothingMethod::Lowess { frac: f }, Some(value)) = (&mut method, frac) {
        *f = value;
    }

    let mut table = load_input(input, config)?.sorted_by_time();
    let values = table.require(column)?.values.clone();
    let smoothed = smooth_series(&table.timestamps, &values, method)?;

    if let Some(png) = plot {
        visualization::plot_time_series(png, &table.timestamps, &values, Some(&smoothed))?;
    }

    let smooth_name = format!("{}_smooth", column);
    table.set_column(Column::new(smooth_name.clone(), smoothed))?;
    write_table_csv(output, &table)?;

    print_summary(
        "Smoothing Complete",
        &[
            ("Rows", table.len().to_string()),
            ("Method", method.name().to_string()),
            ("New column", smooth_name),
            ("Output CSV", output.display().to_string()),
            ("Duration", format!("{:.2?}", start.elapsed())),
        ],
    );
    Ok(())
}
