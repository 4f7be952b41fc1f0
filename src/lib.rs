//! Acoustic survey console.
//!
//! This crate provides tools for:
//! - Loading acoustic CSV/TSV logs and GPS position tracks
//! - Merging the two by tolerance as-of join or time-weighted interpolation
//! - Resampling into time bins and aggregating into hexagonal cells
//! - Descriptive statistics, outlier filtering and curve smoothing
//! - PNG plots and maps, CSV reports and an on-disk table cache
//!
//! # Example
//!
//! ```no_run
//! use acoustic_survey::config::{CoordinateColumns, DataConfig};
//! use acoustic_survey::core::loaders::{load_acoustic_files, load_positions};
//! use acoustic_survey::processors::merge::PositionMerger;
//! use std::path::{Path, PathBuf};
//!
//! let config = DataConfig::default();
//! let acoustic = load_acoustic_files(&[PathBuf::from("log.csv")], &config).unwrap();
//! let positions = load_positions(Path::new("positions.txt"), &config, &CoordinateColumns::default())
//!     .unwrap();
//! let merged = PositionMerger::default()
//!     .merge_positions_interpolated(&acoustic, &positions)
//!     .unwrap();
//! println!("match rate {:.1}%", merged.match_rate);
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod processors;
pub mod session;
pub mod visualization;

pub use config::{CoordinateConfig, DataConfig, ProcessingConfig, SmoothingConfig, SurveyConfig};
pub use core::table::{Column, Table};
pub use processors::merge::{MergedTable, PositionMerger};
pub use session::{Command, ExecutionResult, Session};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
