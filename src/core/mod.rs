//! Core data types and I/O operations.

pub mod cache;
pub mod loaders;
pub mod table;
pub mod time;
pub mod transforms;
pub mod writers;

pub use cache::{CacheError, CacheManager};
pub use loaders::{get_file_list, load_acoustic_files, load_positions, LoaderError};
pub use table::{Column, Table, TableError};
pub use time::{parse_duration, parse_timestamp, Interval, TimeError};
pub use transforms::{CoordinateTransformer, TransformError};
pub use writers::{write_binned_stats, write_hex_csv, write_stats_report, write_table_csv, WriteError};
