pub mod batch_loader;
pub mod core_processor;
pub mod duckdb_strategy;
pub mod postgres_strategy;
pub mod target_processor;

pub use batch_loader::{BatchLoader, LoadSummary, LoaderState, LocationSink};
pub use core_processor::{process_file, CoreProcessor, DuckDbSession};
pub use target_processor::{target_for, TargetProcessor};
