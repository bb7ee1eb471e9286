//! Batched, transactional loader for the GeoLite City location table.
//!
//! Rows stream from a delimited file (optionally inside the ZIP MaxMind ships),
//! skip the dataset's header lines, and are inserted one at a time into DuckDB
//! or PostgreSQL, committing every `batch_size` rows. The first failure rolls
//! back the open batch and ends the run.

pub mod config;
pub mod duckdb_load;
pub mod error;
pub mod file_load;
pub mod location;
pub mod logging;

#[cfg(feature = "python")]
mod duckdb_geolite;

pub use config::{LoadConfig, TargetConfig};
pub use duckdb_load::{process_file, LoadSummary};
pub use error::{BackendError, LoadError, Result};
