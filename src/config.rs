//! Settings for a load run.
//!
//! Every tunable of a run is a named field of [`LoadConfig`], filled from
//! flags and environment variables by the binary.

use std::path::PathBuf;

use crate::error::{LoadError, Result};
use crate::file_load::SourceOptions;

/// Rows per committed transaction.
pub const DEFAULT_BATCH_SIZE: usize = 50_000;
/// GeoLite City CSVs start with a copyright line and a column header.
pub const DEFAULT_SKIP_ROWS: usize = 2;
pub const DEFAULT_TABLE: &str = "Locations";
pub const DEFAULT_DATABASE: &str = "geolite.duckdb";
pub const DEFAULT_SCHEMA: &str = "public";

/// Where the locations are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetConfig {
    /// A DuckDB database file, created if missing.
    DuckDb { path: PathBuf },
    /// A PostgreSQL database attached through DuckDB, addressed by a libpq connection string.
    Postgres { uri: String, schema: String },
}

impl Default for TargetConfig {
    fn default() -> Self {
        TargetConfig::DuckDb {
            path: PathBuf::from(DEFAULT_DATABASE),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadConfig {
    /// Delimited file (or ZIP archive) to load.
    pub file_path: PathBuf,
    pub target: TargetConfig,
    /// Destination table, replaced on every run.
    pub table_name: String,
    /// Rows inserted per transaction before committing.
    pub batch_size: usize,
    /// Leading rows to discard before data starts.
    pub skip_rows: usize,
    pub source: SourceOptions,
}

impl LoadConfig {
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: file_path.into(),
            target: TargetConfig::default(),
            table_name: DEFAULT_TABLE.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            skip_rows: DEFAULT_SKIP_ROWS,
            source: SourceOptions::default(),
        }
    }

    #[must_use]
    pub fn with_target(mut self, target: TargetConfig) -> Self {
        self.target = target;
        self
    }

    #[must_use]
    pub fn with_table_name(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = table_name.into();
        self
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    #[must_use]
    pub fn with_skip_rows(mut self, skip_rows: usize) -> Self {
        self.skip_rows = skip_rows;
        self
    }

    #[must_use]
    pub fn with_source(mut self, source: SourceOptions) -> Self {
        self.source = source;
        self
    }

    /// Reject settings the loader cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(LoadError::Argument("batch size must be at least 1".into()));
        }
        if self.table_name.trim().is_empty() {
            return Err(LoadError::Argument("table name must not be empty".into()));
        }
        if self.source.delimiter == self.source.quote {
            return Err(LoadError::Argument(
                "delimiter and quote character must differ".into(),
            ));
        }
        Ok(())
    }
}
