use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result alias used throughout the loader.
pub type Result<T> = std::result::Result<T, LoadError>;

/// A failure reported by the storage backend (or by the conversion of a row
/// into the values the backend expects).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendError {
    pub code: Option<String>,
    pub message: String,
}

impl BackendError {
    pub fn new(code: Option<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// A row value that could not be converted into its column type.
    pub fn malformed_value(field: &str, detail: impl fmt::Display) -> Self {
        Self::new(
            Some("MalformedValue".to_string()),
            format!("field `{field}`: {detail}"),
        )
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{}:{}", code, self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for BackendError {}

impl From<duckdb::Error> for BackendError {
    fn from(err: duckdb::Error) -> Self {
        let code = match &err {
            duckdb::Error::DuckDBFailure(failure, _) => Some(format!("{:?}", failure.code)),
            _ => None,
        };
        Self::new(code, err.to_string())
    }
}

/// Step of the storage preparation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaStep {
    CreateDatabase,
    CreateTable,
    Truncate,
}

impl fmt::Display for SchemaStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaStep::CreateDatabase => write!(f, "create database"),
            SchemaStep::CreateTable => write!(f, "create table"),
            SchemaStep::Truncate => write!(f, "truncate table"),
        }
    }
}

/// Every way a load run can end early. All of them are fatal.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("invalid arguments: {0}")]
    Argument(String),

    #[error("could not open input file {path}: {reason}")]
    FileAccess { path: PathBuf, reason: String },

    #[error("could not connect to {target}: {source}")]
    Connection {
        target: String,
        #[source]
        source: BackendError,
    },

    #[error("could not {step}: {source}")]
    Schema {
        step: SchemaStep,
        #[source]
        source: BackendError,
    },

    #[error("could not begin transaction after {rows_committed} committed rows: {source}")]
    Transaction {
        rows_committed: u64,
        #[source]
        source: BackendError,
    },

    #[error("could not insert data row {row}: {source}")]
    Insert {
        row: u64,
        rows_committed: u64,
        #[source]
        source: BackendError,
        rollback: Option<BackendError>,
    },

    #[error("could not commit batch ending at data row {row}: {source}")]
    Commit {
        row: u64,
        rows_committed: u64,
        #[source]
        source: BackendError,
        rollback: Option<BackendError>,
    },

    #[error("malformed input at line {line}: {reason}")]
    MalformedRow {
        line: u64,
        reason: String,
        rows_processed: u64,
        rows_committed: u64,
        rollback: Option<BackendError>,
    },
}

impl LoadError {
    /// Process exit status for this class of failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            LoadError::Argument(_) => 2,
            LoadError::FileAccess { .. } => 3,
            LoadError::Connection { .. } => 4,
            LoadError::Schema { .. } => 5,
            LoadError::Transaction { .. } => 6,
            LoadError::Insert { .. } => 7,
            LoadError::Commit { .. } => 8,
            LoadError::MalformedRow { .. } => 9,
        }
    }

    /// Rows that reached the loader before the failure, when known.
    pub fn rows_processed(&self) -> Option<u64> {
        match self {
            LoadError::Insert { row, .. } | LoadError::Commit { row, .. } => Some(*row),
            LoadError::MalformedRow { rows_processed, .. } => Some(*rows_processed),
            _ => None,
        }
    }

    /// Rows durably committed before the failure, when known.
    pub fn rows_committed(&self) -> Option<u64> {
        match self {
            LoadError::Transaction { rows_committed, .. }
            | LoadError::Insert { rows_committed, .. }
            | LoadError::Commit { rows_committed, .. }
            | LoadError::MalformedRow { rows_committed, .. } => Some(*rows_committed),
            _ => None,
        }
    }

    /// The rollback that failed while unwinding this error, if any.
    pub fn rollback_failure(&self) -> Option<&BackendError> {
        match self {
            LoadError::Insert { rollback, .. }
            | LoadError::Commit { rollback, .. }
            | LoadError::MalformedRow { rollback, .. } => rollback.as_ref(),
            _ => None,
        }
    }

    pub(crate) fn with_rollback_failure(mut self, failure: BackendError) -> Self {
        match &mut self {
            LoadError::Insert { rollback, .. }
            | LoadError::Commit { rollback, .. }
            | LoadError::MalformedRow { rollback, .. } => *rollback = Some(failure),
            _ => {}
        }
        self
    }
}
