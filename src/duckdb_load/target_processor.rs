use duckdb::Connection;

use crate::config::{LoadConfig, TargetConfig};
use crate::duckdb_load::duckdb_strategy::DuckDbStrategy;
use crate::duckdb_load::postgres_strategy::PostgresStrategy;
use crate::error::Result;
use crate::location::LOCATION_COLUMNS;

/// Strategy trait for the store the locations end up in.
/// Both strategies load through a DuckDB connection; they differ in where the table lives.
pub trait TargetProcessor {
    /// Human readable name of the destination, used in messages.
    fn describe(&self) -> String;

    /// Open the connection the whole run goes through.
    fn connect(&self) -> Result<Connection>;

    /// Make sure the destination and table exist, then empty the table.
    fn prepare_target(&self, conn: &Connection) -> Result<()>;

    /// Table name as DuckDB resolves it.
    fn qualified_table(&self) -> String;

    /// Parameterized insert of one location row.
    fn insert_statement(&self) -> String {
        let columns: Vec<String> = LOCATION_COLUMNS.iter().map(|c| quote_ident(c)).collect();
        let placeholders = vec!["?"; LOCATION_COLUMNS.len()];
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.qualified_table(),
            columns.join(", "),
            placeholders.join(", ")
        )
    }
}

/// Pick the strategy for the configured target.
pub fn target_for(config: &LoadConfig) -> Box<dyn TargetProcessor> {
    match &config.target {
        TargetConfig::DuckDb { path } => Box::new(DuckDbStrategy::new(path, &config.table_name)),
        TargetConfig::Postgres { uri, schema } => {
            Box::new(PostgresStrategy::new(uri, schema, &config.table_name))
        }
    }
}

// Double-quote an identifier, escaping embedded quotes
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

// Single-quote a string literal, escaping embedded quotes
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
