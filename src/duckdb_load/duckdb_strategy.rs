use std::fs;
use std::path::{Path, PathBuf};

use duckdb::Connection;
use tracing::info;

use crate::duckdb_load::target_processor::{quote_ident, quote_literal, TargetProcessor};
use crate::error::{BackendError, LoadError, Result, SchemaStep};

/// Strategy for a local DuckDB database file.
/// Opening the file creates the database, so there is no separate create step on the server.
pub struct DuckDbStrategy {
    path: PathBuf,
    table_name: String,
}

impl DuckDbStrategy {
    pub fn new(path: impl AsRef<Path>, table_name: &str) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            table_name: table_name.to_string(),
        }
    }

    // Sequence behind the locId default, standing in for AUTO_INCREMENT
    fn sequence_name(&self) -> String {
        format!("{}_locid_seq", self.table_name.to_lowercase())
    }

    fn create_table_sql(&self) -> String {
        let table = self.qualified_table();
        let sequence = self.sequence_name();
        // DuckDB does not enforce VARCHAR lengths, hence the CHECKs
        format!(
            "CREATE SEQUENCE IF NOT EXISTS {seq};
            CREATE TABLE IF NOT EXISTS {table} (
                \"locId\" INTEGER PRIMARY KEY DEFAULT nextval({seq_literal}),
                \"country\" VARCHAR(6) DEFAULT '' CHECK (length(\"country\") <= 6),
                \"region\" VARCHAR(6) DEFAULT '' CHECK (length(\"region\") <= 6),
                \"city\" VARCHAR(32) DEFAULT '' CHECK (length(\"city\") <= 32),
                \"postalCode\" VARCHAR(6) DEFAULT '' CHECK (length(\"postalCode\") <= 6),
                \"latitude\" DECIMAL(7,4) DEFAULT NULL,
                \"longitude\" DECIMAL(7,4) DEFAULT NULL,
                \"metroCode\" INTEGER DEFAULT 0,
                \"areaCode\" INTEGER DEFAULT 0
            );",
            seq = quote_ident(&sequence),
            seq_literal = quote_literal(&sequence),
        )
    }
}

impl TargetProcessor for DuckDbStrategy {
    fn describe(&self) -> String {
        format!("DuckDB database '{}'", self.path.display())
    }

    fn connect(&self) -> Result<Connection> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| LoadError::Schema {
                step: SchemaStep::CreateDatabase,
                source: BackendError::new(None, format!("{}: {}", parent.display(), e)),
            })?;
        }

        Connection::open(&self.path).map_err(|e| LoadError::Connection {
            target: self.describe(),
            source: e.into(),
        })
    }

    fn prepare_target(&self, conn: &Connection) -> Result<()> {
        conn.execute_batch(&self.create_table_sql())
            .map_err(|e| LoadError::Schema {
                step: SchemaStep::CreateTable,
                source: e.into(),
            })?;

        conn.execute_batch(&format!("TRUNCATE {};", self.qualified_table()))
            .map_err(|e| LoadError::Schema {
                step: SchemaStep::Truncate,
                source: e.into(),
            })?;

        info!(table = %self.table_name, target = %self.describe(), "Prepared empty location table");
        Ok(())
    }

    fn qualified_table(&self) -> String {
        quote_ident(&self.table_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_is_derived_from_table() {
        let strategy = DuckDbStrategy::new("geolite.duckdb", "Locations");
        assert_eq!(strategy.sequence_name(), "locations_locid_seq");
        assert!(strategy
            .create_table_sql()
            .contains("nextval('locations_locid_seq')"));
    }

    #[test]
    fn test_prepare_is_idempotent_and_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let strategy = DuckDbStrategy::new(dir.path().join("nested/geo.duckdb"), "Locations");
        let conn = strategy.connect().unwrap();

        strategy.prepare_target(&conn).unwrap();
        conn.execute_batch("INSERT INTO \"Locations\" (\"locId\", \"city\") VALUES (7, 'Oslo');")
            .unwrap();
        strategy.prepare_target(&conn).unwrap();

        let count: i64 = conn
            .query_row("SELECT count(*) FROM \"Locations\"", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_locid_falls_back_to_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let strategy = DuckDbStrategy::new(dir.path().join("geo.duckdb"), "Locations");
        let conn = strategy.connect().unwrap();
        strategy.prepare_target(&conn).unwrap();

        conn.execute_batch("INSERT INTO \"Locations\" (\"city\") VALUES ('Lima');")
            .unwrap();
        let (id, metro): (i32, i32) = conn
            .query_row(
                "SELECT \"locId\", \"metroCode\" FROM \"Locations\"",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert!(id >= 1);
        assert_eq!(metro, 0);
    }
}
