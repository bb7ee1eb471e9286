use duckdb::Connection;
use tracing::info;

use crate::duckdb_load::target_processor::{quote_ident, quote_literal, TargetProcessor};
use crate::error::{LoadError, Result, SchemaStep};

// Catalog alias the Postgres database is attached under
const ATTACHED_DB: &str = "geolite_db";

/// Strategy for loading into PostgreSQL through DuckDB's postgres extension.
pub struct PostgresStrategy {
    postgres_uri: String,
    schema_name: String,
    table_name: String,
}

impl PostgresStrategy {
    pub fn new(postgres_uri: &str, schema_name: &str, table_name: &str) -> Self {
        Self {
            postgres_uri: postgres_uri.to_string(),
            schema_name: schema_name.to_string(),
            table_name: table_name.to_string(),
        }
    }

    // Get the schema qualified table as Postgres sees it
    fn schema_qualified_table(&self) -> String {
        format!(
            "{}.{}",
            quote_ident(&self.schema_name),
            quote_ident(&self.table_name)
        )
    }

    // Run a statement on the Postgres side, bypassing DuckDB's dialect
    fn postgres_execute(conn: &Connection, sql: &str) -> duckdb::Result<()> {
        conn.execute_batch(&format!(
            "CALL postgres_execute({}, {});",
            quote_literal(ATTACHED_DB),
            quote_literal(sql)
        ))
    }

    fn create_table_sql(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (
                \"locId\" SERIAL PRIMARY KEY,
                \"country\" VARCHAR(6) DEFAULT '',
                \"region\" VARCHAR(6) DEFAULT '',
                \"city\" VARCHAR(32) DEFAULT '',
                \"postalCode\" VARCHAR(6) DEFAULT '',
                \"latitude\" NUMERIC(7,4) DEFAULT NULL,
                \"longitude\" NUMERIC(7,4) DEFAULT NULL,
                \"metroCode\" INTEGER DEFAULT 0,
                \"areaCode\" INTEGER DEFAULT 0
            );",
            self.schema_qualified_table()
        )
    }

    // Connection string without the password, for messages
    fn redacted_uri(&self) -> String {
        match self.postgres_uri.split_once("://") {
            Some((scheme, rest)) => format!("{scheme}://{}", redact_url_parts(rest)),
            None => self
                .postgres_uri
                .split_whitespace()
                .filter(|part| !is_password_param(part))
                .collect::<Vec<_>>()
                .join(" "),
        }
    }
}

fn is_password_param(param: &str) -> bool {
    param.to_ascii_lowercase().starts_with("password=")
}

// Strip the password from `user:password@host/db?password=...` URL forms
fn redact_url_parts(rest: &str) -> String {
    let authority_end = rest.find(|c: char| c == '/' || c == '?').unwrap_or(rest.len());
    let (authority, tail) = rest.split_at(authority_end);

    let authority = match authority.rsplit_once('@') {
        Some((userinfo, host)) => {
            let user = userinfo.split(':').next().unwrap_or_default();
            if user.is_empty() {
                host.to_string()
            } else {
                format!("{user}@{host}")
            }
        }
        None => authority.to_string(),
    };

    let tail = match tail.split_once('?') {
        Some((path, query)) => {
            let query = query
                .split('&')
                .filter(|param| !is_password_param(param))
                .collect::<Vec<_>>()
                .join("&");
            if query.is_empty() {
                path.to_string()
            } else {
                format!("{path}?{query}")
            }
        }
        None => tail.to_string(),
    };

    format!("{authority}{tail}")
}

impl TargetProcessor for PostgresStrategy {
    fn describe(&self) -> String {
        format!("PostgreSQL '{}'", self.redacted_uri())
    }

    fn connect(&self) -> Result<Connection> {
        let connection_error = |e: duckdb::Error| LoadError::Connection {
            target: self.describe(),
            source: e.into(),
        };

        let conn = Connection::open_in_memory().map_err(connection_error)?;
        conn.execute_batch("INSTALL postgres; LOAD postgres;")
            .map_err(connection_error)?;
        conn.execute_batch(&format!(
            "ATTACH {} AS {} (TYPE POSTGRES);",
            quote_literal(&self.postgres_uri),
            ATTACHED_DB
        ))
        .map_err(connection_error)?;
        Ok(conn)
    }

    fn prepare_target(&self, conn: &Connection) -> Result<()> {
        let create_schema_sql = format!(
            "CREATE SCHEMA IF NOT EXISTS {};",
            quote_ident(&self.schema_name)
        );
        Self::postgres_execute(conn, &create_schema_sql).map_err(|e| LoadError::Schema {
            step: SchemaStep::CreateDatabase,
            source: e.into(),
        })?;

        Self::postgres_execute(conn, &self.create_table_sql()).map_err(|e| LoadError::Schema {
            step: SchemaStep::CreateTable,
            source: e.into(),
        })?;

        let truncate_sql = format!("TRUNCATE {};", self.schema_qualified_table());
        Self::postgres_execute(conn, &truncate_sql).map_err(|e| LoadError::Schema {
            step: SchemaStep::Truncate,
            source: e.into(),
        })?;

        // DuckDB caches the attached catalog; refresh it so the new table is visible
        conn.execute_batch("CALL pg_clear_cache();")
            .map_err(|e| LoadError::Schema {
                step: SchemaStep::CreateTable,
                source: e.into(),
            })?;

        info!(table = %self.schema_qualified_table(), "Prepared empty location table in PostgreSQL");
        Ok(())
    }

    fn qualified_table(&self) -> String {
        format!("{}.{}", ATTACHED_DB, self.schema_qualified_table())
    }
}
