use pyo3::prelude::*;

use crate::config::{LoadConfig, TargetConfig, DEFAULT_DATABASE, DEFAULT_SCHEMA};

/// Load a GeoLite City location file, returning `(rows_loaded, seconds)`.
#[pyfunction]
#[pyo3(signature = (file_path, table_name, database=None, postgres_uri=None, schema_name=None, batch_size=None, skip_rows=None))]
fn load_locations(
    py: Python<'_>,
    file_path: &str,
    table_name: &str,
    database: Option<&str>,
    postgres_uri: Option<&str>,
    schema_name: Option<&str>,
    batch_size: Option<usize>,
    skip_rows: Option<usize>,
) -> PyResult<(u64, f64)> {
    let target = match postgres_uri {
        Some(uri) => TargetConfig::Postgres {
            uri: uri.to_string(),
            schema: schema_name.unwrap_or(DEFAULT_SCHEMA).to_string(),
        },
        None => TargetConfig::DuckDb {
            path: database.unwrap_or(DEFAULT_DATABASE).into(),
        },
    };

    let mut config = LoadConfig::new(file_path)
        .with_target(target)
        .with_table_name(table_name);
    if let Some(batch_size) = batch_size {
        config = config.with_batch_size(batch_size);
    }
    if let Some(skip_rows) = skip_rows {
        config = config.with_skip_rows(skip_rows);
    }

    let summary = py
        .allow_threads(|| crate::duckdb_load::process_file(config))
        .map_err(|e| PyErr::new::<pyo3::exceptions::PyRuntimeError, _>(e.to_string()))?;
    Ok((summary.rows_loaded, summary.elapsed.as_secs_f64()))
}

#[pymodule]
#[pyo3(name = "duckdb_geolite")]
fn duckdb_geolite(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(load_locations, m)?)?;
    Ok(())
}
