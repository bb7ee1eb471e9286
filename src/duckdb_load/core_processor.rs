use std::time::Instant;

use duckdb::{params, Connection};
use tracing::{debug, info, info_span};

use crate::config::LoadConfig;
use crate::duckdb_load::batch_loader::{BatchLoader, LoadSummary, LocationSink};
use crate::duckdb_load::target_processor::{target_for, TargetProcessor};
use crate::error::{BackendError, Result};
use crate::file_load::{RecordSource, SkipRows};
use crate::location::LocationRecord;

/// The one backend connection a run goes through.
/// Dropping it closes the connection, which also discards any transaction left open.
pub struct DuckDbSession {
    conn: Connection,
    insert_sql: String,
}

impl DuckDbSession {
    pub fn open(target: &dyn TargetProcessor) -> Result<Self> {
        let conn = target.connect()?;
        debug!(target = %target.describe(), "Connected");
        Ok(Self {
            conn,
            insert_sql: target.insert_statement(),
        })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }
}

impl LocationSink for DuckDbSession {
    fn begin(&mut self) -> std::result::Result<(), BackendError> {
        self.conn.execute_batch("BEGIN TRANSACTION;")?;
        Ok(())
    }

    fn insert(&mut self, record: &LocationRecord) -> std::result::Result<(), BackendError> {
        let mut stmt = self.conn.prepare_cached(&self.insert_sql)?;
        stmt.execute(params![
            record.location_id,
            record.country.as_str(),
            record.region.as_str(),
            record.city.as_str(),
            record.postal_code.as_str(),
            record.latitude,
            record.longitude,
            record.metro_code,
            record.area_code,
        ])?;
        Ok(())
    }

    fn commit(&mut self) -> std::result::Result<(), BackendError> {
        self.conn.execute_batch("COMMIT;")?;
        Ok(())
    }

    fn rollback(&mut self) -> std::result::Result<(), BackendError> {
        self.conn.execute_batch("ROLLBACK;")?;
        Ok(())
    }
}

// Main processor struct that runs one load from file to table
pub struct CoreProcessor {
    config: LoadConfig,
    target: Box<dyn TargetProcessor>,
}

impl CoreProcessor {
    pub fn new(config: LoadConfig) -> Result<Self> {
        config.validate()?;
        let target = target_for(&config);
        Ok(Self { config, target })
    }

    // The input is checked before anything touches the store
    fn launch_core_processor(&self) -> Result<LoadSummary> {
        let started = Instant::now();
        let source = RecordSource::open(&self.config.file_path, &self.config.source)?;

        let mut session = DuckDbSession::open(self.target.as_ref())?;
        self.target.prepare_target(session.conn())?;

        let rows = SkipRows::new(source, self.config.skip_rows);
        let mut summary = BatchLoader::new(&mut session, self.config.batch_size).load(rows)?;
        summary.elapsed = started.elapsed();
        Ok(summary)
    }
}

/// Load a location file into the configured target, replacing the table's contents.
pub fn process_file(config: LoadConfig) -> Result<LoadSummary> {
    let processor = CoreProcessor::new(config)?;
    let span = info_span!(
        "load",
        file = %processor.config.file_path.display(),
        target = %processor.target.describe()
    );
    let _guard = span.enter();

    info!(
        batch_size = processor.config.batch_size,
        skip_rows = processor.config.skip_rows,
        "Starting load"
    );
    let summary = processor.launch_core_processor()?;
    info!(
        rows = summary.rows_loaded,
        batches = summary.batches_committed,
        seconds = summary.elapsed.as_secs_f64(),
        "Load complete"
    );
    Ok(summary)
}
