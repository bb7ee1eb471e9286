//! GeoLite City location loader.

use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::process;

use clap::{error::ErrorKind, Parser, ValueEnum};
use duckdb_geolite::config::{
    DEFAULT_BATCH_SIZE, DEFAULT_DATABASE, DEFAULT_SCHEMA, DEFAULT_SKIP_ROWS, DEFAULT_TABLE,
};
use duckdb_geolite::file_load::{Encoding, SourceOptions};
use duckdb_geolite::logging::{init_logging, LogConfig, LogFormat};
use duckdb_geolite::{process_file, LoadConfig, LoadError, TargetConfig};
use tracing::level_filters::LevelFilter;

#[derive(Parser, Debug)]
#[command(
    name = "duckdb-geolite",
    version,
    about = "Load the GeoLite City location CSV into DuckDB or PostgreSQL, replacing the table"
)]
struct Cli {
    /// Path to the GeoLite City location CSV (or the ZIP archive containing it).
    #[arg(value_name = "FILE")]
    file: PathBuf,

    /// DuckDB database file to load into (created if missing).
    #[arg(long, env = "GEOLITE_DATABASE", default_value = DEFAULT_DATABASE)]
    database: PathBuf,

    /// libpq connection string; when set, loads into PostgreSQL instead of DuckDB.
    #[arg(long, env = "GEOLITE_POSTGRES_URI", hide_env_values = true)]
    postgres_uri: Option<String>,

    /// PostgreSQL schema holding the table.
    #[arg(long, env = "GEOLITE_SCHEMA", default_value = DEFAULT_SCHEMA)]
    schema: String,

    /// Destination table.
    #[arg(long, env = "GEOLITE_TABLE", default_value = DEFAULT_TABLE)]
    table: String,

    /// Rows per committed transaction.
    #[arg(long, env = "GEOLITE_BATCH_SIZE", default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    /// Leading rows to discard (copyright and header lines).
    #[arg(long, env = "GEOLITE_SKIP_ROWS", default_value_t = DEFAULT_SKIP_ROWS)]
    skip_rows: usize,

    /// Field delimiter.
    #[arg(long, default_value_t = ',', value_parser = parse_ascii)]
    delimiter: char,

    /// Quote character.
    #[arg(long, default_value_t = '"', value_parser = parse_ascii)]
    quote: char,

    /// Text encoding of the input.
    #[arg(long, value_enum, default_value_t = EncodingArg::Utf8)]
    encoding: EncodingArg,

    /// More log output (default info, -v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormatArg::Compact)]
    log_format: LogFormatArg,

    /// Write logs to a file instead of stderr.
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum EncodingArg {
    Utf8,
    Latin1,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormatArg {
    Compact,
    Pretty,
    Json,
}

fn parse_ascii(value: &str) -> Result<char, String> {
    let mut chars = value.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if c.is_ascii() => Ok(c),
        _ => Err(format!("expected a single ASCII character, got {value:?}")),
    }
}

impl Cli {
    fn load_config(&self) -> LoadConfig {
        let target = match &self.postgres_uri {
            Some(uri) => TargetConfig::Postgres {
                uri: uri.clone(),
                schema: self.schema.clone(),
            },
            None => TargetConfig::DuckDb {
                path: self.database.clone(),
            },
        };
        let source = SourceOptions {
            delimiter: self.delimiter as u8,
            quote: self.quote as u8,
            encoding: match self.encoding {
                EncodingArg::Utf8 => Encoding::Utf8,
                EncodingArg::Latin1 => Encoding::Latin1,
            },
        };

        LoadConfig::new(&self.file)
            .with_target(target)
            .with_table_name(&self.table)
            .with_batch_size(self.batch_size)
            .with_skip_rows(self.skip_rows)
            .with_source(source)
    }

    fn log_config(&self) -> LogConfig {
        let level_filter = match self.verbose {
            0 => LevelFilter::INFO,
            1 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        };
        LogConfig {
            level_filter,
            use_env_filter: self.verbose == 0,
            format: match self.log_format {
                LogFormatArg::Compact => LogFormat::Compact,
                LogFormatArg::Pretty => LogFormat::Pretty,
                LogFormatArg::Json => LogFormat::Json,
            },
            with_ansi: self.log_file.is_none() && io::stderr().is_terminal(),
            log_file: self.log_file.clone(),
        }
    }
}

fn failure_lines(error: &LoadError) -> Vec<String> {
    let mut lines = vec![error.to_string()];
    if let Some(rollback) = error.rollback_failure() {
        lines.push(format!("rollback also failed: {rollback}"));
    }
    if let Some(processed) = error.rows_processed() {
        let committed = error.rows_committed().map_or_else(String::new, |committed| {
            format!(" ({committed} committed)")
        });
        lines.push(format!("load aborted after processing {processed} rows{committed}"));
    }
    lines
}

// Status lines go to stdout; diagnostics go through tracing
fn report_failure(error: &LoadError) {
    for line in failure_lines(error) {
        println!("{line}");
    }
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => e.exit(),
        Err(e) => {
            let _ = e.print();
            process::exit(LoadError::Argument(format!("{:?}", e.kind())).exit_code());
        }
    };

    if let Err(error) = init_logging(&cli.log_config()) {
        eprintln!("error: failed to initialize logging: {error}");
        process::exit(1);
    }

    let exit_code = match process_file(cli.load_config()) {
        Ok(summary) => {
            println!(
                "processed {} rows in {} seconds",
                summary.rows_loaded,
                summary.elapsed.as_secs()
            );
            0
        }
        Err(error) => {
            report_failure(&error);
            error.exit_code()
        }
    };
    process::exit(exit_code);
}
