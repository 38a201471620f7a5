#[cfg(feature = "duckdb")]
pub mod duckdb;
#[cfg(feature = "mysql")]
pub mod mysql;
#[cfg(feature = "rusqlite")]
pub mod sqlite;

use crate::{
    config::{SinkConfig, SinkKind},
    ingest::{as_millis, ResultRow},
};
use thiserror::Error;
use tracing::{debug, info};

pub const SCRIPT_NAME: &str = "run-server-benchmark";

/// Result columns in insert order, the sinks add ScriptName and CommitHash after them
pub const RESULT_COLUMNS: [&str; 9] = [
    "FilesNumber",
    "FragmentSize",
    "BenchName",
    "BestExecTimeMS",
    "BestTotalTimeMS",
    "WorstExecTimeMS",
    "WorstTotalTimeMS",
    "AverageExecTimeMS",
    "AverageTotalTimeMS",
];

#[derive(Error, Debug)]
pub enum ConnectionError {
    #[cfg(feature = "mysql")]
    #[error("MySQL Error")]
    MySQL(#[from] ::mysql::Error),
    #[cfg(feature = "rusqlite")]
    #[error("SQLite Error")]
    SQLite(#[from] rusqlite::Error),
    #[cfg(feature = "duckdb")]
    #[error("DuckDB Error")]
    DuckDB(#[from] ::duckdb::Error),
    #[error("Table name {0:?} is not a plain SQL identifier")]
    InvalidTableName(String),
    #[error("Reporting sink {0} is not supported by this build")]
    UnsupportedSink(SinkKind),
}

/// A result row flattened into the values stored by every sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkRow {
    pub files_number: i64,
    pub fragment_size: i64,
    pub bench_name: String,
    /// best, worst and average exec/total times
    pub timings: [Option<i64>; 6],
}

impl From<&ResultRow<'_>> for SinkRow {
    fn from(row: &ResultRow<'_>) -> Self {
        let timings = row
            .result
            .results
            .timings()
            .map(|value| as_millis(value).and_then(|millis| i64::try_from(millis).ok()));

        Self {
            files_number: i64::try_from(row.datafiles).unwrap_or(i64::MAX),
            fragment_size: i64::try_from(row.fragment_size).unwrap_or(i64::MAX),
            bench_name: row.result.name.clone(),
            timings,
        }
    }
}

pub fn check_table_name(table: &str) -> Result<&str, ConnectionError> {
    let valid = !table.is_empty()
        && table
            .chars()
            .all(|character| character.is_ascii_alphanumeric() || character == '_');

    if valid {
        Ok(table)
    } else {
        Err(ConnectionError::InvalidTableName(table.to_owned()))
    }
}

/// `insert into <table> (...) values (?, ...)` over all result and metadata columns
pub fn insert_statement(table: &str) -> String {
    let columns = RESULT_COLUMNS
        .iter()
        .chain(["ScriptName", "CommitHash"].iter())
        .copied()
        .collect::<Vec<_>>();
    let placeholders = vec!["?"; columns.len()].join(", ");

    format!(
        "insert into {table} ({}) values ({placeholders})",
        columns.join(", ")
    )
}

/// Connected reporting database, one variant per supported flavour
pub enum ReportSink {
    #[cfg(feature = "mysql")]
    MySQL(mysql::MySqlSink),
    #[cfg(feature = "rusqlite")]
    SQLite(sqlite::SqliteSink),
    #[cfg(feature = "duckdb")]
    DuckDB(duckdb::DuckDbSink),
}

impl ReportSink {
    /// Connect and make sure the results table exists
    pub fn connect(config: &SinkConfig) -> Result<Self, ConnectionError> {
        check_table_name(&config.table)?;
        info!(kind = %config.kind, table = %config.table, "CONNECTING TO DATABASE");

        match config.kind {
            #[cfg(feature = "mysql")]
            SinkKind::Mysql => Ok(Self::MySQL(mysql::MySqlSink::connect(config)?)),
            #[cfg(feature = "rusqlite")]
            SinkKind::Sqlite => Ok(Self::SQLite(sqlite::SqliteSink::connect(config)?)),
            #[cfg(feature = "duckdb")]
            SinkKind::Duckdb => Ok(Self::DuckDB(duckdb::DuckDbSink::connect(config)?)),
            #[allow(unreachable_patterns)]
            kind => Err(ConnectionError::UnsupportedSink(kind)),
        }
    }

    pub fn submit(&mut self, row: &ResultRow) -> Result<(), ConnectionError> {
        let row = SinkRow::from(row);
        debug!("Submitting {row:?}");

        match self {
            #[cfg(feature = "mysql")]
            Self::MySQL(sink) => sink.submit(&row),
            #[cfg(feature = "rusqlite")]
            Self::SQLite(sink) => sink.submit(&row),
            #[cfg(feature = "duckdb")]
            Self::DuckDB(sink) => sink.submit(&row),
        }
    }
}
