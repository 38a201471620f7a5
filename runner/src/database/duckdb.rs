use super::{insert_statement, ConnectionError, SinkRow, SCRIPT_NAME};
use crate::config::SinkConfig;
use duckdb::{params, Connection};
use tracing::info;

#[derive(Debug)]
pub struct DuckDbSink {
    connection: Connection,
    insert: String,
    commit: String,
}

// ref: https://duckdb.org/docs/sql/data_types/overview
fn create_table(table: &str) -> String {
    format!(
        "create table if not exists {table} (
    FilesNumber uinteger not null,
    FragmentSize ubigint not null,
    BenchName varchar not null,
    BestExecTimeMS ubigint,
    BestTotalTimeMS ubigint,
    WorstExecTimeMS ubigint,
    WorstTotalTimeMS ubigint,
    AverageExecTimeMS ubigint,
    AverageTotalTimeMS ubigint,
    ScriptName varchar not null,
    CommitHash varchar not null
);"
    )
}

impl DuckDbSink {
    /// `--db-name` is used as the database file path
    pub fn connect(config: &SinkConfig) -> Result<Self, ConnectionError> {
        let connection = Connection::open(&config.database)?;
        connection.execute_batch(&create_table(&config.table))?;

        info!(path = %config.database, "Opened DuckDB results database");

        Ok(Self {
            connection,
            insert: insert_statement(&config.table),
            commit: config.commit.clone(),
        })
    }

    pub fn submit(&mut self, row: &SinkRow) -> Result<(), ConnectionError> {
        let [best_exec, best_total, worst_exec, worst_total, avg_exec, avg_total] = row.timings;

        self.connection.prepare_cached(&self.insert)?.execute(params![
            row.files_number,
            row.fragment_size,
            row.bench_name.as_str(),
            best_exec,
            best_total,
            worst_exec,
            worst_total,
            avg_exec,
            avg_total,
            SCRIPT_NAME,
            self.commit.as_str()
        ])?;

        Ok(())
    }
}
