use super::{insert_statement, ConnectionError, SinkRow, SCRIPT_NAME};
use crate::config::SinkConfig;
use rusqlite::{params, Connection};
use tracing::info;

#[derive(Debug)]
pub struct SqliteSink {
    connection: Connection,
    insert: String,
    commit: String,
}

fn create_table(table: &str) -> String {
    format!(
        "create table if not exists {table} (
    id integer primary key autoincrement,
    FilesNumber integer not null,
    FragmentSize integer not null,
    BenchName text not null,
    BestExecTimeMS integer,
    BestTotalTimeMS integer,
    WorstExecTimeMS integer,
    WorstTotalTimeMS integer,
    AverageExecTimeMS integer,
    AverageTotalTimeMS integer,
    ScriptName text not null,
    CommitHash text not null
);"
    )
}

impl SqliteSink {
    /// `--db-name` is used as the database file path
    pub fn connect(config: &SinkConfig) -> Result<Self, ConnectionError> {
        let connection = Connection::open(&config.database)?;
        connection.execute(&create_table(&config.table), [])?;

        info!(path = %config.database, "Opened SQLite results database");

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
