use super::{insert_statement, ConnectionError, SinkRow, SCRIPT_NAME};
use crate::config::SinkConfig;
use mysql::{prelude::Queryable, Conn, OptsBuilder};
use tracing::info;

pub struct MySqlSink {
    connection: Conn,
    insert: String,
    commit: String,
}

fn create_table(table: &str) -> String {
    format!(
        "create table if not exists {table} (
    id BIGINT UNSIGNED NOT NULL AUTO_INCREMENT PRIMARY KEY,
    FilesNumber INT UNSIGNED NOT NULL,
    FragmentSize BIGINT UNSIGNED NOT NULL,
    BenchName VARCHAR(500) NOT NULL,
    BestExecTimeMS BIGINT UNSIGNED,
    BestTotalTimeMS BIGINT UNSIGNED,
    WorstExecTimeMS BIGINT UNSIGNED,
    WorstTotalTimeMS BIGINT UNSIGNED,
    AverageExecTimeMS BIGINT UNSIGNED,
    AverageTotalTimeMS BIGINT UNSIGNED,
    ScriptName VARCHAR(500) NOT NULL,
    CommitHash VARCHAR(500) NOT NULL
)"
    )
}

impl MySqlSink {
    pub fn connect(config: &SinkConfig) -> Result<Self, ConnectionError> {
        let options = OptsBuilder::new()
            .ip_or_hostname(Some(config.host.as_str()))
            .tcp_port(config.port)
            .user(Some(config.user.as_str()))
            .pass(Some(config.password.as_str()))
            .db_name(Some(config.database.as_str()));

        let mut connection = Conn::new(options)?;
        connection.query_drop(create_table(&config.table))?;

        info!(host = %config.host, database = %config.database, "Connected to MySQL");

        Ok(Self {
            connection,
            insert: insert_statement(&config.table),
            commit: config.commit.clone(),
        })
    }

    pub fn submit(&mut self, row: &SinkRow) -> Result<(), ConnectionError> {
        let [best_exec, best_total, worst_exec, worst_total, avg_exec, avg_total] = row.timings;

        self.connection.exec_drop(
            &self.insert,
            (
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
                self.commit.as_str(),
            ),
        )?;

        Ok(())
    }
}
