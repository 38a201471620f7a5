use crate::{collector::Collector, executors::CommandLine};
use clap::{Parser, ValueEnum};
use std::{
    fmt::{self, Display},
    fs::File,
    io::Error,
    os::unix::fs::MetadataExt,
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;
use tracing::{info, warn};

// check if a file is executable
pub fn check_executable(path: &Path) -> Result<bool, ConfigErrors> {
    if !path.is_file() {
        Err(ConfigErrors::FileNotFound(path.to_path_buf()))
    } else {
        match File::open(path).map(|file| file.metadata()) {
            Ok(Ok(metadata)) => Ok((metadata.mode() & 0o111) != 0),
            Ok(Err(e)) | Err(e) => Err(ConfigErrors::MetadataNotFound(e)),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigErrors {
    #[error(
        "For synthetic type of benchmark the following parameters are mandatory: \
         --synthetic-query, --num-fragments and --fragment-size."
    )]
    MissingSyntheticArguments,
    #[error(
        "For dataset type of benchmark the following parameters are mandatory: \
         --import-file, --table-schema-file and --queries-dir and --fragment-size is optional."
    )]
    MissingDatasetArguments,
    #[error("--db-table parameter is mandatory to store results in a database")]
    MissingReportTable,
    #[error("Import file pattern was invalid")]
    InvalidGlobs(#[from] globset::Error),
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),
    #[error("Metadata not found")]
    MetadataNotFound(#[from] Error),
}

impl ConfigErrors {
    /// process exit code used when the run is aborted with this error
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::MissingSyntheticArguments | Self::MissingDatasetArguments => 3,
            Self::MissingReportTable => 4,
            _ => 1,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum BenchmarkMode {
    Synthetic,
    Dataset,
}

/// Query groups understood by the synthetic benchmark script
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyntheticQuery {
    #[value(name = "BaselineHash")]
    BaselineHash,
    #[value(name = "MultiStep")]
    MultiStep,
    #[value(name = "NonGroupedAgg")]
    NonGroupedAgg,
    #[value(name = "PerfectHashMultiCol")]
    PerfectHashMultiCol,
    #[value(name = "PerfectHashSingleCol")]
    PerfectHashSingleCol,
    #[value(name = "Sort")]
    Sort,
}

impl Display for SyntheticQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::BaselineHash => "BaselineHash",
            Self::MultiStep => "MultiStep",
            Self::NonGroupedAgg => "NonGroupedAgg",
            Self::PerfectHashMultiCol => "PerfectHashMultiCol",
            Self::PerfectHashSingleCol => "PerfectHashSingleCol",
            Self::Sort => "Sort",
        };

        f.write_str(name)
    }
}

/// Database flavours results can be stored in
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum SinkKind {
    Mysql,
    Sqlite,
    Duckdb,
}

impl Display for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mysql => f.write_str("mysql"),
            Self::Sqlite => f.write_str("sqlite"),
            Self::Duckdb => f.write_str("duckdb"),
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    version,
    about = "Run an arbitrary database server benchmark and submit report values to a database"
)]
pub struct Arguments {
    /// Report file name
    #[arg(short = 'r', long, default_value = "report.csv")]
    pub report: PathBuf,
    /// Path to the directory with the benchmark scripts
    #[arg(long = "benchmarks-path", alias = "path")]
    pub benchmarks_path: PathBuf,

    /// Path to the database server executable
    #[arg(short = 'e', long)]
    pub executable: PathBuf,
    /// Server working directory, the parent of the executable's directory by default.
    /// The data directory is created in this location.
    #[arg(short = 'w', long)]
    pub workdir: Option<PathBuf>,
    /// TCP port number to run the server on
    #[arg(short = 'o', long, default_value_t = 62274)]
    pub port: u16,
    #[arg(long, default_value_t = 62278)]
    pub http_port: u16,
    #[arg(long, default_value_t = 62279)]
    pub calcite_port: u16,
    /// User name to use on the database server
    #[arg(short = 'u', long, default_value = "admin")]
    pub user: String,
    /// User password to use on the database server
    #[arg(short = 'p', long, default_value = "HyperInteractive")]
    pub passwd: String,
    /// Database name to use on the database server
    #[arg(short = 'n', long, default_value = "omnisci")]
    pub name: String,
    /// Name of table to import data to. This table is dropped before and after the import test.
    #[arg(short = 't', long)]
    pub import_table_name: String,

    /// Benchmark run label
    #[arg(short = 'l', long)]
    pub label: String,
    /// Number of iterations per query
    #[arg(short = 'i', long, value_parser = clap::value_parser!(u32).range(1..))]
    pub iterations: u32,
    /// Benchmark mode, synthetic requires --synthetic-query, --num-fragments and
    /// --fragment-size, dataset requires --import-file, --table-schema-file and --queries-dir
    #[arg(short = 'm', long, value_enum)]
    pub mode: BenchmarkMode,

    /// Fragment size to use for created tables, may be given multiple times
    #[arg(long = "fragment-size", alias = "fs")]
    pub fragment_size: Vec<u64>,

    /// Number of fragments to generate for the synthetic benchmark
    #[arg(long = "num-fragments", alias = "nf")]
    pub num_fragments: Option<u64>,
    /// Synthetic benchmark query group
    #[arg(long = "synthetic-query", alias = "sq", value_enum)]
    pub synthetic_query: Option<SyntheticQuery>,

    /// Path or pattern of the files to import, `{a,b}` alternatives and wildcards are expanded
    #[arg(short = 'f', long)]
    pub import_file: Option<String>,
    /// Path to local file with the CREATE TABLE statement for the import table
    #[arg(short = 'c', long)]
    pub table_schema_file: Option<PathBuf>,
    /// Path to the directory with query files
    #[arg(short = 'd', long)]
    pub queries_dir: Option<PathBuf>,

    /// Host name of the reporting database server
    #[arg(long, default_value = "localhost")]
    pub db_server: String,
    /// Port number of the reporting database server
    #[arg(long, default_value_t = 3306)]
    pub db_port: u16,
    /// Username for the reporting database, results are only stored when this is set
    #[arg(long, default_value = "")]
    pub db_user: String,
    #[arg(long, default_value = "omniscidb")]
    pub db_pass: String,
    /// Database name, or file path for the embedded sinks
    #[arg(long, default_value = "omniscidb")]
    pub db_name: String,
    /// Table to store the results of this benchmark in
    #[arg(long)]
    pub db_table: Option<String>,
    #[arg(long, value_enum, default_value_t = SinkKind::Mysql)]
    pub db_kind: SinkKind,
    /// Commit hash recorded with the results
    #[arg(long, default_value = "1234567890123456789012345678901234567890")]
    pub commit: String,

    /// Interpreter used to launch the benchmark scripts
    #[arg(long, default_value = "python3")]
    pub python: String,
    /// Seconds to wait for the server to open its port
    #[arg(long, default_value_t = 5)]
    pub startup_delay: u64,
    /// Seconds an import or benchmark command may run, unlimited when unset
    #[arg(long)]
    pub command_timeout: Option<u64>,
}

/// Reporting sink connection parameters, only present when a user was configured
#[derive(Debug, Clone)]
pub struct SinkConfig {
    pub kind: SinkKind,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub table: String,
    pub commit: String,
}

/// Everything the benchmark loop needs, resolved from the arguments
#[derive(Debug, Clone)]
pub struct BenchmarkPlan {
    pub mode: BenchmarkMode,
    pub server: CommandLine,
    pub server_cwd: PathBuf,
    pub initdb: CommandLine,
    pub import: Option<CommandLine>,
    pub benchmark: CommandLine,
    pub results_file: PathBuf,
    pub datafiles: usize,
    /// `None` runs once with the server's default fragment size
    pub fragment_sizes: Vec<Option<u64>>,
    pub report: PathBuf,
    pub startup_delay: Duration,
    pub command_timeout: Option<Duration>,
}

impl Arguments {
    pub fn server_cwd(&self) -> PathBuf {
        match &self.workdir {
            Some(workdir) => workdir.clone(),
            None => self
                .executable
                .parent()
                .and_then(Path::parent)
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(".")),
        }
    }

    /// validate the reporting arguments, `None` if results should not be stored
    pub fn sink_config(&self) -> Result<Option<SinkConfig>, ConfigErrors> {
        if self.db_user.is_empty() {
            return Ok(None);
        }

        let table = self
            .db_table
            .clone()
            .ok_or(ConfigErrors::MissingReportTable)?;

        Ok(Some(SinkConfig {
            kind: self.db_kind,
            host: self.db_server.clone(),
            port: self.db_port,
            user: self.db_user.clone(),
            password: self.db_pass.clone(),
            database: self.db_name.clone(),
            table,
            commit: self.commit.clone(),
        }))
    }

    /// Check the mode specific arguments and build all command lines
    pub fn plan(&self) -> Result<BenchmarkPlan, ConfigErrors> {
        match check_executable(&self.executable) {
            Ok(true) => {}
            Ok(false) => warn!(
                "Server executable {} is not executable, this might cause problems",
                self.executable.to_string_lossy()
            ),
            Err(e) => warn!(
                "Failed to determine if {} is an executable: {e}",
                self.executable.to_string_lossy()
            ),
        }

        let server_cwd = self.server_cwd();
        let data_dir = server_cwd.join("data");
        let port = self.port.to_string();

        let server = CommandLine::new(self.executable.to_string_lossy())
            .args(["data", "--port", port.as_str()])
            .args(["--http-port".to_owned(), self.http_port.to_string()])
            .args(["--calcite-port".to_owned(), self.calcite_port.to_string()])
            .args(["--config", "omnisci.conf"])
            .cwd(&server_cwd);

        let initdb_executable = self
            .executable
            .parent()
            .map(|parent| parent.join("initdb"))
            .unwrap_or_else(|| PathBuf::from("initdb"));
        let initdb = CommandLine::new(initdb_executable.to_string_lossy()).args([
            "-f".to_owned(),
            "--data".to_owned(),
            data_dir.to_string_lossy().into_owned(),
        ]);

        let fragment_sizes = if self.fragment_size.is_empty() {
            vec![None]
        } else {
            self.fragment_size.iter().copied().map(Some).collect()
        };

        let script = |name: &str| {
            self.benchmarks_path
                .join(name)
                .to_string_lossy()
                .into_owned()
        };

        let (import, benchmark, results_file, datafiles) = match self.mode {
            BenchmarkMode::Synthetic => {
                let (Some(query), Some(fragments), false) = (
                    self.synthetic_query,
                    self.num_fragments,
                    self.fragment_size.is_empty(),
                ) else {
                    return Err(ConfigErrors::MissingSyntheticArguments);
                };

                let benchmark = CommandLine::new(self.python.as_str())
                    .arg(script("run_synthetic_benchmark.py"))
                    .args(["--user", self.user.as_str(), "--password", self.passwd.as_str()])
                    .args(["--server", "localhost", "--port", port.as_str(), "--dest_port", port.as_str()])
                    .args(["--name", self.name.as_str(), "--table_name", self.import_table_name.as_str()])
                    .args(["--label", self.label.as_str()])
                    .args(["--iterations".to_owned(), self.iterations.to_string()])
                    .arg("--print_results")
                    .args(["--query".to_owned(), query.to_string()])
                    .args(["--num_fragments".to_owned(), fragments.to_string()])
                    .args([
                        "--data_dir".to_owned(),
                        data_dir.to_string_lossy().into_owned(),
                    ])
                    .args(["--gpu_label", "CPU", "--result_dir", "synthetic_results"])
                    .cwd(&self.benchmarks_path);

                let results_file = self
                    .benchmarks_path
                    .join("synthetic_results")
                    .join(self.label.as_str())
                    .join("CPU")
                    .join("Benchmarks")
                    .join(format!("{query}.json"));

                (None, benchmark, results_file, 0)
            }
            BenchmarkMode::Dataset => {
                let (Some(import_file), Some(schema_file), Some(queries_dir)) = (
                    self.import_file.as_ref(),
                    self.table_schema_file.as_ref(),
                    self.queries_dir.as_ref(),
                ) else {
                    return Err(ConfigErrors::MissingDatasetArguments);
                };

                let datafiles = Collector::load(import_file)?.count();
                info!("Number of datafiles found: {datafiles}");

                let import = CommandLine::new(self.python.as_str())
                    .arg(script("run_benchmark_import.py"))
                    .args(["-u", self.user.as_str(), "-p", self.passwd.as_str()])
                    .args(["-s", "localhost", "-o", port.as_str(), "-n", self.name.as_str()])
                    .args(["-t", self.import_table_name.as_str(), "-l", self.label.as_str()])
                    .args(["-f", import_file.as_str()])
                    .args(["-c".to_owned(), schema_file.to_string_lossy().into_owned()])
                    .args(["-e", "output", "-v", "--no-drop-table-after"]);

                let benchmark = CommandLine::new(self.python.as_str())
                    .arg(script("run_benchmark.py"))
                    .args(["-u", self.user.as_str(), "-p", self.passwd.as_str()])
                    .args(["-s", "localhost", "-o", port.as_str(), "-n", self.name.as_str()])
                    .args(["-t", self.import_table_name.as_str(), "-l", self.label.as_str()])
                    .args(["-d".to_owned(), queries_dir.to_string_lossy().into_owned()])
                    .args(["-i".to_owned(), self.iterations.to_string()])
                    .args(["-e", "file_json", "-j", "benchmark.json", "-v"])
                    .cwd(&self.benchmarks_path);

                let results_file = self.benchmarks_path.join("benchmark.json");

                (Some(import), benchmark, results_file, datafiles)
            }
        };

        Ok(BenchmarkPlan {
            mode: self.mode,
            server,
            server_cwd,
            initdb,
            import,
            benchmark,
            results_file,
            datafiles,
            fragment_sizes,
            report: self.report.clone(),
            startup_delay: Duration::from_secs(self.startup_delay),
            command_timeout: self.command_timeout.map(Duration::from_secs),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(extra: &[&str]) -> Arguments {
        let mut args = vec![
            "run-server-benchmark",
            "--benchmarks-path",
            "/opt/bench",
            "-e",
            "/opt/server/bin/omnisci_server",
            "-t",
            "trips",
            "-l",
            "nightly",
            "-i",
            "5",
        ];
        args.extend_from_slice(extra);

        Arguments::parse_from(args)
    }

    #[test]
    fn single_iteration_is_accepted_zero_is_not() {
        let base = [
            "run-server-benchmark",
            "--benchmarks-path",
            "/opt/bench",
            "-e",
            "/opt/server/bin/omnisci_server",
            "-t",
            "trips",
            "-l",
            "nightly",
            "-m",
            "synthetic",
        ];

        let one = Arguments::try_parse_from(base.iter().chain(&["-i", "1"])).unwrap();
        assert_eq!(one.iterations, 1);
        assert!(Arguments::try_parse_from(base.iter().chain(&["-i", "0"])).is_err());
    }

    #[test]
    fn synthetic_requires_query_fragments_and_size() {
        let arguments = parse(&["-m", "synthetic", "--synthetic-query", "Sort"]);
        let error = arguments.plan().unwrap_err();

        assert!(matches!(error, ConfigErrors::MissingSyntheticArguments));
        assert_eq!(error.exit_code(), 3);
    }

    #[test]
    fn dataset_requires_import_arguments() {
        let arguments = parse(&["-m", "dataset", "-f", "/data/trips.csv"]);
        let error = arguments.plan().unwrap_err();

        assert!(matches!(error, ConfigErrors::MissingDatasetArguments));
        assert_eq!(error.exit_code(), 3);
    }

    #[test]
    fn report_user_requires_table() {
        let arguments = parse(&["-m", "dataset", "--db-user", "bench"]);
        let error = arguments.sink_config().unwrap_err();

        assert!(matches!(error, ConfigErrors::MissingReportTable));
        assert_eq!(error.exit_code(), 4);
    }

    #[test]
    fn no_report_user_disables_sink() {
        let arguments = parse(&["-m", "dataset"]);

        assert!(arguments.sink_config().unwrap().is_none());
    }

    #[test]
    fn synthetic_plan_uses_query_results_file() {
        let arguments = parse(&[
            "-m",
            "synthetic",
            "--synthetic-query",
            "PerfectHashSingleCol",
            "--num-fragments",
            "4",
            "--fragment-size",
            "1000",
            "--fragment-size",
            "2000",
        ]);
        let plan = arguments.plan().unwrap();

        assert_eq!(plan.datafiles, 0);
        assert!(plan.import.is_none());
        assert_eq!(plan.fragment_sizes, vec![Some(1000), Some(2000)]);
        assert_eq!(
            plan.results_file,
            PathBuf::from(
                "/opt/bench/synthetic_results/nightly/CPU/Benchmarks/PerfectHashSingleCol.json"
            )
        );
        assert_eq!(plan.server_cwd, PathBuf::from("/opt/server"));
        assert!(plan
            .benchmark
            .arguments()
            .iter()
            .any(|argument| argument == "PerfectHashSingleCol"));
    }

    #[test]
    fn default_fragment_size_runs_once() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("trips.csv");
        std::fs::write(&data, "a,b\n").unwrap();

        let pattern = data.to_string_lossy().into_owned();
        let arguments = parse(&[
            "-m",
            "dataset",
            "-f",
            pattern.as_str(),
            "-c",
            "/opt/bench/schema.sql",
            "-d",
            "/opt/bench/queries",
        ]);
        let plan = arguments.plan().unwrap();

        assert_eq!(plan.fragment_sizes, vec![None]);
        assert_eq!(plan.datafiles, 1);
        assert_eq!(plan.results_file, PathBuf::from("/opt/bench/benchmark.json"));
    }
}
