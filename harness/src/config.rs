use crate::backend::DataFrameMode;
use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::{
    fmt::{self, Display},
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum ConfigErrors {
    #[error("Unknown dataframe mode {0}, expected eager, lazy or streaming")]
    UnknownMode(String),
    #[error("Dataframe backend is already bound to {bound}, can not rebind to {requested}")]
    BackendAlreadyBound {
        bound: DataFrameMode,
        requested: DataFrameMode,
    },
    #[error("Failed to read configuration file {path}")]
    ReadConfig {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse configuration file")]
    ParseConfig(#[from] serde_yaml::Error),
    #[error("Data file not found: {0}")]
    DataFileNotFound(PathBuf),
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum BenchmarkName {
    Census,
    Plasticc,
    Santander,
}

impl Display for BenchmarkName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Census => f.write_str("census"),
            Self::Plasticc => f.write_str("plasticc"),
            Self::Santander => f.write_str("santander"),
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    version,
    about = "Time ETL and ML stages of a dataset benchmark on a dataframe and a query engine backend"
)]
pub struct Arguments {
    /// Benchmark to run
    #[arg(long, value_enum)]
    pub bench: BenchmarkName,
    /// Dataset CSV file, the directory with the four CSV files for plasticc
    #[arg(short = 'f', long)]
    pub data_file: PathBuf,
    /// Dataframe execution mode: eager, lazy or streaming
    #[arg(long, default_value = "eager")]
    pub mode: String,

    /// Skip the query engine backend
    #[arg(long)]
    pub no_query_engine: bool,
    /// Skip the ML stage
    #[arg(long)]
    pub no_ml: bool,
    /// Skip comparing the ETL output of both backends
    #[arg(long)]
    pub no_validation: bool,

    /// Query engine database file, `:memory:` for an in-memory database
    #[arg(long, default_value = ":memory:")]
    pub database: String,
    /// Table the dataset is imported into, the benchmark's default if unset
    #[arg(long)]
    pub table: Option<String>,
    /// Do not delete the existing query engine database
    #[arg(long)]
    pub dnd: bool,
    /// Do not import the dataset, the tables have to exist already
    #[arg(long)]
    pub dni: bool,

    /// Spill directory for streaming execution
    #[arg(long)]
    pub temp_dir: Option<PathBuf>,
    /// Memory cap in bytes, forces out-of-core streaming execution
    #[arg(long)]
    pub memory_limit: Option<u64>,
    /// Memory budget in GiB used to size the plasticc test set
    #[arg(long, default_value_t = 16.0)]
    pub gpu_memory: f64,

    /// Optional YAML file overriding ML and query engine settings
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Write the timing and score report as JSON
    #[arg(long)]
    pub results_json: Option<PathBuf>,
}

/// Overrides for the ML parameter set of a benchmark
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MlOverrides {
    pub runs: Option<usize>,
    pub test_size: Option<f64>,
    pub random_state: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DuckDbOverrides {
    pub threads: Option<usize>,
    /// e.g. `8GB`
    pub memory_limit: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HarnessConfig {
    #[serde(default)]
    pub ml: MlOverrides,
    #[serde(default)]
    pub duckdb: DuckDbOverrides,
}

impl HarnessConfig {
    pub fn parse(content: &str) -> Result<Self, ConfigErrors> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigErrors> {
        let content = fs::read_to_string(path).map_err(|source| ConfigErrors::ReadConfig {
            path: path.to_path_buf(),
            source,
        })?;

        info!("Loaded configuration from {}", path.display());

        Self::parse(&content)
    }
}

/// Query engine connection settings
#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseSettings {
    pub path: String,
    pub table: Option<String>,
    pub delete_old_database: bool,
    pub create_new_table: bool,
    pub threads: Option<usize>,
    pub memory_limit: Option<String>,
}

/// Everything a benchmark needs besides the execution context
#[derive(Debug, Clone)]
pub struct RunParameters {
    pub bench: BenchmarkName,
    pub data_file: PathBuf,
    pub query_engine: bool,
    pub ml: bool,
    pub validation: bool,
    pub database: DatabaseSettings,
    pub gpu_memory: f64,
    pub ml_overrides: MlOverrides,
}

impl Arguments {
    pub fn mode(&self) -> Result<DataFrameMode, ConfigErrors> {
        self.mode.parse()
    }

    pub fn parameters(&self) -> Result<RunParameters, ConfigErrors> {
        if !self.data_file.exists() {
            return Err(ConfigErrors::DataFileNotFound(self.data_file.clone()));
        }

        let config = match &self.config {
            Some(path) => HarnessConfig::load(path)?,
            None => HarnessConfig::default(),
        };

        Ok(RunParameters {
            bench: self.bench,
            data_file: self.data_file.clone(),
            query_engine: !self.no_query_engine,
            ml: !self.no_ml,
            validation: !self.no_validation,
            database: DatabaseSettings {
                path: self.database.clone(),
                table: self.table.clone(),
                delete_old_database: !self.dnd,
                create_new_table: !self.dni,
                threads: config.duckdb.threads,
                memory_limit: config.duckdb.memory_limit,
            },
            gpu_memory: self.gpu_memory,
            ml_overrides: config.ml,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_overrides() {
        let config = HarnessConfig::parse(
            "ml:\n  runs: 5\n  random_state: 1\nduckdb:\n  threads: 4\n  memory_limit: 2GB\n",
        )
        .unwrap();

        assert_eq!(
            config,
            HarnessConfig {
                ml: MlOverrides {
                    runs: Some(5),
                    test_size: None,
                    random_state: Some(1),
                },
                duckdb: DuckDbOverrides {
                    threads: Some(4),
                    memory_limit: Some("2GB".to_owned()),
                },
            }
        );
    }

    #[test]
    fn rejects_unknown_fields() {
        assert!(matches!(
            HarnessConfig::parse("ml:\n  rounds: 5\n"),
            Err(ConfigErrors::ParseConfig(_))
        ));
    }

    #[test]
    fn flags_are_inverted_into_parameters() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("census.csv");
        std::fs::write(&data, "").unwrap();

        let arguments = Arguments::parse_from([
            "etlbench",
            "--bench",
            "census",
            "-f",
            data.to_str().unwrap(),
            "--no-ml",
            "--dni",
        ]);
        let parameters = arguments.parameters().unwrap();

        assert!(!parameters.ml);
        assert!(parameters.query_engine);
        assert!(parameters.validation);
        assert!(parameters.database.delete_old_database);
        assert!(!parameters.database.create_new_table);
        assert_eq!(parameters.database.path, ":memory:");
    }

    #[test]
    fn missing_data_file_is_rejected() {
        let arguments = Arguments::parse_from([
            "etlbench",
            "--bench",
            "santander",
            "-f",
            "/nonexistent/train.csv",
        ]);

        assert!(matches!(
            arguments.parameters(),
            Err(ConfigErrors::DataFileNotFound(_))
        ));
    }
}
