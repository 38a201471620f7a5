use crate::config::ConfigErrors;
use once_cell::sync::OnceCell;
use std::{
    env,
    fmt::{self, Display},
    path::PathBuf,
    str::FromStr,
};
use tracing::{info, warn};

/// How the dataframe backend executes a pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataFrameMode {
    /// every step is materialized before the next one runs
    Eager,
    /// the pipeline is one optimized plan, collected once
    Lazy,
    /// the plan runs on the streaming engine and may spill to disk
    Streaming,
}

impl FromStr for DataFrameMode {
    type Err = ConfigErrors;

    fn from_str(mode: &str) -> Result<Self, Self::Err> {
        match mode.to_ascii_lowercase().as_str() {
            "eager" | "pandas" => Ok(Self::Eager),
            "lazy" | "modin_on_ray" => Ok(Self::Lazy),
            "streaming" | "modin_on_dask" => Ok(Self::Streaming),
            _ => Err(ConfigErrors::UnknownMode(mode.to_owned())),
        }
    }
}

impl Display for DataFrameMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Eager => f.write_str("eager"),
            Self::Lazy => f.write_str("lazy"),
            Self::Streaming => f.write_str("streaming"),
        }
    }
}

static BOUND_MODE: OnceCell<DataFrameMode> = OnceCell::new();

/// Immutable backend settings, created once and passed to everything that runs pipelines
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionContext {
    pub mode: DataFrameMode,
    pub temp_dir: PathBuf,
    pub memory_limit: Option<u64>,
}

impl ExecutionContext {
    /// A context without any process-wide setup
    pub fn new(mode: DataFrameMode, temp_dir: Option<PathBuf>, memory_limit: Option<u64>) -> Self {
        Self {
            mode,
            temp_dir: temp_dir.unwrap_or_else(|| PathBuf::from("/tmp")),
            memory_limit,
        }
    }

    /// Bind the process to `mode`. Binding the same mode again is allowed, a different
    /// mode fails with `ConfigErrors::BackendAlreadyBound`.
    pub fn bind(
        mode: DataFrameMode,
        temp_dir: Option<PathBuf>,
        memory_limit: Option<u64>,
    ) -> Result<Self, ConfigErrors> {
        bind_once(&BOUND_MODE, Self::new(mode, temp_dir, memory_limit))
    }

    pub fn label(&self) -> String {
        format!("Polars {}", self.mode)
    }

    fn apply_environment(&self) {
        match self.mode {
            DataFrameMode::Eager | DataFrameMode::Lazy => {
                info!("Running on Polars in {} mode", self.mode)
            }
            DataFrameMode::Streaming => {
                env::set_var("POLARS_TEMP_DIR", &self.temp_dir);

                if let Some(limit) = self.memory_limit {
                    env::set_var("POLARS_FORCE_OOC", "1");
                    warn!(limit, "Memory limit set, forcing out-of-core streaming");
                }

                info!(
                    "Running on Polars streaming engine with temp directory {}",
                    self.temp_dir.display()
                );
            }
        }
    }
}

fn bind_once(
    guard: &OnceCell<DataFrameMode>,
    context: ExecutionContext,
) -> Result<ExecutionContext, ConfigErrors> {
    let mut first = false;
    let bound = *guard.get_or_init(|| {
        first = true;
        context.mode
    });

    if bound != context.mode {
        return Err(ConfigErrors::BackendAlreadyBound {
            bound,
            requested: context.mode,
        });
    }

    if first {
        context.apply_environment();
    }

    Ok(context)
}
