//! Dataset benchmarks and the run sequence shared by all of them.

pub mod census;
pub mod plasticc;
pub mod santander;

use crate::{
    backend::ExecutionContext,
    config::{BenchmarkName, ConfigErrors, RunParameters},
    engine::{duckdb::DuckDbEngine, polars::PolarsEngine, Engine, EngineError},
    ml::MlError,
    pipeline::TableSpec,
    report::{ReportError, RunReport, DATAFRAME, QUERY_ENGINE},
    timer::Measurements,
    validation,
};
use polars::prelude::{DataFrame, PolarsError};
use std::{path::Path, time::Instant};
use thiserror::Error;
use tracing::{info, instrument, warn};

#[derive(Error, Debug)]
pub enum BenchError {
    #[error("Configuration Error")]
    Config(#[from] ConfigErrors),
    #[error("Engine Error")]
    Engine(#[from] EngineError),
    #[error("ML Error")]
    Ml(#[from] MlError),
    #[error("Polars Error")]
    Polars(#[from] PolarsError),
    #[error("Report Error")]
    Report(#[from] ReportError),
}

/// Output of the ETL stage on one backend
pub struct Etl<P> {
    /// results compared between the backends
    pub frames: Vec<DataFrame>,
    pub times: Measurements,
    /// ML input prepared during ETL
    pub prepared: P,
}

pub struct MlOutcome {
    pub times: Measurements,
    pub scores: Measurements,
}

/// One dataset: its ETL on any engine and its ML stage
pub trait Benchmark {
    type Prepared;

    fn etl(
        &self,
        engine: &mut dyn Engine,
        parameters: &RunParameters,
    ) -> Result<Etl<Self::Prepared>, BenchError>;

    fn ml(
        &self,
        etl: &Etl<Self::Prepared>,
        parameters: &RunParameters,
    ) -> Result<MlOutcome, BenchError>;

    /// column both results are sorted by before validation
    fn sort_key(&self) -> Option<&'static str> {
        None
    }
}

/// Load a table and add the elapsed time to `t_readcsv`
pub(crate) fn load_timed(
    engine: &mut dyn Engine,
    name: &str,
    path: &Path,
    spec: &TableSpec,
    times: &mut Measurements,
) -> Result<(), EngineError> {
    let start = Instant::now();
    engine.load_table(name, path, spec)?;
    times.add("t_readcsv", start.elapsed());

    Ok(())
}

#[instrument(skip_all, fields(backend = %engine.label()))]
fn run_backend<B: Benchmark>(
    bench: &B,
    engine: &mut dyn Engine,
    parameters: &RunParameters,
    report: &mut RunReport,
    slot: usize,
) -> Result<Vec<DataFrame>, BenchError> {
    let label = engine.label();

    let etl = bench.etl(engine, parameters)?;
    let etl_times = etl.times.clone().with_backend(label.clone());
    print!("{etl_times}");
    report.etl[slot] = Some(etl_times);

    if parameters.ml {
        let outcome = bench.ml(&etl, parameters)?;

        let times = outcome.times.with_backend(label.clone());
        let scores = outcome.scores.with_backend(label);
        print!("{times}{scores}");

        report.ml[slot] = Some(times);
        report.scores[slot] = Some(scores);
    }

    Ok(etl.frames)
}

fn run_benchmark<B: Benchmark>(
    bench: &B,
    parameters: &RunParameters,
    context: &ExecutionContext,
) -> Result<RunReport, BenchError> {
    let mut report = RunReport::default();

    let query_frames = if parameters.query_engine {
        let mut engine = DuckDbEngine::open(&parameters.database)?;
        Some(run_backend(bench, &mut engine, parameters, &mut report, QUERY_ENGINE)?)
    } else {
        None
    };

    let mut engine = PolarsEngine::new(context.clone());
    let frames = run_backend(bench, &mut engine, parameters, &mut report, DATAFRAME)?;

    match (parameters.validation, query_frames) {
        (true, Some(query_frames)) => {
            let mut equal = true;

            for (expected, actual) in query_frames.iter().zip(&frames) {
                let result = validation::compare(expected, actual, bench.sort_key())?;
                print!("{result}");

                if !result.is_equal() {
                    warn!(mismatches = result.mismatches.len(), "Backends disagree");
                    equal = false;
                }
            }

            report.validation = Some(equal);

            if let [Some(expected), Some(actual)] = &report.scores {
                let result = validation::compare_scores(expected, actual);
                print!("Scores: {result}");

                if !result.is_equal() {
                    warn!(mismatches = result.mismatches.len(), "Backend scores disagree");
                }
                report.scores_equal = Some(result.is_equal());
            }
        }
        (true, None) => warn!("Validation needs the query engine, skipping"),
        (false, _) => {}
    }

    Ok(report)
}

/// Run the selected benchmark on the query engine (unless disabled) and on the
/// dataframe backend
pub fn run(parameters: &RunParameters, context: &ExecutionContext) -> Result<RunReport, BenchError> {
    info!(bench = %parameters.bench, data = %parameters.data_file.display(), "Starting benchmark");

    match parameters.bench {
        BenchmarkName::Census => run_benchmark(&census::Census, parameters, context),
        BenchmarkName::Plasticc => run_benchmark(&plasticc::Plasticc, parameters, context),
        BenchmarkName::Santander => run_benchmark(&santander::Santander, parameters, context),
    }
}
