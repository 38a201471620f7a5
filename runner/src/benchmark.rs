use crate::{
    config::{Arguments, BenchmarkMode, BenchmarkPlan, ConfigErrors},
    database::{ConnectionError, ReportSink},
    executors::{
        local::execute_process,
        server::{ChildServer, Escalation, ServerGuard},
        ExecutorError,
    },
    ingest::{load_results, IngestorError, ResultRow},
    report::{ReportError, ReportWriter},
};
use std::{fs, io::Write, thread};
use thiserror::Error;
use tracing::{info, instrument};

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Invalid configuration")]
    Config(#[from] ConfigErrors),
    #[error("External command failed")]
    Executor(#[from] ExecutorError),
    #[error("Failed to read benchmark results")]
    Ingestor(#[from] IngestorError),
    #[error("Failed to write report")]
    Report(#[from] ReportError),
    #[error("Failed to store results")]
    Connection(#[from] ConnectionError),
    #[error("Failed to prepare server data directory")]
    DataDir(#[from] std::io::Error),
}

impl RunnerError {
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Config(error) => error.exit_code(),
            _ => 1,
        }
    }
}

/// Create `<workdir>/data` and initialize it unless the server catalog already exists
pub fn prepare_data_dir(plan: &BenchmarkPlan) -> Result<(), RunnerError> {
    let data_dir = plan.server_cwd.join("data");

    if !data_dir.is_dir() {
        info!("Creating data directory {}", data_dir.display());
        fs::create_dir_all(&data_dir)?;
    }

    if !data_dir.join("mapd_data").is_dir() {
        info!("INITIALIZING DATA DIRECTORY");
        execute_process(&plan.initdb, plan.command_timeout)?;
    }

    Ok(())
}

/// One import/benchmark cycle for a fragment size, returns the number of result rows
#[instrument(skip_all, fields(fragment_size = ?fragment_size))]
pub fn execute_benchmark<W: Write>(
    plan: &BenchmarkPlan,
    fragment_size: Option<u64>,
    report: &mut ReportWriter<W>,
    mut sink: Option<&mut ReportSink>,
) -> Result<usize, RunnerError> {
    let fs = fragment_size.unwrap_or(0);

    let benchmark = match (&plan.import, plan.mode) {
        (Some(import), BenchmarkMode::Dataset) => {
            let import = match fragment_size {
                Some(size) => import.with_option("--fragment-size", size),
                None => import.clone(),
            };

            info!("IMPORT COMMAND LINE: {import}");
            execute_process(&import, plan.command_timeout)?;

            plan.benchmark.clone()
        }
        _ => plan.benchmark.with_option("--fragment_size", fs),
    };

    info!("BENCHMARK COMMAND LINE: {benchmark}");
    execute_process(&benchmark, plan.command_timeout)?;

    let results = load_results(&plan.results_file)?;

    for result in results.iter() {
        let row = ResultRow {
            datafiles: plan.datafiles,
            fragment_size: fs,
            result,
        };

        report.write(&row)?;

        if let Some(sink) = sink.as_deref_mut() {
            sink.submit(&row)?;
        }
    }

    Ok(results.len())
}

/// Run the whole benchmark: data directory, sink, server, every fragment size, teardown
pub fn run(arguments: &Arguments) -> Result<(), RunnerError> {
    let plan = arguments.plan()?;
    let sink_config = arguments.sink_config()?;

    prepare_data_dir(&plan)?;

    let mut sink = match &sink_config {
        Some(config) => Some(ReportSink::connect(config)?),
        None => None,
    };

    let _server = ServerGuard::new(ChildServer::start(&plan.server)?, Escalation::default());

    // the server has to open its port before the first command connects
    thread::sleep(plan.startup_delay);

    let mut report = ReportWriter::create(&plan.report)?;

    for fragment_size in plan.fragment_sizes.iter().copied() {
        match fragment_size {
            Some(size) => info!("RUNNING WITH FRAGMENT SIZE {size}"),
            None => info!("RUNNING WITH DEFAULT FRAGMENT SIZE"),
        }

        let rows = execute_benchmark(&plan, fragment_size, &mut report, sink.as_mut())?;
        info!(rows, "Finished benchmark");
    }

    info!("Report written to {}", plan.report.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executors::CommandLine;
    use pretty_assertions::assert_eq;
    use std::{path::Path, time::Duration};

    const WRITE_RESULTS: &str = r#"printf '%s ' "$@" > benchmark_args.txt
printf '[{"name": "q1", "results": {"query_exec_min": 1, "query_total_min": 2, "query_exec_max": 3, "query_total_max": 4, "query_exec_avg": 2, "query_total_avg": 3, "query_error_info": null}}]' > benchmark.json"#;

    fn plan(dir: &Path, mode: BenchmarkMode) -> BenchmarkPlan {
        let import = CommandLine::new("sh")
            .args(["-c", r#"printf '%s ' "$@" > import_args.txt"#, "import"])
            .cwd(dir);

        BenchmarkPlan {
            mode,
            server: CommandLine::new("sleep").arg("30"),
            server_cwd: dir.to_path_buf(),
            initdb: CommandLine::new("sh")
                .args(["-c", r#"mkdir -p "$3/mapd_data""#, "initdb"])
                .args(["-f", "--data"])
                .arg(dir.join("data").to_string_lossy()),
            import: (mode == BenchmarkMode::Dataset).then_some(import),
            benchmark: CommandLine::new("sh")
                .args(["-c", WRITE_RESULTS, "benchmark"])
                .cwd(dir),
            results_file: dir.join("benchmark.json"),
            datafiles: 3,
            fragment_sizes: vec![None],
            report: dir.join("report.csv"),
            startup_delay: Duration::ZERO,
            command_timeout: Some(Duration::from_secs(10)),
        }
    }

    fn report_rows(writer: ReportWriter<Vec<u8>>) -> Vec<String> {
        String::from_utf8(writer.into_inner().unwrap())
            .unwrap()
            .lines()
            .skip(1)
            .map(str::to_owned)
            .collect()
    }

    #[test]
    fn synthetic_appends_fragment_size_to_benchmark() {
        let dir = tempfile::tempdir().unwrap();
        let plan = plan(dir.path(), BenchmarkMode::Synthetic);
        let mut report = ReportWriter::new(Vec::new()).unwrap();

        let rows = execute_benchmark(&plan, Some(1000), &mut report, None).unwrap();

        assert_eq!(rows, 1);
        assert_eq!(
            fs::read_to_string(dir.path().join("benchmark_args.txt")).unwrap(),
            "--fragment_size 1000 "
        );
        assert_eq!(report_rows(report), vec!["3,1000,q1,1,2,3,4,2,3,"]);
    }

    #[test]
    fn dataset_import_uses_default_fragment_size() {
        let dir = tempfile::tempdir().unwrap();
        let plan = plan(dir.path(), BenchmarkMode::Dataset);
        let mut report = ReportWriter::new(Vec::new()).unwrap();

        execute_benchmark(&plan, None, &mut report, None).unwrap();

        assert_eq!(
            fs::read_to_string(dir.path().join("import_args.txt")).unwrap(),
            " "
        );
        assert_eq!(
            fs::read_to_string(dir.path().join("benchmark_args.txt")).unwrap(),
            " "
        );
        assert_eq!(report_rows(report), vec!["3,0,q1,1,2,3,4,2,3,"]);
    }

    #[test]
    fn dataset_import_receives_fragment_size() {
        let dir = tempfile::tempdir().unwrap();
        let plan = plan(dir.path(), BenchmarkMode::Dataset);
        let mut report = ReportWriter::new(Vec::new()).unwrap();

        execute_benchmark(&plan, Some(64), &mut report, None).unwrap();

        assert_eq!(
            fs::read_to_string(dir.path().join("import_args.txt")).unwrap(),
            "--fragment-size 64 "
        );
    }

    #[test]
    fn data_dir_is_initialized_once() {
        let dir = tempfile::tempdir().unwrap();
        let plan = plan(dir.path(), BenchmarkMode::Synthetic);

        prepare_data_dir(&plan).unwrap();
        assert!(dir.path().join("data").join("mapd_data").is_dir());

        // a second run must not call initdb again
        let plan = BenchmarkPlan {
            initdb: CommandLine::new("false"),
            ..plan
        };
        prepare_data_dir(&plan).unwrap();
    }

    #[test]
    fn failing_benchmark_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let plan = BenchmarkPlan {
            benchmark: CommandLine::new("sh").args(["-c", "exit 2"]),
            ..plan(dir.path(), BenchmarkMode::Synthetic)
        };
        let mut report = ReportWriter::new(Vec::new()).unwrap();

        let error = execute_benchmark(&plan, Some(1), &mut report, None).unwrap_err();

        assert!(matches!(
            error,
            RunnerError::Executor(ExecutorError::NonZeroExit { status: 2, .. })
        ));
        assert_eq!(error.exit_code(), 1);
    }
}
