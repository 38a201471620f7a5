use clap::Parser;
use etlbench::{
    backend::ExecutionContext,
    config::Arguments,
    datasets::{self, BenchError},
};
use std::{error::Error, process::ExitCode};
use tracing::error;
use tracing_subscriber::EnvFilter;

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
}

fn run(arguments: &Arguments) -> Result<(), BenchError> {
    let parameters = arguments.parameters()?;
    let context = ExecutionContext::bind(
        arguments.mode()?,
        arguments.temp_dir.clone(),
        arguments.memory_limit,
    )?;

    let report = datasets::run(&parameters, &context)?;

    if let Some(path) = &arguments.results_json {
        report.write(path)?;
    }

    Ok(())
}

fn main() -> ExitCode {
    init_logging();

    let arguments = Arguments::parse();

    match run(&arguments) {
        Ok(()) => ExitCode::SUCCESS,
        Err(run_error) => {
            error!(error = ?run_error, "Benchmark failed");
            eprintln!("{run_error}");

            let mut source = run_error.source();
            while let Some(cause) = source {
                eprintln!("  caused by: {cause}");
                source = cause.source();
            }

            ExitCode::FAILURE
        }
    }
}
