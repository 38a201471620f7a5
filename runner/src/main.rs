mod benchmark;
mod collector;
mod config;
mod database;
mod executors;
mod ingest;
mod report;

use clap::Parser;
use config::Arguments;
use std::{error::Error, process::ExitCode};
use tracing::error;
use tracing_subscriber::EnvFilter;

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    init_logging();

    let arguments = Arguments::parse();

    match benchmark::run(&arguments) {
        Ok(()) => ExitCode::SUCCESS,
        Err(run_error) => {
            error!(error = ?run_error, "Benchmark run failed");
            eprintln!("{run_error}");

            let mut source = run_error.source();
            while let Some(cause) = source {
                eprintln!("  caused by: {cause}");
                source = cause.source();
            }

            ExitCode::from(run_error.exit_code())
        }
    }
}
