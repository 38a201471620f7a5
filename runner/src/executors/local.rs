use super::{CommandLine, ExecutorError};
use std::{
    io::Read,
    process::{ExitStatus, Stdio},
    thread,
    time::{Duration, Instant},
};
use tracing::{debug, info, instrument, warn};
use wait_timeout::ChildExt;

/// Captured result of a finished command
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub runtime: Duration,
    pub output: String,
    pub status: i32,
}

/// Run a command to completion, capturing stdout followed by stderr.
/// A non-zero exit status aborts with `ExecutorError::NonZeroExit`.
#[instrument(skip_all, fields(program = command_line.program()))]
pub fn execute_process(
    command_line: &CommandLine,
    timeout: Option<Duration>,
) -> Result<RunOutput, ExecutorError> {
    info!("CMD: {command_line}");

    let start = Instant::now();
    let mut child = command_line
        .command()
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| ExecutorError::Spawn {
            command: command_line.to_string(),
            source,
        })?;

    // both streams are drained concurrently so the child never blocks on a full pipe
    let stdout = drain(child.stdout.take())?;
    let stderr = drain(child.stderr.take())?;

    let status = wait(&mut child, timeout)?;
    let runtime = start.elapsed();

    let mut output = collect(stdout)?;
    output.push_str(&collect(stderr)?);
    let output = output.trim().to_owned();

    debug!(
        "Finished in {} ms | status: {}",
        runtime.as_millis(),
        status.success()
    );

    if !output.is_empty() {
        println!("{output}");
    }

    match status.code() {
        Some(0) => Ok(RunOutput {
            runtime,
            output,
            status: 0,
        }),
        // terminated by a signal
        None => Err(ExecutorError::NonZeroExit { status: -1, output }),
        Some(status) => Err(ExecutorError::NonZeroExit { status, output }),
    }
}

type Drain = thread::JoinHandle<std::io::Result<String>>;

fn drain<R: Read + Send + 'static>(stream: Option<R>) -> Result<Drain, ExecutorError> {
    let mut stream = stream.ok_or(ExecutorError::MissingOutput)?;

    Ok(thread::spawn(move || {
        let mut buffer = String::new();
        stream.read_to_string(&mut buffer).map(|_| buffer)
    }))
}

fn collect(handle: Drain) -> Result<String, ExecutorError> {
    Ok(handle.join().map_err(|_| ExecutorError::MissingOutput)??)
}

fn wait(
    child: &mut std::process::Child,
    timeout: Option<Duration>,
) -> Result<ExitStatus, ExecutorError> {
    match timeout {
        None => Ok(child.wait()?),
        Some(limit) => match child.wait_timeout(limit)? {
            Some(status) => Ok(status),
            None => {
                warn!("Command ran into timeout after {} s", limit.as_secs());

                // child hasn't exited yet
                child.kill()?;
                child.wait()?;

                Err(ExecutorError::Timeout(limit.as_secs()))
            }
        },
    }
}
