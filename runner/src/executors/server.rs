use super::{CommandLine, ExecutorError};
use nix::{
    sys::signal::{kill, Signal},
    unistd::Pid,
};
use std::{
    io::{BufRead, BufReader, Read},
    process::{Child, Stdio},
    thread,
    time::Duration,
};
use tracing::{debug, info, warn};

/// Signals needed to shut down a server process
pub trait ServerProcess {
    fn interrupt(&mut self) -> Result<(), ExecutorError>;
    fn kill(&mut self) -> Result<(), ExecutorError>;
    fn terminate(&mut self) -> Result<(), ExecutorError>;
    /// collect the exit status once all signals have been sent
    fn reap(&mut self) {}
}

/// Delays between the teardown signals
#[derive(Debug, Clone, Copy)]
pub struct Escalation {
    pub after_interrupt: Duration,
    pub after_kill: Duration,
}

impl Default for Escalation {
    fn default() -> Self {
        Self {
            after_interrupt: Duration::from_secs(2),
            after_kill: Duration::from_secs(1),
        }
    }
}

/// Send interrupt, kill and terminate in this order, sleeping in between.
/// This is best effort: a failed signal is logged and the next one is sent regardless.
pub fn teardown<P: ServerProcess>(process: &mut P, escalation: Escalation) {
    info!("TERMINATING SERVER");

    if let Err(error) = process.interrupt() {
        warn!(error = ?error, "Failed to interrupt server");
    }
    thread::sleep(escalation.after_interrupt);

    if let Err(error) = process.kill() {
        warn!(error = ?error, "Failed to kill server");
    }
    thread::sleep(escalation.after_kill);

    if let Err(error) = process.terminate() {
        warn!(error = ?error, "Failed to terminate server");
    }

    process.reap();
}

/// Owns a running server and tears it down when dropped, no matter how the
/// benchmark loop ended
pub struct ServerGuard<P: ServerProcess> {
    process: P,
    escalation: Escalation,
}

impl<P: ServerProcess> ServerGuard<P> {
    pub fn new(process: P, escalation: Escalation) -> Self {
        Self {
            process,
            escalation,
        }
    }
}

impl<P: ServerProcess> Drop for ServerGuard<P> {
    fn drop(&mut self) {
        teardown(&mut self.process, self.escalation);
    }
}

/// Server started as a child process, its output is echoed by background threads
#[derive(Debug)]
pub struct ChildServer {
    child: Child,
}

impl ChildServer {
    pub fn start(command_line: &CommandLine) -> Result<Self, ExecutorError> {
        info!("SERVER COMMAND LINE: {command_line}");

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

        // the echo threads are detached, they end once the pipes close
        if let Some(stdout) = child.stdout.take() {
            thread::spawn(move || echo(stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            thread::spawn(move || echo(stderr));
        }

        debug!(pid = child.id(), "Started server");

        Ok(Self { child })
    }

    fn signal(&self, signal: Signal) -> Result<(), ExecutorError> {
        kill(Pid::from_raw(self.child.id() as i32), signal)
            .map_err(|errno| ExecutorError::ChildError(errno.into()))
    }
}

impl ServerProcess for ChildServer {
    fn interrupt(&mut self) -> Result<(), ExecutorError> {
        self.signal(Signal::SIGINT)
    }

    fn kill(&mut self) -> Result<(), ExecutorError> {
        Ok(self.child.kill()?)
    }

    fn terminate(&mut self) -> Result<(), ExecutorError> {
        self.signal(Signal::SIGTERM)
    }

    fn reap(&mut self) {
        match self.child.wait() {
            Ok(status) => debug!("Server exited with {status}"),
            Err(error) => warn!(error = ?error, "Failed to wait for server"),
        }
    }
}

fn echo<R: Read>(stream: R) {
    for line in BufReader::new(stream).lines() {
        match line {
            Ok(line) => println!("SERVER>> {}", line.trim()),
            Err(_) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::{cell::RefCell, rc::Rc};

    #[derive(Clone, Default)]
    struct Recorder {
        signals: Rc<RefCell<Vec<&'static str>>>,
    }

    impl ServerProcess for Recorder {
        fn interrupt(&mut self) -> Result<(), ExecutorError> {
            self.signals.borrow_mut().push("interrupt");
            Ok(())
        }

        fn kill(&mut self) -> Result<(), ExecutorError> {
            self.signals.borrow_mut().push("kill");
            // a failing step must not stop the escalation
            Err(ExecutorError::MissingOutput)
        }

        fn terminate(&mut self) -> Result<(), ExecutorError> {
            self.signals.borrow_mut().push("terminate");
            Ok(())
        }

        fn reap(&mut self) {
            self.signals.borrow_mut().push("reap");
        }
    }

    fn instant() -> Escalation {
        Escalation {
            after_interrupt: Duration::ZERO,
            after_kill: Duration::ZERO,
        }
    }

    #[test]
    fn guard_escalates_after_success() {
        let recorder = Recorder::default();

        let result: Result<u32, ExecutorError> = {
            let _guard = ServerGuard::new(recorder.clone(), instant());
            Ok(3)
        };

        assert_eq!(result.unwrap(), 3);
        assert_eq!(
            *recorder.signals.borrow(),
            vec!["interrupt", "kill", "terminate", "reap"]
        );
    }

    #[test]
    fn guard_escalates_after_failure() {
        let recorder = Recorder::default();

        let run = || -> Result<(), ExecutorError> {
            let _guard = ServerGuard::new(recorder.clone(), instant());
            Err(ExecutorError::NonZeroExit {
                status: 1,
                output: String::new(),
            })
        };

        assert!(run().is_err());
        assert_eq!(
            *recorder.signals.borrow(),
            vec!["interrupt", "kill", "terminate", "reap"]
        );
    }

    #[test]
    fn child_server_is_stopped() {
        let command = CommandLine::new("sleep").arg("30");
        let mut server = ChildServer::start(&command).unwrap();

        teardown(&mut server, instant());

        assert!(server.child.try_wait().unwrap().is_some());
    }
}
