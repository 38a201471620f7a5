pub mod local;
pub mod server;

use std::{
    fmt::{self, Display},
    path::{Path, PathBuf},
    process::Command,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Failed to start {command}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to wait for a child process")]
    ChildError(#[from] std::io::Error),
    #[error("Command returned {status}\n{output}")]
    NonZeroExit { status: i32, output: String },
    #[error("Command did not finish within {0} s")]
    Timeout(u64),
    #[error("Output of the child process was not available")]
    MissingOutput,
}

/// An external command with its arguments and working directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    program: String,
    arguments: Vec<String>,
    cwd: Option<PathBuf>,
}

impl CommandLine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            arguments: Vec::new(),
            cwd: None,
        }
    }

    pub fn arg(mut self, argument: impl Into<String>) -> Self {
        self.arguments.push(argument.into());
        self
    }

    pub fn args<I, S>(mut self, arguments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.arguments.extend(arguments.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, cwd: impl AsRef<Path>) -> Self {
        self.cwd = Some(cwd.as_ref().to_path_buf());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arguments(&self) -> &[String] {
        &self.arguments
    }

    pub fn working_dir(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    /// a copy of this command line with `--<flag> <value>` appended
    pub fn with_option(&self, flag: &str, value: impl Display) -> Self {
        self.clone().args([flag.to_owned(), value.to_string()])
    }

    pub fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.arguments);

        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }

        command
    }
}

impl Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;

        for argument in &self.arguments {
            write!(f, " {argument}")?;
        }

        Ok(())
    }
}
