//! External process invocation.
//!
//! Every mutating action in the system (snapshot create/delete, archive
//! create/delete/compact, mount/unmount, hooks) goes through the
//! [`CommandRunner`] capability. The [`SystemRunner`] executes for real; the
//! [`DryRunRunner`] records what would have run and reports success, so the
//! decision logic downstream computes as if the action had happened.
//! Read-only queries (listings, reachability probes) use [`CommandRunner::capture`]
//! and execute in both modes.

use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Mutex;
use thiserror::Error;
use tracing::info;

/// A fully assembled command line: program, arguments, environment overrides
/// and an optional working directory.
#[derive(Debug, Clone, Default)]
pub struct CommandLine {
    program: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
    cwd: Option<PathBuf>,
}

impl CommandLine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Environment overrides applied on top of the inherited process
    /// environment.
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    fn to_tokio(&self) -> tokio::process::Command {
        let mut command = tokio::process::Command::new(&self.program);
        command.args(&self.args);
        command.envs(self.env.iter().map(|(k, v)| (k, v)));
        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }
        command.stdin(Stdio::null());
        command
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        if let Some(cwd) = &self.cwd {
            write!(f, "  # in {}", cwd.display())?;
        }
        Ok(())
    }
}

/// Errors from spawning or running an external command.
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("command `{command}` exited with {status}")]
    Failed { command: String, status: ExitStatus },
}

/// Capability for invoking external processes.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Execute a mutating command. Dry-run implementations skip it and
    /// report success.
    async fn run(&self, command: &CommandLine) -> Result<(), CommandError>;

    /// Execute a read-only command and capture its stdout. Runs for real in
    /// every mode.
    async fn capture(&self, command: &CommandLine) -> Result<String, CommandError>;
}

/// Runner backed by real processes.
#[derive(Debug, Default)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, command: &CommandLine) -> Result<(), CommandError> {
        info!(command = %command, "running command");
        let status = command
            .to_tokio()
            .status()
            .await
            .map_err(|source| CommandError::Spawn {
                command: command.to_string(),
                source,
            })?;
        if !status.success() {
            return Err(CommandError::Failed {
                command: command.to_string(),
                status,
            });
        }
        Ok(())
    }

    async fn capture(&self, command: &CommandLine) -> Result<String, CommandError> {
        info!(command = %command, "running command");
        let output = command
            .to_tokio()
            .output()
            .await
            .map_err(|source| CommandError::Spawn {
                command: command.to_string(),
                source,
            })?;
        if !output.status.success() {
            return Err(CommandError::Failed {
                command: command.to_string(),
                status: output.status,
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Runner that records mutating commands instead of executing them.
///
/// Queries still hit the real system so that listings and probes reflect the
/// actual state being decided over.
#[derive(Debug, Default)]
pub struct DryRunRunner {
    inner: SystemRunner,
    recorded: Mutex<Vec<String>>,
}

impl DryRunRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// The command lines that would have run, in order.
    pub fn recorded(&self) -> Vec<String> {
        self.recorded.lock().expect("dry-run record lock").clone()
    }
}

#[async_trait]
impl CommandRunner for DryRunRunner {
    async fn run(&self, command: &CommandLine) -> Result<(), CommandError> {
        info!(command = %command, "[dry run] skipping command");
        self.recorded
            .lock()
            .expect("dry-run record lock")
            .push(command.to_string());
        Ok(())
    }

    async fn capture(&self, command: &CommandLine) -> Result<String, CommandError> {
        self.inner.capture(command).await
    }
}
