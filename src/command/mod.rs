//! Subprocess execution with live log forwarding.
//!
//! Every external tool invocation goes through a [`CommandRunner`] so the
//! provisioning driver can be exercised against scripted outcomes. The real
//! runner streams each stdout/stderr line into the caller's [`LogSink`] while
//! also capturing it, and enforces an optional deadline by killing the child.

use std::ffi::OsString;
use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;

use shell_escape::unix::escape;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::debug;

use crate::log_sink::LogSink;

/// A fully described external command.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Invocation {
    /// Program name or path.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
    /// Extra environment variables layered over the inherited environment.
    pub envs: Vec<(String, String)>,
    /// Kill the process when it runs longer than this.
    pub timeout: Option<Duration>,
}

impl Invocation {
    /// Starts an invocation of `program` with no arguments.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    /// Appends one argument.
    #[must_use]
    pub fn arg(mut self, value: impl Into<OsString>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Appends several arguments.
    #[must_use]
    pub fn args<I, A>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<OsString>,
    {
        self.args.extend(values.into_iter().map(Into::into));
        self
    }

    /// Appends environment variables.
    #[must_use]
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.envs
            .extend(vars.into_iter().map(|(key, value)| (key.into(), value.into())));
        self
    }

    /// Sets the deadline for the process.
    #[must_use]
    pub const fn timeout(mut self, limit: Option<Duration>) -> Self {
        self.timeout = limit;
        self
    }

    /// Renders a shell-escaped command line for logging.
    #[must_use]
    pub fn command_line(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(escape(self.program.as_str().into()).into_owned());
        parts.extend(
            self.args
                .iter()
                .map(|arg| escape(arg.to_string_lossy()).into_owned()),
        );
        parts.join(" ")
    }
}

/// Result of running an external command.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code reported by the process, if available.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Whether the process was killed for exceeding its deadline.
    pub timed_out: bool,
}

impl CommandOutput {
    /// Returns `true` when the exit code equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0)) && !self.timed_out
    }

    /// Human readable exit status.
    #[must_use]
    pub fn status_text(&self) -> String {
        self.code
            .map_or_else(|| String::from("unknown"), |code| code.to_string())
    }

    /// Returns the last `lines` lines of stdout followed by stderr.
    #[must_use]
    pub fn log_tail(&self, lines: usize) -> String {
        let all = self
            .stdout
            .lines()
            .chain(self.stderr.lines())
            .collect::<Vec<_>>();
        let skip = all.len().saturating_sub(lines);
        all.into_iter().skip(skip).collect::<Vec<_>>().join("\n")
    }
}

/// Errors raised when a command cannot be run at all.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CommandError {
    /// Raised when a command cannot be spawned.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Command that failed to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when waiting on or reading from the process fails.
    #[error("failed while running {program}: {message}")]
    Io {
        /// Command being run.
        program: String,
        /// Operating system error string.
        message: String,
    },
}

/// Future returned by command runners.
pub type CommandFuture<'a> = Pin<Box<dyn Future<Output = Result<CommandOutput, CommandError>> + Send + 'a>>;

/// Abstraction over command execution to support fakes in tests.
pub trait CommandRunner {
    /// Runs the invocation, forwarding output lines to `sink` when given.
    ///
    /// A non-zero exit status or a timeout is reported through
    /// [`CommandOutput`], not as an error.
    fn run<'a>(
        &'a self,
        invocation: &'a Invocation,
        sink: Option<&'a LogSink>,
    ) -> CommandFuture<'a>;
}

/// Real command runner that streams output while capturing it.
#[derive(Clone, Copy, Debug, Default)]
pub struct StreamingCommandRunner;

impl CommandRunner for StreamingCommandRunner {
    fn run<'a>(
        &'a self,
        invocation: &'a Invocation,
        sink: Option<&'a LogSink>,
    ) -> CommandFuture<'a> {
        Box::pin(async move { run_streaming(invocation, sink.cloned()).await })
    }
}

async fn run_streaming(
    invocation: &Invocation,
    sink: Option<LogSink>,
) -> Result<CommandOutput, CommandError> {
    debug!(command = %invocation.command_line(), "spawning command");
    let program = invocation.program.clone();
    let io_error = |err: std::io::Error| CommandError::Io {
        program: program.clone(),
        message: err.to_string(),
    };

    let mut child = Command::new(&invocation.program)
        .args(&invocation.args)
        .envs(invocation.envs.iter().map(|(key, value)| (key, value)))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|err| CommandError::Spawn {
            program: invocation.program.clone(),
            message: err.to_string(),
        })?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| io_error(std::io::Error::other("stdout pipe missing")))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| io_error(std::io::Error::other("stderr pipe missing")))?;
    let stdout_task = tokio::spawn(forward_lines(stdout, sink.clone()));
    let stderr_task = tokio::spawn(forward_lines(stderr, sink));

    let (status, timed_out) = match invocation.timeout {
        Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
            Ok(status) => (Some(status.map_err(io_error)?), false),
            Err(_) => {
                child.kill().await.ok();
                (None, true)
            }
        },
        None => (Some(child.wait().await.map_err(io_error)?), false),
    };

    let join_error = |err: tokio::task::JoinError| CommandError::Io {
        program: invocation.program.clone(),
        message: err.to_string(),
    };
    let captured_stdout = stdout_task.await.map_err(join_error)?;
    let captured_stderr = stderr_task.await.map_err(join_error)?;

    Ok(CommandOutput {
        code: status.and_then(|value| value.code()),
        stdout: captured_stdout,
        stderr: captured_stderr,
        timed_out,
    })
}

async fn forward_lines<R>(reader: R, sink: Option<LogSink>) -> String
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let mut captured = String::new();
    while let Ok(Some(line)) = lines.next_line().await {
        if let Some(target) = &sink {
            target.line(&line);
        }
        captured.push_str(&line);
        captured.push('\n');
    }
    captured
}
