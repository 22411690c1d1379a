//! Spawning and terminating the supervised server process.

use std::collections::BTreeMap;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};

use super::TerminateOutcome;

/// Tracing target for forwarded server output.
pub const SERVER_OUTPUT_TARGET: &str = "seq_llm::server_output";

/// Error type for process spawning operations.
#[derive(thiserror::Error, Debug)]
pub enum SpawnError {
    /// The binary was not found.
    #[error("executable not found")]
    NotFound,
    /// Permission denied when spawning.
    #[error("permission denied")]
    PermissionDenied,
    /// Other I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SpawnError {
    /// Create a `SpawnError` from an I/O error, classifying common cases.
    fn from_io(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound,
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied,
            _ => Self::Io(err),
        }
    }
}

/// Render a command line for logs and error messages.
#[must_use]
pub fn display_command(command: &[String]) -> String {
    command
        .iter()
        .map(|arg| shell_escape::escape(arg.as_str().into()).into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

/// A server process launched and owned by a supervisor.
#[derive(Debug)]
pub struct ManagedProcess {
    child: Child,
    pid: u32,
    port: u16,
}

impl ManagedProcess {
    /// Spawn `command` exactly as given.
    ///
    /// The child inherits this process's environment plus `env`; `PORT` is
    /// set to `port` unless either already defines it. Output is forwarded
    /// to tracing. The child is killed if the handle is dropped.
    ///
    /// # Errors
    ///
    /// Returns `SpawnError` if the process fails to spawn.
    pub fn spawn(
        command: &[String],
        port: u16,
        env: &BTreeMap<String, String>,
    ) -> Result<Self, SpawnError> {
        let Some((program, args)) = command.split_first() else {
            return Err(SpawnError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty command",
            )));
        };

        let mut cmd = Command::new(program);
        cmd.args(args)
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if !env.contains_key("PORT") && std::env::var_os("PORT").is_none() {
            cmd.env("PORT", port.to_string());
        }

        let mut child = cmd.spawn().map_err(SpawnError::from_io)?;
        let Some(pid) = child.id() else {
            return Err(SpawnError::Io(std::io::Error::other(
                "process exited before its pid could be read",
            )));
        };

        if let Some(stdout) = child.stdout.take() {
            forward_output(stdout, pid, "stdout");
        }
        if let Some(stderr) = child.stderr.take() {
            forward_output(stderr, pid, "stderr");
        }

        Ok(Self {
            child,
            pid,
            port,
        })
    }

    #[must_use]
    pub fn pid(&self) -> u32 {
        self.pid
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Wait for the process to exit.
    ///
    /// # Errors
    ///
    /// Returns an error if waiting fails.
    pub async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// Attempt graceful termination with a timeout.
    ///
    /// On Unix, sends SIGTERM first, then SIGKILL after the timeout.
    /// On other platforms, falls back to immediate kill.
    ///
    /// # Errors
    ///
    /// Returns an error if termination fails.
    pub async fn graceful_terminate(&mut self, timeout: Duration) -> std::io::Result<TerminateOutcome> {
        if self.child.try_wait()?.is_some() {
            return Ok(TerminateOutcome::AlreadyGone);
        }

        #[cfg(unix)]
        {
            self.graceful_terminate_unix(timeout).await
        }

        #[cfg(not(unix))]
        {
            let _ = timeout;
            self.child.kill().await.map(|()| TerminateOutcome::Killed)
        }
    }

    #[cfg(unix)]
    async fn graceful_terminate_unix(&mut self, timeout: Duration) -> std::io::Result<TerminateOutcome> {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let nix_pid = Pid::from_raw(i32::try_from(self.pid).unwrap_or(i32::MAX));
        let _ = kill(nix_pid, Signal::SIGTERM);

        match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(Ok(_)) => Ok(TerminateOutcome::Graceful),
            Ok(Err(e)) => Err(e),
            Err(_) => {
                tracing::warn!(pid = self.pid, "Server ignored SIGTERM, killing");
                self.child.kill().await.map(|()| TerminateOutcome::Killed)
            }
        }
    }
}

/// Forward each line of a child's output stream to tracing.
fn forward_output<R>(stream: R, pid: u32, stream_name: &'static str)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    tracing::debug!(target: SERVER_OUTPUT_TARGET, pid, stream = stream_name, "{line}");
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::trace!(pid, stream = stream_name, error = %e, "Server output closed");
                    break;
                }
            }
        }
    });
}
