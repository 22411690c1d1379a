//! Supervisor for one local inference server.
//!
//! The supervisor connects the port probe, the reclaim policy, the process
//! spawner and the health poller into a single start/stop lifecycle. Each
//! instance owns at most one child process; lifecycle methods take
//! `&mut self`, so one instance can never run two of them at once.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::config::SupervisorSettings;
use crate::supervisor::{
    display_command, is_occupied, HealthPoller, HealthProbe, HttpHealthProbe, IdentityMatcher,
    LifecycleStats, ManagedProcess, ProcessState, ProcessStateMachine, ProcessTable,
    PortOwner, ReclaimDecision, ReclaimMode, ReclaimPolicy, ReclaimVerdict, SpawnError,
    SystemProcessTable, TerminateOutcome,
};

/// Default timeout for graceful process termination.
pub const DEFAULT_TERMINATE_TIMEOUT: Duration = Duration::from_secs(3);

/// Default time allowed for a freshly spawned server to become healthy.
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(120);

/// Default readiness timeout when replacing a server this supervisor ran.
pub const DEFAULT_RESTART_TIMEOUT: Duration = Duration::from_secs(60);

/// Default first delay between health polls.
pub const DEFAULT_HEALTH_INTERVAL: Duration = Duration::from_secs(1);

/// Pause after reclaiming a port so the kernel can release the socket.
const PORT_SETTLE_DELAY: Duration = Duration::from_millis(500);

/// Host the supervised server is probed on.
const LOCAL_HOST: &str = "127.0.0.1";

/// Flags the supervisor injects itself in [`Supervisor::start_model`].
const RESERVED_FLAGS: &[&str] = &["--port", "-m", "--model"];

/// Error type for supervisor operations.
#[derive(thiserror::Error, Debug)]
pub enum SupervisorError {
    #[error("Invalid port {0}: must be between 1 and 65535")]
    InvalidPort(u16),

    #[error("Server command is empty")]
    EmptyCommand,

    #[error("Extra argument '{flag}' conflicts with a flag the supervisor sets itself")]
    ConflictingFlag { flag: String },

    #[error("Port {port} is held by {occupant}; refusing to terminate an unrecognized process")]
    PortConflict {
        port: u16,
        pid: Option<u32>,
        occupant: String,
    },

    #[error("Failed to terminate {occupant} holding port {port}: {source}")]
    ReclaimFailed {
        port: u16,
        pid: u32,
        occupant: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Port {port} is still in use after reclaiming it")]
    PortStillInUse { port: u16 },

    #[error("Failed to launch '{program}' for port {port}: {source}")]
    Spawn {
        program: String,
        port: u16,
        #[source]
        source: SpawnError,
    },

    #[error("Server pid {pid} did not become healthy on port {port} within {:.1}s", .waited.as_secs_f64())]
    ReadinessTimeout {
        port: u16,
        pid: u32,
        waited: Duration,
    },

    #[error("Server pid {pid} exited before becoming healthy on port {port} ({status})")]
    ExitedEarly {
        port: u16,
        pid: u32,
        status: String,
    },

    #[error("Interrupted while serving on port {port}")]
    Interrupted { port: u16 },

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Tunables for a [`Supervisor`].
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    pub reclaim_mode: ReclaimMode,
    pub startup_timeout: Duration,
    /// Readiness timeout used when `start` replaced a running server.
    pub restart_timeout: Duration,
    pub health_interval: Duration,
    pub stop_grace: Duration,
    pub matcher: IdentityMatcher,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            reclaim_mode: ReclaimMode::Strict,
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            restart_timeout: DEFAULT_RESTART_TIMEOUT,
            health_interval: DEFAULT_HEALTH_INTERVAL,
            stop_grace: DEFAULT_TERMINATE_TIMEOUT,
            matcher: IdentityMatcher::default(),
        }
    }
}

impl SupervisorOptions {
    /// Options from the `[supervisor]` config section. The file name of
    /// `server_binary` is added to the recognized fragments.
    #[must_use]
    pub fn from_settings(settings: &SupervisorSettings, server_binary: &Path) -> Self {
        let mut matcher = IdentityMatcher::new(&settings.recognized_binaries);
        if let Some(name) = server_binary.file_name() {
            matcher.recognize(name.to_string_lossy());
        }
        Self {
            reclaim_mode: ReclaimMode::from_strict(settings.strict_reclaim),
            startup_timeout: settings.startup_timeout(),
            restart_timeout: settings.restart_timeout(),
            health_interval: settings.health_interval(),
            stop_grace: settings.stop_grace(),
            matcher,
        }
    }
}

/// Address of a healthy server handed to scoped work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerEndpoint {
    pub port: u16,
    pub pid: u32,
    pub base_url: String,
}

/// Owns the lifecycle of one local server process.
pub struct Supervisor {
    options: SupervisorOptions,
    policy: ReclaimPolicy,
    table: Arc<dyn ProcessTable>,
    probe: Arc<dyn HealthProbe>,
    process: Option<ManagedProcess>,
    state: ProcessStateMachine,
}

impl Supervisor {
    /// Create a supervisor backed by the host process table and an HTTP
    /// health probe.
    ///
    /// # Errors
    ///
    /// Returns `SupervisorError::HttpClient` if the probe's HTTP client
    /// cannot be built.
    pub fn new(options: SupervisorOptions) -> Result<Self, SupervisorError> {
        Ok(Self::with_parts(
            options,
            Arc::new(SystemProcessTable::new()),
            Arc::new(HttpHealthProbe::new()?),
        ))
    }

    /// Create a supervisor with explicit process table and health probe.
    #[must_use]
    pub fn with_parts(
        options: SupervisorOptions,
        table: Arc<dyn ProcessTable>,
        probe: Arc<dyn HealthProbe>,
    ) -> Self {
        let policy = ReclaimPolicy::new(options.reclaim_mode, options.matcher.clone());
        Self {
            options,
            policy,
            table,
            probe,
            process: None,
            state: ProcessStateMachine::new(),
        }
    }

    #[must_use]
    pub fn state(&self) -> ProcessState {
        self.state.state()
    }

    #[must_use]
    pub fn stats(&self) -> LifecycleStats {
        self.state.stats()
    }

    #[must_use]
    pub fn options(&self) -> &SupervisorOptions {
        &self.options
    }

    /// PID of the tracked process, if any.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().map(ManagedProcess::pid)
    }

    /// Port of the tracked process, if any.
    #[must_use]
    pub fn port(&self) -> Option<u16> {
        self.process.as_ref().map(ManagedProcess::port)
    }

    /// Base URL of the tracked server, if any.
    #[must_use]
    pub fn base_url(&self) -> Option<String> {
        self.port().map(|port| format!("http://{LOCAL_HOST}:{port}"))
    }

    /// True iff a PID is tracked and that process is alive right now.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.pid().is_some_and(|pid| self.table.exists(pid))
    }

    /// Ask the reclaim policy about `port` without acting on the answer.
    ///
    /// Empty when nothing accepts connections on the port. An occupied port
    /// whose owner cannot be found yields one verdict with no PID.
    pub async fn inspect_port(&self, port: u16) -> Vec<ReclaimVerdict> {
        self.verdicts_for(port, self.pid()).await
    }

    /// Start `command` serving on `port` and wait until it is healthy.
    ///
    /// `command` is the executable followed by its arguments and is run
    /// exactly as given. Any process already tracked is stopped first.
    ///
    /// # Errors
    ///
    /// See [`SupervisorError`]. On every error no child spawned by this
    /// call is left running.
    pub async fn start(&mut self, command: Vec<String>, port: u16) -> Result<ServerEndpoint, SupervisorError> {
        self.start_with_env(command, port, BTreeMap::new()).await
    }

    /// Convenience start: `binary -m <model_path> --port <port> <extra_args>`.
    ///
    /// # Errors
    ///
    /// Returns `SupervisorError::ConflictingFlag` if `extra_args` tries to
    /// set the port or model itself; otherwise as [`Supervisor::start`].
    pub async fn start_model(
        &mut self,
        binary: &str,
        model_path: &str,
        port: u16,
        extra_args: &[String],
    ) -> Result<ServerEndpoint, SupervisorError> {
        check_extra_args(extra_args)?;
        let mut command = vec![
            binary.to_string(),
            "-m".to_string(),
            model_path.to_string(),
            "--port".to_string(),
            port.to_string(),
        ];
        command.extend(extra_args.iter().cloned());
        self.start(command, port).await
    }

    /// [`Supervisor::start`] with extra environment variables for the child.
    ///
    /// # Errors
    ///
    /// As [`Supervisor::start`].
    pub async fn start_with_env(
        &mut self,
        command: Vec<String>,
        port: u16,
        env: BTreeMap<String, String>,
    ) -> Result<ServerEndpoint, SupervisorError> {
        if port == 0 {
            return Err(SupervisorError::InvalidPort(port));
        }
        let Some(program) = command.first().cloned() else {
            return Err(SupervisorError::EmptyCommand);
        };

        let previous = self.pid();
        if previous.is_some() {
            tracing::info!(pid = ?previous, "Stopping current server before starting a new one");
            self.stop().await;
        }

        self.state.transition(ProcessState::Starting);
        tracing::info!(port, command = %display_command(&command), "Starting server");

        if let Err(e) = self.reclaim_port(port, previous).await {
            self.state.transition(ProcessState::Stopped);
            return Err(e);
        }

        let mut process = match ManagedProcess::spawn(&command, port, &env) {
            Ok(process) => process,
            Err(source) => {
                tracing::error!(port, program = %program, error = %source, "Failed to launch server");
                self.state.transition(ProcessState::Failed);
                return Err(SupervisorError::Spawn {
                    program,
                    port,
                    source,
                });
            }
        };
        let pid = process.pid();
        tracing::info!(pid, port, "Server launched, waiting for health");

        let timeout = if previous.is_some() {
            self.options.restart_timeout
        } else {
            self.options.startup_timeout
        };
        let poller = HealthPoller::new(self.probe.as_ref(), timeout, self.options.health_interval);

        let outcome = tokio::select! {
            result = poller.wait_until_ready(port) => Ok(result),
            status = process.wait() => Err(status),
        };

        match outcome {
            Ok(result) if result.ready => {
                tracing::info!(pid, port, elapsed_ms = result.elapsed.as_millis(), "Server is ready");
                self.process = Some(process);
                self.state.transition(ProcessState::Healthy);
                Ok(ServerEndpoint {
                    port,
                    pid,
                    base_url: format!("http://{LOCAL_HOST}:{port}"),
                })
            }
            Ok(result) => {
                tracing::error!(pid, port, waited_ms = result.elapsed.as_millis(), "Server never became healthy");
                self.discard(process).await;
                self.state.transition(ProcessState::Failed);
                Err(SupervisorError::ReadinessTimeout {
                    port,
                    pid,
                    waited: result.elapsed,
                })
            }
            Err(status) => {
                let status = match status {
                    Ok(status) => status.to_string(),
                    Err(e) => format!("wait failed: {e}"),
                };
                tracing::error!(pid, port, %status, "Server exited during startup");
                self.discard(process).await;
                self.state.transition(ProcessState::Failed);
                Err(SupervisorError::ExitedEarly { port, pid, status })
            }
        }
    }

    /// Stop the tracked process, if any.
    ///
    /// Sends a graceful termination signal, force-kills after the grace
    /// period, and always clears tracking. Valid in every state; a no-op
    /// when nothing is tracked.
    pub async fn stop(&mut self) {
        let Some(mut process) = self.process.take() else {
            if self.state() != ProcessState::Stopped {
                self.state.transition(ProcessState::Stopped);
            }
            return;
        };

        self.state.transition(ProcessState::Stopping);
        let pid = process.pid();
        match process.graceful_terminate(self.options.stop_grace).await {
            Ok(outcome) => tracing::info!(pid, ?outcome, "Server stopped"),
            Err(e) => tracing::warn!(pid, error = %e, "Error while stopping server"),
        }
        self.state.transition(ProcessState::Stopped);
    }

    /// Start a server, run `work` against it, and stop the server on every
    /// exit path, including Ctrl-C.
    ///
    /// # Errors
    ///
    /// Returns the start error, `SupervisorError::Interrupted` on Ctrl-C,
    /// or converts the error returned by `work`.
    pub async fn run_scoped<F, Fut, T, E>(
        &mut self,
        command: Vec<String>,
        port: u16,
        work: F,
    ) -> Result<T, E>
    where
        F: FnOnce(ServerEndpoint) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<SupervisorError>,
    {
        self.run_scoped_until(command, port, work, shutdown_signal())
            .await
    }

    /// [`Supervisor::run_scoped`] with a caller-supplied interrupt future.
    ///
    /// # Errors
    ///
    /// As [`Supervisor::run_scoped`], with `interrupt` completing in place
    /// of Ctrl-C.
    pub async fn run_scoped_until<F, Fut, T, E, I>(
        &mut self,
        command: Vec<String>,
        port: u16,
        work: F,
        interrupt: I,
    ) -> Result<T, E>
    where
        F: FnOnce(ServerEndpoint) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<SupervisorError>,
        I: Future<Output = ()>,
    {
        tokio::pin!(interrupt);

        let start = self.start(command, port);
        let endpoint = tokio::select! {
            result = start => result,
            () = &mut interrupt => Err(SupervisorError::Interrupted { port }),
        };
        let endpoint = match endpoint {
            Ok(endpoint) => endpoint,
            Err(e) => {
                self.stop().await;
                return Err(e.into());
            }
        };

        let result = tokio::select! {
            result = work(endpoint) => result,
            () = &mut interrupt => {
                tracing::warn!(port, "Interrupted, stopping server");
                Err(SupervisorError::Interrupted { port }.into())
            }
        };
        self.stop().await;
        result
    }

    async fn verdicts_for(&self, port: u16, tracked: Option<u32>) -> Vec<ReclaimVerdict> {
        if !is_occupied(LOCAL_HOST, port).await {
            return Vec::new();
        }
        let verdicts = self.policy.decide(port, self.table.as_ref(), tracked);
        if !verdicts.is_empty() {
            return verdicts;
        }
        tracing::warn!(port, "Port is occupied but its owner could not be found");
        self.policy
            .decide_for(&[PortOwner::unidentified()], self.table.as_ref(), tracked)
    }

    /// Probe `port` and clear it according to the reclaim policy.
    async fn reclaim_port(&mut self, port: u16, previous: Option<u32>) -> Result<(), SupervisorError> {
        let verdicts = self.verdicts_for(port, previous).await;
        if verdicts.is_empty() {
            return Ok(());
        }

        for verdict in &verdicts {
            tracing::info!(port, occupant = %verdict.describe(), classification = ?verdict.classification, decision = ?verdict.decision, "Reclaim decision");
        }

        if let Some(refused) = verdicts
            .iter()
            .find(|v| v.decision == ReclaimDecision::Refuse)
        {
            return Err(SupervisorError::PortConflict {
                port,
                pid: refused.pid,
                occupant: refused.describe(),
            });
        }

        let mut terminated = false;
        for verdict in &verdicts {
            match (verdict.decision, verdict.pid) {
                (ReclaimDecision::Terminate, Some(pid)) => {
                    match self.table.terminate(pid, self.options.stop_grace).await {
                        Ok(TerminateOutcome::AlreadyGone) => {}
                        Ok(outcome) => {
                            tracing::info!(port, pid, ?outcome, "Reclaimed port");
                            terminated = true;
                        }
                        Err(source) => {
                            tracing::error!(port, pid, error = %source, "Failed to terminate port occupant");
                            return Err(SupervisorError::ReclaimFailed {
                                port,
                                pid,
                                occupant: verdict.describe(),
                                source,
                            });
                        }
                    }
                }
                (ReclaimDecision::Skip, _) => {
                    tracing::warn!(port, occupant = %verdict.describe(), "Leaving unrecognized port occupant running");
                }
                _ => {}
            }
        }

        if terminated {
            tokio::time::sleep(PORT_SETTLE_DELAY).await;
            let left_running = verdicts.iter().any(|v| v.decision == ReclaimDecision::Skip);
            if !left_running && is_occupied(LOCAL_HOST, port).await {
                tracing::error!(port, "Port still accepts connections after its occupant was terminated");
                return Err(SupervisorError::PortStillInUse { port });
            }
        }
        Ok(())
    }

    /// Terminate a process that failed to start; it is never tracked.
    async fn discard(&self, mut process: ManagedProcess) {
        let pid = process.pid();
        if let Err(e) = process.graceful_terminate(self.options.stop_grace).await {
            tracing::warn!(pid, error = %e, "Failed to terminate server after failed start");
        }
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        if let Some(pid) = self.pid() {
            tracing::warn!(pid, "Supervisor dropped while tracking a server; killing it");
        }
    }
}

/// Reject extra arguments that would override `-m`/`--port`.
///
/// # Errors
///
/// Returns `SupervisorError::ConflictingFlag` naming the offending argument.
pub fn check_extra_args(extra_args: &[String]) -> Result<(), SupervisorError> {
    for arg in extra_args {
        let flag = arg.split_once('=').map_or(arg.as_str(), |(flag, _)| flag);
        if RESERVED_FLAGS.contains(&flag) {
            return Err(SupervisorError::ConflictingFlag { flag: arg.clone() });
        }
    }
    Ok(())
}

/// Resolves on Ctrl-C. If the handler cannot be installed it never resolves.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
