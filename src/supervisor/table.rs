//! Access to the OS process and socket tables.
//!
//! Everything the supervisor needs to know about processes it does not own
//! goes through [`ProcessTable`], so reclaim decisions can be exercised
//! against a fake table in tests.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use sysinfo::{Pid, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System, UpdateKind};

use super::health::deadline_after;
use super::ProcessIdentity;

/// Interval between liveness checks while waiting for a process to exit.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A socket listening on a port, with its owner if one could be found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortOwner {
    /// Owning process; `None` when the socket could not be mapped to a PID.
    pub pid: Option<u32>,
    pub local_addr: Option<SocketAddr>,
}

impl PortOwner {
    #[must_use]
    pub fn pid(pid: u32) -> Self {
        Self {
            pid: Some(pid),
            local_addr: None,
        }
    }

    #[must_use]
    pub fn unidentified() -> Self {
        Self {
            pid: None,
            local_addr: None,
        }
    }
}

/// How a termination request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminateOutcome {
    /// The process was gone before any signal was delivered.
    AlreadyGone,
    /// The process exited within the grace period.
    Graceful,
    /// The grace period elapsed and the process was force-killed.
    Killed,
}

/// Read and signal processes the supervisor does not hold a handle to.
#[async_trait]
pub trait ProcessTable: Send + Sync {
    /// Sockets in LISTEN state on `port`.
    fn listeners(&self, port: u16) -> Vec<PortOwner>;

    /// Best-effort metadata for `pid`; `None` if the process is gone.
    fn inspect(&self, pid: u32) -> Option<ProcessIdentity>;

    /// Whether `pid` is a live (non-zombie) process.
    fn exists(&self, pid: u32) -> bool;

    /// Ask `pid` to exit, force-killing it once `grace` elapses.
    async fn terminate(&self, pid: u32, grace: Duration) -> std::io::Result<TerminateOutcome>;
}

/// [`ProcessTable`] backed by the host operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProcessTable;

impl SystemProcessTable {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn refresh(pid: u32, kind: ProcessRefreshKind) -> System {
        let mut system = System::new();
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[Pid::from_u32(pid)]),
            true,
            kind,
        );
        system
    }

    async fn wait_for_exit(&self, pid: u32, grace: Duration) -> bool {
        let deadline = deadline_after(tokio::time::Instant::now(), grace);
        loop {
            if !self.exists(pid) {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(EXIT_POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl ProcessTable for SystemProcessTable {
    fn listeners(&self, port: u16) -> Vec<PortOwner> {
        #[cfg(target_os = "linux")]
        {
            linux::listeners(port)
        }

        #[cfg(not(target_os = "linux"))]
        {
            tracing::debug!(port, "Socket ownership lookup unsupported on this platform");
            Vec::new()
        }
    }

    fn inspect(&self, pid: u32) -> Option<ProcessIdentity> {
        let kind = ProcessRefreshKind::new()
            .with_exe(UpdateKind::Always)
            .with_cmd(UpdateKind::Always);
        let system = Self::refresh(pid, kind);
        let process = system.process(Pid::from_u32(pid))?;

        let name = process.name().to_string_lossy().into_owned();
        let cmdline: Vec<String> = process
            .cmd()
            .iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect();

        Some(ProcessIdentity {
            pid,
            exe: process.exe().map(Path::to_path_buf),
            name: (!name.is_empty()).then_some(name),
            cmdline: (!cmdline.is_empty()).then_some(cmdline),
        })
    }

    fn exists(&self, pid: u32) -> bool {
        let system = Self::refresh(pid, ProcessRefreshKind::new());
        system
            .process(Pid::from_u32(pid))
            .is_some_and(|p| !matches!(p.status(), ProcessStatus::Zombie | ProcessStatus::Dead))
    }

    #[cfg(unix)]
    async fn terminate(&self, pid: u32, grace: Duration) -> std::io::Result<TerminateOutcome> {
        use nix::errno::Errno;
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid as NixPid;

        let raw = i32::try_from(pid).map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, format!("pid {pid} out of range"))
        })?;
        let nix_pid = NixPid::from_raw(raw);

        match kill(nix_pid, Signal::SIGTERM) {
            Ok(()) => {}
            Err(Errno::ESRCH) => return Ok(TerminateOutcome::AlreadyGone),
            Err(e) => return Err(e.into()),
        }

        if self.wait_for_exit(pid, grace).await {
            return Ok(TerminateOutcome::Graceful);
        }

        tracing::warn!(pid, grace_ms = grace.as_millis(), "Process ignored SIGTERM, sending SIGKILL");
        match kill(nix_pid, Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => return Err(e.into()),
        }
        if self.wait_for_exit(pid, grace).await {
            Ok(TerminateOutcome::Killed)
        } else {
            Err(still_alive(pid))
        }
    }

    #[cfg(not(unix))]
    async fn terminate(&self, pid: u32, grace: Duration) -> std::io::Result<TerminateOutcome> {
        let system = Self::refresh(pid, ProcessRefreshKind::new());
        let Some(process) = system.process(Pid::from_u32(pid)) else {
            return Ok(TerminateOutcome::AlreadyGone);
        };
        if !process.kill() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                format!("failed to kill pid {pid}"),
            ));
        }
        if self.wait_for_exit(pid, grace).await {
            Ok(TerminateOutcome::Killed)
        } else {
            Err(still_alive(pid))
        }
    }
}

fn still_alive(pid: u32) -> std::io::Error {
    std::io::Error::new(
        std::io::ErrorKind::TimedOut,
        format!("pid {pid} is still running after SIGKILL"),
    )
}

#[cfg(target_os = "linux")]
mod linux {
    use std::collections::{HashMap, HashSet};

    use procfs::net::TcpState;
    use procfs::process::FDTarget;

    use super::PortOwner;

    /// Listening TCP sockets on `port` from `/proc/net/tcp{,6}`, mapped to
    /// owning PIDs through `/proc/<pid>/fd`.
    pub(super) fn listeners(port: u16) -> Vec<PortOwner> {
        let mut sockets = Vec::new();
        for table in [procfs::net::tcp(), procfs::net::tcp6()] {
            let Ok(entries) = table else { continue };
            for entry in entries {
                if matches!(entry.state, TcpState::Listen) && entry.local_address.port() == port {
                    sockets.push((entry.inode, entry.local_address));
                }
            }
        }
        if sockets.is_empty() {
            return Vec::new();
        }

        let wanted: HashSet<u64> = sockets.iter().map(|(inode, _)| *inode).collect();
        let owners = socket_owners(&wanted);

        sockets
            .into_iter()
            .map(|(inode, addr)| PortOwner {
                pid: owners.get(&inode).copied(),
                local_addr: Some(addr),
            })
            .collect()
    }

    /// Map socket inodes to the PID holding them. Processes whose fd table
    /// cannot be read are skipped.
    fn socket_owners(wanted: &HashSet<u64>) -> HashMap<u64, u32> {
        let mut owners = HashMap::new();
        let Ok(processes) = procfs::process::all_processes() else {
            return owners;
        };
        for process in processes.flatten() {
            let Ok(pid) = u32::try_from(process.pid) else {
                continue;
            };
            let Ok(fds) = process.fd() else { continue };
            for fd in fds.flatten() {
                if let FDTarget::Socket(inode) = fd.target {
                    if wanted.contains(&inode) {
                        owners.insert(inode, pid);
                    }
                }
            }
        }
        owners
    }
}
