//! Supervisor tests against a fake process table and fake health probes.

mod health_test;

use std::collections::HashMap;
use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use seq_llm::supervisor::{
    HealthProbe, PortOwner, ProcessIdentity, ProcessTable, SystemProcessTable, TerminateOutcome,
};

/// Shared, ordered record of what the fakes were asked to do.
pub type EventLog = Arc<Mutex<Vec<String>>>;

/// Ways a scripted `terminate` can go wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminateFault {
    /// The signal cannot be delivered.
    Denied,
    /// Reports success but the listener stays bound.
    Lingers,
}

/// Process table with scripted port owners.
///
/// `terminate` drops the listener it holds for that PID, which frees the
/// port exactly as killing the real owner would, unless the table was
/// scripted to fail with [`TerminateFault`].
#[derive(Default)]
pub struct FakeTable {
    fault: Option<TerminateFault>,
    owners: Mutex<HashMap<u16, Vec<PortOwner>>>,
    identities: Mutex<HashMap<u32, ProcessIdentity>>,
    sockets: Mutex<HashMap<u32, TcpListener>>,
    pub listener_calls: AtomicUsize,
    pub terminated: Mutex<Vec<u32>>,
    pub log: EventLog,
}

impl FakeTable {
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    pub fn with_fault(mut self, fault: TerminateFault) -> Self {
        self.fault = Some(fault);
        self
    }

    /// Register `pid` as the owner of `listener`'s port.
    pub fn with_owner(self, listener: TcpListener, pid: u32, exe: Option<&str>) -> Self {
        let port = listener.local_addr().unwrap().port();
        self.with_owner_on(port, listener, pid, exe)
    }

    /// Register `pid` as an owner of `port`, keeping `listener` alive
    /// until `pid` is terminated.
    pub fn with_owner_on(
        self,
        port: u16,
        listener: TcpListener,
        pid: u32,
        exe: Option<&str>,
    ) -> Self {
        self.add_owner(port, listener, pid, exe);
        self
    }

    /// Like [`FakeTable::with_owner_on`] on a table already in use.
    pub fn add_owner(&self, port: u16, listener: TcpListener, pid: u32, exe: Option<&str>) {
        self.owners
            .lock()
            .unwrap()
            .entry(port)
            .or_default()
            .push(PortOwner::pid(pid));
        if let Some(exe) = exe {
            let mut identity = ProcessIdentity::new(pid);
            identity.exe = Some(PathBuf::from(exe));
            self.identities.lock().unwrap().insert(pid, identity);
        }
        self.sockets.lock().unwrap().insert(pid, listener);
    }

    /// Report another socket on `port` held by an already registered PID.
    pub fn with_duplicate_owner(self, port: u16, pid: u32) -> Self {
        self.owners
            .lock()
            .unwrap()
            .entry(port)
            .or_default()
            .push(PortOwner::pid(pid));
        self
    }

    pub fn terminated(&self) -> Vec<u32> {
        self.terminated.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProcessTable for FakeTable {
    fn listeners(&self, port: u16) -> Vec<PortOwner> {
        self.listener_calls.fetch_add(1, Ordering::SeqCst);
        self.owners
            .lock()
            .unwrap()
            .get(&port)
            .cloned()
            .unwrap_or_default()
    }

    fn inspect(&self, pid: u32) -> Option<ProcessIdentity> {
        self.identities.lock().unwrap().get(&pid).cloned()
    }

    fn exists(&self, pid: u32) -> bool {
        // Children spawned by the supervisor are real processes.
        self.sockets.lock().unwrap().contains_key(&pid) || SystemProcessTable::new().exists(pid)
    }

    async fn terminate(&self, pid: u32, _grace: Duration) -> std::io::Result<TerminateOutcome> {
        self.log.lock().unwrap().push(format!("terminate {pid}"));
        self.terminated.lock().unwrap().push(pid);
        match self.fault {
            Some(TerminateFault::Denied) => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    "operation not permitted",
                ));
            }
            Some(TerminateFault::Lingers) => return Ok(TerminateOutcome::Graceful),
            None => {}
        }
        let removed = self.sockets.lock().unwrap().remove(&pid);
        Ok(if removed.is_some() {
            TerminateOutcome::Graceful
        } else {
            TerminateOutcome::AlreadyGone
        })
    }
}

/// Health probe that reports ready after a fixed number of calls.
pub struct FakeProbe {
    ready_after: Option<usize>,
    pub calls: AtomicUsize,
    log: EventLog,
}

impl FakeProbe {
    pub fn ready(log: EventLog) -> Self {
        Self {
            ready_after: Some(1),
            calls: AtomicUsize::new(0),
            log,
        }
    }

    pub fn never(log: EventLog) -> Self {
        Self {
            ready_after: None,
            calls: AtomicUsize::new(0),
            log,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HealthProbe for FakeProbe {
    async fn is_ready(&self, port: u16) -> bool {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.log.lock().unwrap().push(format!("probe {port}"));
        self.ready_after.is_some_and(|n| call >= n)
    }
}

/// Ready once `path` exists and is non-empty.
pub struct FileProbe(pub PathBuf);

#[async_trait]
impl HealthProbe for FileProbe {
    async fn is_ready(&self, _port: u16) -> bool {
        std::fs::metadata(&self.0).is_ok_and(|m| m.len() > 0)
    }
}

/// A port with nothing listening on it.
pub fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// A listener on an ephemeral loopback port, and that port.
pub fn occupied_port() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

pub fn command(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| (*s).to_string()).collect()
}

/// Whether the OS still has a live process with this PID.
pub fn is_alive(pid: u32) -> bool {
    SystemProcessTable::new().exists(pid)
}

/// Verify the public supervisor types are exported from the library.
#[test]
fn test_all_supervisor_types_exported() {
    use seq_llm::supervisor::{
        Classification, IdentityMatcher, ProcessState, ReclaimDecision, ReclaimMode,
        ReclaimPolicy, Supervisor, SupervisorError, SupervisorOptions,
    };

    let _ = ReclaimPolicy::new(ReclaimMode::Strict, IdentityMatcher::default());
    let _ = SupervisorOptions::default();
    let _: fn() -> SupervisorError = || SupervisorError::EmptyCommand;
    let _ = Supervisor::with_parts(
        SupervisorOptions::default(),
        Arc::new(FakeTable::default()),
        Arc::new(FakeProbe::never(EventLog::default())),
    );

    let _ = Classification::Recognized;
    let _ = ReclaimDecision::Refuse;
    assert_eq!(ProcessState::default(), ProcessState::Stopped);
}
