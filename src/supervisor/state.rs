//! Server process state machine.

use serde::{Deserialize, Serialize};

/// Lifecycle state of the supervised server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessState {
    #[default]
    Stopped,
    Starting,
    Healthy,
    Failed,
    Stopping,
}

impl ProcessState {
    /// Whether `self -> next` is a legal transition.
    ///
    /// `Stopped` is reachable from anywhere because `stop()` is valid in
    /// every state.
    #[must_use]
    pub fn can_transition_to(self, next: ProcessState) -> bool {
        use ProcessState::{Failed, Healthy, Starting, Stopped, Stopping};
        matches!(
            (self, next),
            (_, Stopped)
                | (Stopped | Failed | Healthy, Starting)
                | (Starting, Healthy | Failed)
                | (Starting | Healthy | Failed, Stopping)
        )
    }
}

/// Tracks the current state and counts completed starts.
#[derive(Debug, Clone, Default)]
pub struct ProcessStateMachine {
    state: ProcessState,
    starts: usize,
    failures: usize,
}

impl ProcessStateMachine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn transition(&mut self, new_state: ProcessState) {
        if !self.state.can_transition_to(new_state) {
            tracing::warn!(from = ?self.state, to = ?new_state, "Unexpected state transition");
        }
        tracing::debug!(from = ?self.state, to = ?new_state, "State transition");
        match new_state {
            ProcessState::Healthy => self.starts = self.starts.saturating_add(1),
            ProcessState::Failed => self.failures = self.failures.saturating_add(1),
            _ => {}
        }
        self.state = new_state;
    }

    #[must_use]
    pub fn stats(&self) -> LifecycleStats {
        LifecycleStats {
            starts: self.starts,
            failures: self.failures,
        }
    }
}

/// Counters over the lifetime of one supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleStats {
    pub starts: usize,
    pub failures: usize,
}
