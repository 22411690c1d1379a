//! Port reclaim policy.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{Classification, IdentityMatcher, PortOwner, ProcessIdentity, ProcessTable};

/// How to treat unrecognized processes holding a target port.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReclaimMode {
    /// Fail instead of touching a process we cannot vouch for.
    #[default]
    Strict,
    /// Leave unrecognized processes alone and carry on.
    Permissive,
}

impl ReclaimMode {
    #[must_use]
    pub fn from_strict(strict: bool) -> Self {
        if strict {
            Self::Strict
        } else {
            Self::Permissive
        }
    }
}

/// What to do with one process occupying the port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReclaimDecision {
    Terminate,
    Refuse,
    Skip,
}

/// The decision for a single occupant, with the evidence behind it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReclaimVerdict {
    /// Occupying PID; `None` when the socket owner could not be determined.
    pub pid: Option<u32>,
    pub identity: Option<ProcessIdentity>,
    pub classification: Classification,
    pub decision: ReclaimDecision,
}

impl ReclaimVerdict {
    /// Human-readable description of the occupant.
    #[must_use]
    pub fn describe(&self) -> String {
        match (&self.identity, self.pid) {
            (Some(identity), _) => identity.to_string(),
            (None, Some(pid)) => format!("pid {pid} (<unreadable>)"),
            (None, None) => "unidentified owner".to_string(),
        }
    }
}

impl fmt::Display for ReclaimVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{:?}] -> {:?}",
            self.describe(),
            self.classification,
            self.decision
        )
    }
}

/// Decides which port occupants may be terminated.
#[derive(Debug, Clone)]
pub struct ReclaimPolicy {
    mode: ReclaimMode,
    matcher: IdentityMatcher,
}

impl ReclaimPolicy {
    #[must_use]
    pub fn new(mode: ReclaimMode, matcher: IdentityMatcher) -> Self {
        Self { mode, matcher }
    }

    /// Enumerate the processes bound to `port` and decide for each.
    ///
    /// One verdict is produced per distinct PID; sockets whose owner is
    /// unknown each get their own verdict.
    #[must_use]
    pub fn decide(
        &self,
        port: u16,
        table: &dyn ProcessTable,
        tracked: Option<u32>,
    ) -> Vec<ReclaimVerdict> {
        let owners = table.listeners(port);
        self.decide_for(&owners, table, tracked)
    }

    /// Decide for an explicit list of occupants.
    #[must_use]
    pub fn decide_for(
        &self,
        owners: &[PortOwner],
        table: &dyn ProcessTable,
        tracked: Option<u32>,
    ) -> Vec<ReclaimVerdict> {
        let mut seen = Vec::new();
        let mut verdicts = Vec::new();
        for owner in owners {
            if let Some(pid) = owner.pid {
                if seen.contains(&pid) {
                    continue;
                }
                seen.push(pid);
            }
            verdicts.push(self.judge(owner.pid, table, tracked));
        }
        verdicts
    }

    fn judge(
        &self,
        pid: Option<u32>,
        table: &dyn ProcessTable,
        tracked: Option<u32>,
    ) -> ReclaimVerdict {
        let Some(pid) = pid else {
            return ReclaimVerdict {
                pid: None,
                identity: None,
                classification: Classification::Unknown,
                decision: self.foreign_decision(),
            };
        };

        let identity = table.inspect(pid);
        let classification = self.matcher.classify(pid, identity.as_ref(), tracked);
        let decision = match classification {
            Classification::Tracked | Classification::Recognized => ReclaimDecision::Terminate,
            Classification::Unknown => self.foreign_decision(),
        };
        ReclaimVerdict {
            pid: Some(pid),
            identity,
            classification,
            decision,
        }
    }

    fn foreign_decision(&self) -> ReclaimDecision {
        match self.mode {
            ReclaimMode::Strict => ReclaimDecision::Refuse,
            ReclaimMode::Permissive => ReclaimDecision::Skip,
        }
    }
}
