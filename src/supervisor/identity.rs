//! Classify processes by who owns them.
//!
//! Recognition is a substring heuristic over the executable path, process
//! name and command line. It can be fooled by a foreign process whose
//! command line happens to mention a recognized fragment, and it misses
//! servers installed under an unexpected name.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Best-effort metadata about a running process.
///
/// Each field is read independently and may be missing when the process
/// exited mid-read or access was denied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessIdentity {
    pub pid: u32,
    pub exe: Option<PathBuf>,
    pub name: Option<String>,
    pub cmdline: Option<Vec<String>>,
}

impl ProcessIdentity {
    #[must_use]
    pub fn new(pid: u32) -> Self {
        Self {
            pid,
            ..Self::default()
        }
    }

    /// True when none of the metadata could be read.
    #[must_use]
    pub fn is_unreadable(&self) -> bool {
        self.exe.is_none() && self.name.is_none() && self.cmdline.is_none()
    }

    /// Lower-cased concatenation of every readable field.
    #[must_use]
    pub fn haystack(&self) -> String {
        let mut parts = Vec::new();
        if let Some(exe) = &self.exe {
            parts.push(exe.to_string_lossy().into_owned());
        }
        if let Some(name) = &self.name {
            parts.push(name.clone());
        }
        if let Some(cmdline) = &self.cmdline {
            parts.push(cmdline.join(" "));
        }
        parts.join(" ").to_lowercase()
    }
}

impl fmt::Display for ProcessIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = self
            .exe
            .as_ref()
            .map(|p| p.display().to_string())
            .or_else(|| self.name.clone())
            .or_else(|| self.cmdline.as_ref().and_then(|c| c.first().cloned()))
            .unwrap_or_else(|| "<unreadable>".to_string());
        write!(f, "pid {} ({label})", self.pid)
    }
}

/// Ownership class of a process occupying a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    /// The process this supervisor launched.
    Tracked,
    /// A known server binary, safe to reclaim.
    Recognized,
    /// Anything else, including processes that could not be inspected.
    Unknown,
}

/// Matches processes against the tracked PID and an allow-list of binary
/// name fragments.
#[derive(Debug, Clone)]
pub struct IdentityMatcher {
    fragments: Vec<String>,
}

impl IdentityMatcher {
    /// Build a matcher from name fragments. Matching is case-insensitive.
    #[must_use]
    pub fn new<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            fragments: fragments
                .into_iter()
                .map(|s| s.as_ref().trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    /// Add one more fragment, e.g. the file name of the configured binary.
    pub fn recognize(&mut self, fragment: impl AsRef<str>) {
        let fragment = fragment.as_ref().trim().to_lowercase();
        if !fragment.is_empty() && !self.fragments.contains(&fragment) {
            self.fragments.push(fragment);
        }
    }

    #[must_use]
    pub fn fragments(&self) -> &[String] {
        &self.fragments
    }

    /// Classify `pid` given its (optional) metadata.
    #[must_use]
    pub fn classify(
        &self,
        pid: u32,
        identity: Option<&ProcessIdentity>,
        tracked: Option<u32>,
    ) -> Classification {
        if tracked == Some(pid) {
            return Classification::Tracked;
        }
        let Some(identity) = identity else {
            return Classification::Unknown;
        };
        if identity.is_unreadable() {
            return Classification::Unknown;
        }
        let haystack = identity.haystack();
        if self.fragments.iter().any(|f| haystack.contains(f.as_str())) {
            Classification::Recognized
        } else {
            Classification::Unknown
        }
    }
}

impl Default for IdentityMatcher {
    fn default() -> Self {
        Self::new(["llama-server", "llama_server", "llama.cpp", "llama_cpp", "llamafile"])
    }
}
