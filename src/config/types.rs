//! Configuration types.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Top-level configuration for the server manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to the `llama-server` executable.
    #[serde(default = "default_llama_server")]
    pub llama_server: PathBuf,
    /// Global launch defaults shared by every profile.
    #[serde(default)]
    pub defaults: LaunchDefaults,
    /// Lifecycle settings for the process supervisor.
    #[serde(default)]
    pub supervisor: SupervisorSettings,
    /// Model profiles keyed by their short name.
    #[serde(default)]
    pub profiles: BTreeMap<String, Profile>,
    /// Profile used when none is named on the command line.
    #[serde(default)]
    pub default_profile: Option<String>,
}

fn default_llama_server() -> PathBuf {
    PathBuf::from("llama-server")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            llama_server: default_llama_server(),
            defaults: LaunchDefaults::default(),
            supervisor: SupervisorSettings::default(),
            profiles: BTreeMap::new(),
            default_profile: None,
        }
    }
}

impl Config {
    /// Look up a profile by key.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::UnknownProfile` if no profile has that key.
    pub fn profile(&self, key: &str) -> Result<&Profile, ConfigError> {
        self.profiles
            .get(key)
            .ok_or_else(|| ConfigError::UnknownProfile(key.to_string()))
    }

    /// Resolve an optional profile key, falling back to `default_profile`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::NoProfileSelected` if neither is set, or
    /// `ConfigError::UnknownProfile` if the key does not exist.
    pub fn resolve_profile(&self, key: Option<&str>) -> Result<(&str, &Profile), ConfigError> {
        let key = key
            .or(self.default_profile.as_deref())
            .ok_or(ConfigError::NoProfileSelected)?;
        let (key, profile) = self
            .profiles
            .get_key_value(key)
            .ok_or_else(|| ConfigError::UnknownProfile(key.to_string()))?;
        Ok((key.as_str(), profile))
    }

    /// Check every profile for values that would fail at launch time.
    ///
    /// # Errors
    ///
    /// Returns the first validation failure found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (key, profile) in &self.profiles {
            profile.validate(key)?;
        }
        if let Some(default) = &self.default_profile {
            self.profile(default)?;
        }
        Ok(())
    }
}

/// Launch defaults applied to every profile.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LaunchDefaults {
    /// Inference threads when a profile does not set its own.
    #[serde(default)]
    pub threads: Option<u32>,
    /// Threads used for batch processing.
    #[serde(default)]
    pub threads_batch: Option<u32>,
    /// Logical batch size.
    #[serde(default)]
    pub batch_size: Option<u32>,
}

/// Lifecycle settings for the process supervisor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorSettings {
    /// Refuse to reclaim ports held by unrecognized processes.
    #[serde(default = "default_strict_reclaim")]
    pub strict_reclaim: bool,
    /// Seconds to wait for the health endpoint after a cold start.
    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,
    /// Seconds to wait for the health endpoint when replacing a running server.
    #[serde(default = "default_restart_timeout_secs")]
    pub restart_timeout_secs: u64,
    /// First delay between health polls, in milliseconds.
    #[serde(default = "default_health_interval_ms")]
    pub health_interval_ms: u64,
    /// Seconds between SIGTERM and SIGKILL when stopping a process.
    #[serde(default = "default_stop_grace_secs")]
    pub stop_grace_secs: u64,
    /// Name fragments identifying server binaries that may be reclaimed.
    #[serde(default = "default_recognized_binaries")]
    pub recognized_binaries: Vec<String>,
}

fn default_strict_reclaim() -> bool {
    true
}

fn default_startup_timeout_secs() -> u64 {
    120
}

fn default_restart_timeout_secs() -> u64 {
    60
}

fn default_health_interval_ms() -> u64 {
    1000
}

fn default_stop_grace_secs() -> u64 {
    3
}

fn default_recognized_binaries() -> Vec<String> {
    ["llama-server", "llama_server", "llama.cpp", "llama_cpp", "llamafile"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            strict_reclaim: default_strict_reclaim(),
            startup_timeout_secs: default_startup_timeout_secs(),
            restart_timeout_secs: default_restart_timeout_secs(),
            health_interval_ms: default_health_interval_ms(),
            stop_grace_secs: default_stop_grace_secs(),
            recognized_binaries: default_recognized_binaries(),
        }
    }
}

impl SupervisorSettings {
    #[must_use]
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    #[must_use]
    pub fn restart_timeout(&self) -> Duration {
        Duration::from_secs(self.restart_timeout_secs)
    }

    #[must_use]
    pub fn health_interval(&self) -> Duration {
        Duration::from_millis(self.health_interval_ms)
    }

    #[must_use]
    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }
}

/// A model profile: one model file served on one port.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    /// Human-readable display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Path to the GGUF model file.
    pub model_path: String,
    /// Port the server listens on.
    pub port: u32,
    /// Context window size.
    #[serde(default)]
    pub ctx_size: Option<u32>,
    /// Inference threads; overrides `defaults.threads`.
    #[serde(default)]
    pub threads: Option<u32>,
    /// Layers offloaded to the GPU (0 = CPU only).
    #[serde(default)]
    pub ngl: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Bearer token passed through to the chat API.
    #[serde(default)]
    pub api_key: Option<String>,
    /// System prompt, either inline text or a path to a text file.
    #[serde(default)]
    pub system_prompt: Option<String>,
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    2048
}

impl Profile {
    /// Name shown to the user: the display name if set, else the key.
    #[must_use]
    pub fn display_name<'a>(&'a self, key: &'a str) -> &'a str {
        self.name.as_deref().unwrap_or(key)
    }

    /// Port as a validated `u16`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidPort` when outside `1..=65535`.
    pub fn port(&self) -> Result<u16, ConfigError> {
        u16::try_from(self.port)
            .ok()
            .filter(|p| *p != 0)
            .ok_or(ConfigError::InvalidPort(self.port))
    }

    /// Base URL of the server this profile launches.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidPort` when the port is out of range.
    pub fn base_url(&self) -> Result<String, ConfigError> {
        Ok(format!("http://127.0.0.1:{}", self.port()?))
    }

    /// Resolve the system prompt: file contents when it names a readable
    /// file, otherwise the literal text.
    #[must_use]
    pub fn resolved_system_prompt(&self) -> Option<String> {
        let raw = self.system_prompt.as_deref()?.trim();
        if raw.is_empty() {
            return None;
        }
        match std::fs::read_to_string(raw) {
            Ok(text) => Some(text),
            Err(_) => Some(raw.to_string()),
        }
    }

    /// Validate the profile registered under `key`.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` describing the first invalid field.
    pub fn validate(&self, key: &str) -> Result<(), ConfigError> {
        self.port()?;
        let path = self.model_path.trim();
        if path.is_empty() {
            return Err(ConfigError::MissingModelPath(key.to_string()));
        }
        if path.contains("://") {
            return Err(ConfigError::RemoteModelPath {
                profile: key.to_string(),
                path: path.to_string(),
            });
        }
        Ok(())
    }
}
