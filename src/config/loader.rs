//! Configuration file loader.

use std::path::{Path, PathBuf};

use super::Config;

/// Template written by `ensure_default_config`.
pub const DEFAULT_CONFIG_TOML: &str = r#"# Path to the llama-server executable.
llama_server = "llama-server"

[defaults]
threads = 6
threads_batch = 8
batch_size = 512

[supervisor]
# Refuse to kill unrecognized processes that hold a profile's port.
strict_reclaim = true
startup_timeout_secs = 120
restart_timeout_secs = 60
health_interval_ms = 1000
stop_grace_secs = 3

[profiles.brain]
name = "Brain"
model_path = "<path to model.gguf>"
port = 8081
ctx_size = 16384
temperature = 0.7

[profiles.coder]
name = "Coder"
model_path = "<path to model.gguf>"
port = 8082
ctx_size = 32768
temperature = 0.3
"#;

/// Configuration loader that searches multiple locations.
#[derive(Debug)]
pub struct ConfigLoader {
    /// Search paths in order of priority.
    search_paths: Vec<PathBuf>,
}

impl ConfigLoader {
    /// Create a new config loader with default search paths.
    #[must_use]
    pub fn new() -> Self {
        let mut search_paths = vec![PathBuf::from(".seq-llm.toml")];
        if let Some(path) = default_config_path() {
            search_paths.push(path);
        }
        Self { search_paths }
    }

    /// Create a config loader with a specific config file path.
    #[must_use]
    pub fn with_path(path: PathBuf) -> Self {
        Self {
            search_paths: vec![path],
        }
    }

    /// Load configuration from the first available file, or return defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be read, parsed
    /// or validated.
    pub fn load(&self) -> Result<Config, ConfigError> {
        for path in &self.search_paths {
            if path.exists() {
                tracing::debug!(path = %path.display(), "Loading config file");
                return Self::load_from_path(path);
            }
        }

        tracing::debug!("No config file found, using defaults");
        Ok(Config::default())
    }

    fn load_from_path(path: &Path) -> Result<Config, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Get the search paths for debugging.
    #[must_use]
    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-user config location: `<config_dir>/seq-llm/config.toml`.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("seq-llm").join("config.toml"))
}

/// Write the default template to `path` unless a file already exists there.
///
/// Returns the path that now holds a config file.
///
/// # Errors
///
/// Returns `ConfigError::WriteError` if the directory or file cannot be created.
pub fn ensure_default_config(path: &Path) -> Result<PathBuf, ConfigError> {
    if path.exists() {
        return Ok(path.to_path_buf());
    }
    let write_err = |source| ConfigError::WriteError {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(write_err)?;
    }
    std::fs::write(path, DEFAULT_CONFIG_TOML).map_err(write_err)?;
    tracing::info!(path = %path.display(), "Wrote default config");
    Ok(path.to_path_buf())
}

/// Errors that can occur during configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write config file {path}: {source}")]
    WriteError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Port {0} is outside 1..=65535")]
    InvalidPort(u32),

    #[error("Profile '{0}' has no model_path")]
    MissingModelPath(String),

    #[error("Profile '{profile}' points at a remote model ({path}); only local files can be served")]
    RemoteModelPath { profile: String, path: String },

    #[error("Profile '{0}' not found")]
    UnknownProfile(String),

    #[error("No profile given and no default_profile configured")]
    NoProfileSelected,
}
