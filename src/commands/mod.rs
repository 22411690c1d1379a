//! Subcommand implementations for the `seq-llm` binary.

mod chat;
mod init_config;
mod ports;
mod serve;

pub use chat::*;
pub use init_config::*;
pub use ports::*;
pub use serve::*;

use crate::chat::{ChatError, StreamError};
use crate::config::{build_server_command, Config, ConfigError, Profile};
use crate::supervisor::{ReclaimMode, Supervisor, SupervisorError, SupervisorOptions};

/// Errors surfaced by a subcommand.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
    #[error(transparent)]
    Chat(#[from] ChatError),
    #[error(transparent)]
    Stream(#[from] StreamError),
    #[error("No config directory available on this platform; pass --config")]
    NoConfigDir,
}

impl CommandError {
    /// True when the command ended because the user pressed Ctrl-C.
    #[must_use]
    pub fn is_interrupt(&self) -> bool {
        matches!(self, Self::Supervisor(SupervisorError::Interrupted { .. }))
    }
}

/// Options shared by every subcommand that manages a server.
#[derive(Debug, Clone, Copy, Default)]
pub struct GlobalOptions {
    /// Leave unrecognized port occupants alone instead of failing.
    pub permissive: bool,
}

/// Supervisor options from config, with the command-line override applied.
fn supervisor_options(config: &Config, global: GlobalOptions) -> SupervisorOptions {
    let mut options = SupervisorOptions::from_settings(&config.supervisor, &config.llama_server);
    if global.permissive {
        options.reclaim_mode = ReclaimMode::Permissive;
    }
    options
}

/// A profile resolved into everything needed to launch it.
struct LaunchPlan<'a> {
    key: &'a str,
    profile: &'a Profile,
    port: u16,
    command: Vec<String>,
}

impl<'a> LaunchPlan<'a> {
    fn resolve(config: &'a Config, profile: Option<&str>) -> Result<Self, ConfigError> {
        let (key, profile) = config.resolve_profile(profile)?;
        let port = profile.port()?;
        let command = build_server_command(&config.llama_server, key, profile, &config.defaults)?;
        Ok(Self {
            key,
            profile,
            port,
            command,
        })
    }

    fn display_name(&self) -> &'a str {
        self.profile.display_name(self.key)
    }
}

fn new_supervisor(config: &Config, global: GlobalOptions) -> Result<Supervisor, CommandError> {
    Ok(Supervisor::new(supervisor_options(config, global))?)
}
