//! `seq-llm init-config`: write the default config template.

use std::path::{Path, PathBuf};

use crate::config::{default_config_path, ensure_default_config};
use crate::display;

use super::CommandError;

/// Write the template to `path`, or to the per-user location when `None`.
/// An existing file is left untouched.
///
/// # Errors
///
/// Returns `CommandError::NoConfigDir` if no per-user location exists, or
/// a config error if the file cannot be written.
pub fn init_config(path: Option<&Path>) -> Result<PathBuf, CommandError> {
    let target = match path {
        Some(path) => path.to_path_buf(),
        None => default_config_path().ok_or(CommandError::NoConfigDir)?,
    };
    let existed = target.exists();
    let written = ensure_default_config(&target)?;

    if existed {
        display::print_info(&format!("Config already exists at {}", written.display()));
    } else {
        display::print_info(&format!("Wrote default config to {}", written.display()));
    }
    Ok(written)
}
