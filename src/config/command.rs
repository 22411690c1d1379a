//! Build `llama-server` argument lists from profiles.

use std::path::Path;

use super::{ConfigError, LaunchDefaults, Profile};

/// Build the full `llama-server` command line for `profile`.
///
/// The first element is the executable; the rest are its arguments. The
/// port is always included so the supervisor can launch the result as-is.
///
/// # Errors
///
/// Returns a `ConfigError` if the profile fails validation.
pub fn build_server_command(
    llama_server: &Path,
    key: &str,
    profile: &Profile,
    defaults: &LaunchDefaults,
) -> Result<Vec<String>, ConfigError> {
    profile.validate(key)?;
    let port = profile.port()?;

    let mut cmd = vec![
        llama_server.to_string_lossy().into_owned(),
        "-m".to_string(),
        profile.model_path.trim().to_string(),
        "--port".to_string(),
        port.to_string(),
    ];

    if let Some(ctx) = profile.ctx_size {
        cmd.push("--ctx-size".to_string());
        cmd.push(ctx.to_string());
    }

    if let Some(threads) = profile.threads.or(defaults.threads) {
        cmd.push("--threads".to_string());
        cmd.push(threads.to_string());
    }

    cmd.push("--n-gpu-layers".to_string());
    cmd.push(profile.ngl.to_string());

    if let Some(threads_batch) = defaults.threads_batch {
        cmd.push("--threads-batch".to_string());
        cmd.push(threads_batch.to_string());
    }

    if let Some(batch_size) = defaults.batch_size {
        cmd.push("--batch-size".to_string());
        cmd.push(batch_size.to_string());
    }

    Ok(cmd)
}
