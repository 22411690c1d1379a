//! Colored CLI display utilities.
//!
//! Status lines carry a timestamp and a bracketed tag; streamed tokens are
//! printed bare so the reply reads as plain text.

use std::io::{self, Write};

use chrono::Utc;
use owo_colors::OwoColorize;

use crate::supervisor::{ReclaimDecision, ReclaimVerdict, ServerEndpoint};

/// Get current timestamp in the same format as tracing.
fn timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

/// Truncate a string to at most `max_len` characters, adding an ellipsis
/// if truncated.
#[must_use]
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else if max_len <= 3 {
        "...".to_string()
    } else {
        let kept: String = s.chars().take(max_len - 3).collect();
        format!("{kept}...")
    }
}

/// Print that a server is starting.
pub fn print_server_starting(profile: &str, port: u16, command: &str) {
    println!(
        "{} {} {} on port {} {}",
        timestamp().dimmed(),
        "[SERVER]".blue().bold(),
        profile.cyan(),
        port,
        truncate(command, 120).dimmed()
    );
    let _ = io::stdout().flush();
}

/// Print that a server passed its health check.
pub fn print_server_ready(profile: &str, endpoint: &ServerEndpoint) {
    println!(
        "{} {} {} ready at {} {}",
        timestamp().dimmed(),
        "[READY]".green().bold(),
        profile.cyan(),
        endpoint.base_url,
        format!("pid={}", endpoint.pid).dimmed()
    );
    let _ = io::stdout().flush();
}

/// Print that a server was stopped.
pub fn print_server_stopped(profile: &str) {
    println!(
        "{} {} {} stopped",
        timestamp().dimmed(),
        "[SERVER]".blue().bold(),
        profile.cyan()
    );
    let _ = io::stdout().flush();
}

/// Print one reclaim verdict.
pub fn print_verdict(port: u16, verdict: &ReclaimVerdict) {
    let decision = match verdict.decision {
        ReclaimDecision::Terminate => "terminate".yellow().bold().to_string(),
        ReclaimDecision::Refuse => "refuse".red().bold().to_string(),
        ReclaimDecision::Skip => "skip".dimmed().to_string(),
    };
    println!(
        "{} {} {} [{:?}] -> {}",
        "[PORT]".magenta().bold(),
        port,
        verdict.describe(),
        verdict.classification,
        decision
    );
    let _ = io::stdout().flush();
}

/// Print that a port is free.
pub fn print_port_free(port: u16) {
    println!("{} {} free", "[PORT]".magenta().bold(), port);
    let _ = io::stdout().flush();
}

/// Print a streamed token.
pub fn print_token(text: &str) {
    print!("{text}");
    let _ = io::stdout().flush();
}

/// End a streamed reply with a newline.
pub fn finish_stream() {
    println!();
    let _ = io::stdout().flush();
}

/// Print an informational message.
pub fn print_info(message: &str) {
    println!("{} {}", "[INFO]".cyan().bold(), message);
    let _ = io::stdout().flush();
}

/// Print an error message.
pub fn print_error(message: &str) {
    eprintln!("{} {}", "[ERROR]".red().bold(), message);
}
