//! `seq-llm ports`: show what the reclaim policy would do with a port.

use crate::config::Config;
use crate::display;
use crate::supervisor::ReclaimVerdict;

use super::{new_supervisor, CommandError, GlobalOptions};

/// What currently holds a port and how a start would treat it.
#[derive(Debug, Clone)]
pub struct PortReport {
    pub port: u16,
    pub occupied: bool,
    pub verdicts: Vec<ReclaimVerdict>,
}

/// Inspect `port` without terminating anything.
///
/// # Errors
///
/// Returns an error if the supervisor cannot be built.
pub async fn inspect_port(
    config: &Config,
    port: u16,
    global: GlobalOptions,
) -> Result<PortReport, CommandError> {
    let supervisor = new_supervisor(config, global)?;
    let verdicts = supervisor.inspect_port(port).await;
    Ok(PortReport {
        port,
        occupied: !verdicts.is_empty(),
        verdicts,
    })
}

/// Print the report for `port`.
///
/// # Errors
///
/// As [`inspect_port`].
pub async fn ports(config: &Config, port: u16, global: GlobalOptions) -> Result<PortReport, CommandError> {
    let report = inspect_port(config, port, global).await?;
    if !report.occupied {
        display::print_port_free(port);
    }
    for verdict in &report.verdicts {
        display::print_verdict(port, verdict);
    }
    Ok(report)
}
