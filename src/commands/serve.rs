//! `seq-llm serve`: run one profile's server until Ctrl-C.

use crate::config::Config;
use crate::display;
use crate::supervisor::display_command;

use super::{new_supervisor, CommandError, GlobalOptions, LaunchPlan};

/// Start the server for `profile`, report readiness and keep it running
/// until interrupted. The server is stopped on every exit path.
///
/// # Errors
///
/// Returns an error if the profile cannot be resolved or the server fails
/// to start. Ctrl-C after startup is a normal exit.
pub async fn serve(
    config: &Config,
    profile: Option<&str>,
    global: GlobalOptions,
) -> Result<(), CommandError> {
    let plan = LaunchPlan::resolve(config, profile)?;
    let name = plan.display_name();
    display::print_server_starting(name, plan.port, &display_command(&plan.command));

    let mut supervisor = new_supervisor(config, global)?;
    let result = supervisor
        .run_scoped(plan.command, plan.port, |endpoint| async move {
            display::print_server_ready(name, &endpoint);
            display::print_info("Press Ctrl-C to stop");
            std::future::pending::<Result<(), CommandError>>().await
        })
        .await;

    match result {
        Err(e) if e.is_interrupt() && supervisor.stats().starts > 0 => {
            display::print_server_stopped(name);
            Ok(())
        }
        other => other,
    }
}
