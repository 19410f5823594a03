//! Command routing logic for CLI

use crate::args::{Cli, Commands};
use crate::commands;
use vroot_core::LogLevel;
use vroot_core::config::LogSettings;

/// Install logging from the global flags
pub fn init_logging(cli: &Cli) -> anyhow::Result<()> {
    let mut settings = LogSettings::default();
    settings.merge(
        cli.log_level.as_deref().map(LogLevel::parse),
        cli.log_file.clone(),
    );
    vroot_core::logging::init(&settings)?;
    tracing::debug!("Logging at level {}", settings.level);
    Ok(())
}

/// Route CLI commands to their respective handlers
pub async fn route(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Map(args) => commands::map::run(&args),
        Commands::Reverse(args) => commands::reverse::run(&args),
        Commands::Daemon { session } => commands::daemon::run(&session).await,
        Commands::Ctl {
            session,
            timeout_ms,
            action,
        } => commands::ctl::run(&session, timeout_ms, action).await,
    }
}
