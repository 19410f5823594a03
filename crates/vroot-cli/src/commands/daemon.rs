//! `vroot daemon`: serve one session until ctrl-c

use crate::args::SessionArgs;
use crate::console::CliConsole;
use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use vroot_core::{DaemonState, RpcServer, SessionConfig};

pub async fn run(args: &SessionArgs) -> anyhow::Result<()> {
    let config = SessionConfig::new(&args.session);
    let state = match &args.rules {
        Some(rules) => DaemonState::with_rules_path(config, rules.clone()),
        None => DaemonState::new(config),
    };
    let server = RpcServer::bind(state).context("Failed to bind the daemon socket")?;

    let console = CliConsole::default();
    console.success(&format!(
        "vperm daemon listening on {}",
        server.socket_path().display()
    ));

    let shutdown = CancellationToken::new();
    watch_ctrl_c(shutdown.clone());
    server.run(shutdown).await?;
    console.success("vperm daemon stopped");
    Ok(())
}

fn watch_ctrl_c(shutdown: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received, shutting down");
                shutdown.cancel();
            }
            Err(e) => warn!("Cannot listen for ctrl-c: {}", e),
        }
    });
}
