//! vroot command-line interface
//!
//! Inspection and session tooling for the path virtualization engine.
//!
//! # Installation
//!
//! ```bash
//! cargo install --path crates/vroot-cli
//! ```
//!
//! # Commands Overview
//!
//! ## 1. Mapping
//! Show how virtual paths map to host paths under a session's rules, and
//! the reverse direction.
//!
//! - **Command:** `vroot map /usr/lib/libc.so.6` or `vroot reverse /opt/t/usr`
//!
//! ## 2. Session daemon
//! Run the vperm daemon that owns the rule tree and the inode overrides of
//! one session.
//!
//! - **Command:** `vroot daemon --session /tmp/sess`
//!
//! ## 3. Daemon control
//! Send single RPC commands to a running daemon.
//!
//! - **Command:** `vroot ctl ping`, `vroot ctl get 2049 131`

mod args;
mod commands;
mod console;
mod router;

use args::Cli;
use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    router::init_logging(&cli)?;
    router::route(cli).await
}
