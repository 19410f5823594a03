//! CLI argument definitions using clap
//!
//! - vroot map PATH...            # Forward-map virtual paths
//! - vroot reverse PATH...        # Map host paths back
//! - vroot daemon                 # Run the session daemon
//! - vroot ctl <action>           # Talk to a running daemon

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Default per-call timeout for `vroot ctl`, in milliseconds
pub const DEFAULT_RPC_TIMEOUT_MS: u64 = 5000;

#[derive(Parser)]
#[command(name = "vroot")]
#[command(about = "vroot - rule-driven virtual filesystem view for unmodified programs")]
#[command(
    long_about = r#"vroot - rule-driven virtual filesystem view for unmodified programs

USAGE:
  vroot map /etc/resolv.conf             # Show where a virtual path lands
  vroot reverse /opt/target/usr/bin      # Show the virtual path of a host path
  vroot daemon --session /tmp/sess       # Run the session daemon
  vroot ctl ping                         # Check that the daemon answers

For detailed help: vroot <command> --help"#
)]
#[command(version)]
pub struct Cli {
    /// Log level (error, warning, net, notice, info, debug, noise)
    #[arg(long, global = true, env = "VROOT_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Append log output to this file instead of stderr
    #[arg(long, global = true, env = "VROOT_LOG_FILE")]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Map virtual paths to host paths
    Map(MapArgs),

    /// Map host paths back to virtual paths
    Reverse(ReverseArgs),

    /// Run the session daemon until interrupted
    Daemon {
        #[command(flatten)]
        session: SessionArgs,
    },

    /// Send a command to a running session daemon
    Ctl {
        #[command(flatten)]
        session: SessionArgs,

        /// Per-call timeout in milliseconds
        #[arg(long, default_value_t = DEFAULT_RPC_TIMEOUT_MS)]
        timeout_ms: u64,

        #[command(subcommand)]
        action: CtlAction,
    },
}

/// Where the session lives
#[derive(Args, Clone, Debug)]
pub struct SessionArgs {
    /// Session directory holding the rule tree and the daemon socket
    #[arg(long, env = "VROOT_SESSION_DIR", default_value = ".")]
    pub session: PathBuf,

    /// Rules file to use instead of the session's compiled rule tree
    #[arg(long)]
    pub rules: Option<PathBuf>,
}

/// Options shared by both mapping directions
#[derive(Args, Clone, Debug)]
pub struct MappingArgs {
    #[command(flatten)]
    pub session: SessionArgs,

    /// Interface class of the simulated call; repeat for several.
    /// Defaults to the class of the simulated function.
    #[arg(long = "class", value_name = "NAME")]
    pub classes: Vec<String>,

    /// Binary name used for rule selection
    #[arg(long)]
    pub binary: Option<String>,

    /// Enter this simulated chroot before mapping
    #[arg(long)]
    pub chroot: Option<String>,

    /// Print one JSON object per path
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Clone, Debug)]
pub struct MapArgs {
    #[command(flatten)]
    pub mapping: MappingArgs,

    /// Name of the simulated call, used in log lines
    #[arg(long, default_value = "open")]
    pub func: String,

    /// Do not follow a symlink in the final component
    #[arg(long)]
    pub no_follow: bool,

    /// Virtual paths to map
    #[arg(required = true)]
    pub paths: Vec<String>,
}

#[derive(Args, Clone, Debug)]
pub struct ReverseArgs {
    #[command(flatten)]
    pub mapping: MappingArgs,

    /// Name of the simulated call, used in log lines
    #[arg(long, default_value = "getcwd")]
    pub func: String,

    /// Report paths as seen from outside the chroot
    #[arg(long)]
    pub keep_chroot_prefix: bool,

    /// Host paths to map back
    #[arg(required = true)]
    pub paths: Vec<String>,
}

#[derive(Subcommand, Clone, Debug)]
pub enum CtlAction {
    /// Check that the daemon answers
    Ping,

    /// Initialize the session (compiles the rule tree once)
    Init,

    /// Show the override record of an inode
    Get { dev: u64, ino: u64 },

    /// Drop every override of an inode
    Clear { dev: u64, ino: u64 },

    /// Override the owner of an inode
    SetIds {
        dev: u64,
        ino: u64,

        #[arg(long)]
        uid: Option<u32>,

        #[arg(long)]
        gid: Option<u32>,
    },

    /// Drop the owner override of an inode
    ReleaseIds { dev: u64, ino: u64 },
}
