//! vperm RPC: wire protocol, blocking client and session daemon

mod client;
pub mod protocol;
mod server;

pub use client::RpcClient;
pub use protocol::{Command, CommandFrame, Reply, ReplyFrame, PROTOCOL_VERSION};
pub use server::{handle_command, DaemonState, RpcServer};
