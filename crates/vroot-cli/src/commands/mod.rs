//! CLI commands

pub mod ctl;
pub mod daemon;
pub mod map;
pub mod reverse;
mod session;

pub use session::{call_classes, open_session};
