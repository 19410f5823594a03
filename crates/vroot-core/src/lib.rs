//! vroot Core Library
//!
//! This crate provides the path virtualization engine behind vroot: the
//! shared rule tree, the rule matcher and path resolver, reverse mapping,
//! the simulated chroot, and the vperm RPC protocol that keeps per-inode
//! identity overrides consistent across the processes of a session.

pub mod config;
pub mod error;
pub mod logging;
pub mod mapping;
pub mod path_list;
pub mod rpc;
pub mod ruletree;
pub mod vperm;

// Re-export commonly used types
pub use config::{LogLevel, LogSettings, RuleSetDef, SessionConfig};
pub use error::{MappingError, RpcError, UnifiedError, VrootError, VrootResult};
pub use mapping::{InterfaceClass, MapFlags, MappingContext, MappingResult, Session};
pub use path_list::PathList;
pub use rpc::{DaemonState, RpcClient, RpcServer};
pub use ruletree::{compile_rules_file, RuleSpec, RuleTree};
pub use vperm::{InodeSimu, VpermFields, VpermStore};
