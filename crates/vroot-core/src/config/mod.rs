//! Session configuration for vroot
//!
//! The session configuration is parsed once per process from a key/value set
//! (normally the environment) and is immutable afterwards. Mapping rules are
//! authored as TOML and compiled into the shared rule tree.

mod env_loader;
mod logging_config;
mod rules;
mod session_config;

pub use env_loader::{
    ENV_BINARY_NAME, ENV_CHROOT_PATH, ENV_EXEC_POLICY_NAME, ENV_LOG_FILE, ENV_LOG_FORMAT,
    ENV_LOG_LEVEL, ENV_NETWORK_MODE, ENV_ORIG_BINARY_NAME, ENV_REAL_BINARY_NAME,
    ENV_SESSION_DIR, ENV_SESSION_MODE, ENV_VPERM_IDS,
};
pub use logging_config::{LogFormat, LogLevel, LogSettings};
pub use rules::{RuleDef, RuleSetDef};
pub use session_config::{DAEMON_SOCKET_FILE, RULE_TREE_FILE, RULES_FILE, SessionConfig};
