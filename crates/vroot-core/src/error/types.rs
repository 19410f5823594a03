//! Core error types for the vroot engine

use thiserror::Error;

/// Result type alias for crate-level operations
pub type VrootResult<T> = Result<T, VrootError>;

/// Result type alias for path mapping operations
pub type MappingOutcome<T> = Result<T, MappingError>;

/// Common surface shared by every vroot error enum.
///
/// - error_code(): stable identifier for programmatic handling
/// - errno(): the errno value a syscall wrapper should report
pub trait UnifiedError: std::error::Error + Send + Sync {
    /// Get the error code for programmatic handling
    fn error_code(&self) -> &'static str;

    /// Get the errno-equivalent of this error
    fn errno(&self) -> i32 {
        libc::EIO
    }
}

/// Errors produced while mapping a single path.
///
/// These never abort the process; they are carried in the mapping result
/// and reported to the caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MappingError {
    /// A relative path reached the engine without a working directory to anchor it
    #[error("relative path '{path}' cannot be mapped without a working directory")]
    RelativePath { path: String },

    /// `..` tried to climb above the root of the (virtual or chrooted) tree
    #[error("path '{path}' escapes the root")]
    PathEscapesRoot { path: String },

    /// Symlink expansion did not terminate within the step budget
    #[error("symlink loop while resolving '{path}' ({steps} expansions)")]
    SymlinkLoop { path: String, steps: usize },

    /// The selected rule forbids access
    #[error("access to '{path}' denied by rule '{rule}'")]
    Denied { path: String, rule: String },

    /// No rule covers the path and no fallback applies
    #[error("no applicable rule for '{path}'")]
    NoRule { path: String },

    /// The mapped host path does not exist
    #[error("host path '{path}' does not exist")]
    NotFound { path: String },

    /// The mapped host path is not a directory
    #[error("host path '{path}' is not a directory")]
    NotADirectory { path: String },

    /// A rule produced a result the engine cannot use
    #[error("rule '{rule}' produced an invalid result for '{path}': {reason}")]
    InvalidResult {
        path: String,
        rule: String,
        reason: String,
    },

    /// Reading a symlink or stat-ing a host path failed unexpectedly
    #[error("I/O error while resolving '{path}': {message}")]
    Io { path: String, message: String },

    /// The shared rule tree could not be read
    #[error("rule tree unusable: {0}")]
    RuleTree(String),
}

impl UnifiedError for MappingError {
    fn error_code(&self) -> &'static str {
        match self {
            MappingError::RelativePath { .. } => "MAP_RELATIVE_PATH",
            MappingError::PathEscapesRoot { .. } => "MAP_ESCAPES_ROOT",
            MappingError::SymlinkLoop { .. } => "MAP_SYMLINK_LOOP",
            MappingError::Denied { .. } => "MAP_DENIED",
            MappingError::NoRule { .. } => "MAP_NO_RULE",
            MappingError::NotFound { .. } => "MAP_NOT_FOUND",
            MappingError::NotADirectory { .. } => "MAP_NOT_A_DIRECTORY",
            MappingError::InvalidResult { .. } => "MAP_INVALID_RESULT",
            MappingError::Io { .. } => "MAP_IO",
            MappingError::RuleTree(_) => "MAP_RULE_TREE",
        }
    }

    fn errno(&self) -> i32 {
        match self {
            MappingError::RelativePath { .. } => libc::EINVAL,
            MappingError::PathEscapesRoot { .. } => libc::EPERM,
            MappingError::SymlinkLoop { .. } => libc::ELOOP,
            MappingError::Denied { .. } => libc::EACCES,
            MappingError::NoRule { .. } => libc::ENOENT,
            MappingError::NotFound { .. } => libc::ENOENT,
            MappingError::NotADirectory { .. } => libc::ENOTDIR,
            MappingError::InvalidResult { .. } => libc::EINVAL,
            MappingError::Io { .. } | MappingError::RuleTree(_) => libc::EIO,
        }
    }
}

/// Errors raised by the offset-addressed rule tree
#[derive(Error, Debug)]
pub enum RuleTreeError {
    #[error("rule tree I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not a rule tree (bad magic)")]
    BadMagic,

    #[error("unsupported rule tree format version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    #[error("offset {offset} is outside the rule tree ({capacity} bytes)")]
    OutOfBounds { offset: u32, capacity: u32 },

    #[error("object at offset {offset} is a {found}, expected {expected}")]
    WrongKind {
        offset: u32,
        found: &'static str,
        expected: &'static str,
    },

    #[error("rule tree is full ({needed} bytes needed, {available} available)")]
    Full { needed: usize, available: usize },

    #[error("rule tree is mapped read-only")]
    ReadOnly,

    #[error("corrupt rule tree: {0}")]
    Corrupt(String),
}

impl UnifiedError for RuleTreeError {
    fn error_code(&self) -> &'static str {
        match self {
            RuleTreeError::Io(_) => "TREE_IO",
            RuleTreeError::BadMagic => "TREE_BAD_MAGIC",
            RuleTreeError::UnsupportedVersion { .. } => "TREE_VERSION",
            RuleTreeError::OutOfBounds { .. } => "TREE_OUT_OF_BOUNDS",
            RuleTreeError::WrongKind { .. } => "TREE_WRONG_KIND",
            RuleTreeError::Full { .. } => "TREE_FULL",
            RuleTreeError::ReadOnly => "TREE_READ_ONLY",
            RuleTreeError::Corrupt(_) => "TREE_CORRUPT",
        }
    }

    fn errno(&self) -> i32 {
        match self {
            RuleTreeError::Full { .. } => libc::ENOSPC,
            RuleTreeError::ReadOnly => libc::EROFS,
            _ => libc::EIO,
        }
    }
}

/// Errors found while validating rule definitions before they enter the tree
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuleDefError {
    #[error("rule {rule}: exactly one of dir/prefix/path is required")]
    Selector { rule: String },

    #[error("rule {rule}: exactly one action is required")]
    Action { rule: String },

    #[error("rule {rule}: unknown interface class '{class}'")]
    UnknownClass { rule: String, class: String },

    #[error("rule {rule}: {field} must be an absolute path, got '{value}'")]
    NotAbsolute {
        rule: String,
        field: &'static str,
        value: String,
    },

    #[error("rule set could not be parsed: {0}")]
    Parse(String),
}

impl UnifiedError for RuleDefError {
    fn error_code(&self) -> &'static str {
        match self {
            RuleDefError::Selector { .. } => "RULE_SELECTOR",
            RuleDefError::Action { .. } => "RULE_ACTION",
            RuleDefError::UnknownClass { .. } => "RULE_CLASS",
            RuleDefError::NotAbsolute { .. } => "RULE_NOT_ABSOLUTE",
            RuleDefError::Parse(_) => "RULE_PARSE",
        }
    }

    fn errno(&self) -> i32 {
        libc::EINVAL
    }
}

/// Errors from the vperm RPC client and daemon
#[derive(Error, Debug)]
pub enum RpcError {
    #[error("RPC transport error: {0}")]
    Io(#[from] std::io::Error),

    #[error("RPC call timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("RPC protocol version mismatch (local {local}, remote {remote})")]
    ProtocolVersion { local: u16, remote: u16 },

    #[error("malformed RPC message: {0}")]
    Malformed(String),

    #[error("RPC command failed: {0}")]
    Failed(String),

    #[error("daemon does not know command type {0}")]
    UnknownCommand(u32),

    #[error("unexpected RPC reply type {0}")]
    UnexpectedReply(u32),
}

impl UnifiedError for RpcError {
    fn error_code(&self) -> &'static str {
        match self {
            RpcError::Io(_) => "RPC_IO",
            RpcError::Timeout(_) => "RPC_TIMEOUT",
            RpcError::ProtocolVersion { .. } => "RPC_PROTOCOL_VERSION",
            RpcError::Malformed(_) => "RPC_MALFORMED",
            RpcError::Failed(_) => "RPC_FAILED",
            RpcError::UnknownCommand(_) => "RPC_UNKNOWN_COMMAND",
            RpcError::UnexpectedReply(_) => "RPC_UNEXPECTED_REPLY",
        }
    }

    fn errno(&self) -> i32 {
        match self {
            RpcError::Timeout(_) => libc::ETIMEDOUT,
            RpcError::ProtocolVersion { .. } => libc::EPROTO,
            _ => libc::EIO,
        }
    }
}

/// Session configuration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("no session directory ({0} is not set)")]
    MissingSessionDir(&'static str),

    #[error("invalid value for {key}: '{value}'")]
    InvalidValue { key: String, value: String },

    #[error("cannot read {path}: {message}")]
    Unreadable { path: String, message: String },
}

impl UnifiedError for ConfigError {
    fn error_code(&self) -> &'static str {
        match self {
            ConfigError::MissingSessionDir(_) => "CONFIG_NO_SESSION",
            ConfigError::InvalidValue { .. } => "CONFIG_INVALID_VALUE",
            ConfigError::Unreadable { .. } => "CONFIG_UNREADABLE",
        }
    }

    fn errno(&self) -> i32 {
        libc::EINVAL
    }
}

/// Umbrella error for operations that cross subsystems
#[derive(Error, Debug)]
pub enum VrootError {
    #[error("Mapping error: {0}")]
    Mapping(#[from] MappingError),

    #[error("Rule tree error: {0}")]
    RuleTree(#[from] RuleTreeError),

    #[error("Rule definition error: {0}")]
    RuleDef(#[from] RuleDefError),

    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl UnifiedError for VrootError {
    fn error_code(&self) -> &'static str {
        match self {
            VrootError::Mapping(e) => e.error_code(),
            VrootError::RuleTree(e) => e.error_code(),
            VrootError::RuleDef(e) => e.error_code(),
            VrootError::Rpc(e) => e.error_code(),
            VrootError::Config(e) => e.error_code(),
            VrootError::Io(_) => "IO",
        }
    }

    fn errno(&self) -> i32 {
        match self {
            VrootError::Mapping(e) => e.errno(),
            VrootError::RuleTree(e) => e.errno(),
            VrootError::RuleDef(e) => e.errno(),
            VrootError::Rpc(e) => e.errno(),
            VrootError::Config(e) => e.errno(),
            VrootError::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
        }
    }
}
