//! Error types for vroot
//!
//! Every error enum implements [`UnifiedError`], which provides:
//! - error_code: a stable identifier for programmatic handling
//! - errno: the value a syscall wrapper should hand back to the program

mod conversions;
mod types;

pub use types::{
    ConfigError, MappingError, MappingOutcome, RpcError, RuleDefError, RuleTreeError,
    UnifiedError, VrootError, VrootResult,
};
