//! From trait implementations for error conversions

use super::types::{ConfigError, MappingError, RuleDefError, RuleTreeError};

impl From<toml::de::Error> for RuleDefError {
    fn from(error: toml::de::Error) -> Self {
        Self::Parse(error.message().to_string())
    }
}

impl From<RuleTreeError> for MappingError {
    fn from(error: RuleTreeError) -> Self {
        Self::RuleTree(error.to_string())
    }
}

impl MappingError {
    /// Wrap an I/O failure observed while resolving `path`
    pub fn io(path: impl Into<String>, error: &std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            message: error.to_string(),
        }
    }
}

impl ConfigError {
    /// Wrap a failure to read a configuration input
    pub fn unreadable(path: impl AsRef<std::path::Path>, error: &std::io::Error) -> Self {
        Self::Unreadable {
            path: path.as_ref().display().to_string(),
            message: error.to_string(),
        }
    }
}
