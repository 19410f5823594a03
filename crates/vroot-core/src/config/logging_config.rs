//! Logging configuration

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Message tiers understood by the logging sink.
///
/// `Noise2` and `Noise3` are accepted for compatibility and behave like `Noise`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warning,
    Net,
    Notice,
    Info,
    Debug,
    Noise,
    Noise2,
    Noise3,
}

impl LogLevel {
    /// Parse a level name; unknown names fall back to `Info`
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "error" => Self::Error,
            "warning" | "warn" => Self::Warning,
            "net" | "network" => Self::Net,
            "notice" => Self::Notice,
            "info" => Self::Info,
            "debug" => Self::Debug,
            "noise" => Self::Noise,
            "noise2" => Self::Noise2,
            "noise3" => Self::Noise3,
            _ => Self::Info,
        }
    }

    /// The tracing level this tier is emitted at
    pub fn tracing_level(self) -> tracing::Level {
        match self {
            Self::Error => tracing::Level::ERROR,
            Self::Warning => tracing::Level::WARN,
            Self::Net | Self::Notice | Self::Info => tracing::Level::INFO,
            Self::Debug => tracing::Level::DEBUG,
            Self::Noise | Self::Noise2 | Self::Noise3 => tracing::Level::TRACE,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Net => "net",
            Self::Notice => "notice",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Noise => "noise",
            Self::Noise2 => "noise2",
            Self::Noise3 => "noise3",
        }
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output layout of log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Timestamped lines with target and level
    Full,
    /// No timestamps, so logs of separate runs compare cleanly
    Simple,
}

impl LogFormat {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "full" => Some(Self::Full),
            "simple" => Some(Self::Simple),
            _ => None,
        }
    }
}

impl Default for LogFormat {
    fn default() -> Self {
        Self::Full
    }
}

/// Logging settings for one process
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogSettings {
    pub level: LogLevel,
    /// Append to this file instead of stderr
    pub file: Option<PathBuf>,
    pub format: LogFormat,
}

impl LogSettings {
    /// Apply command-line overrides on top of the session settings
    pub fn merge(&mut self, level: Option<LogLevel>, file: Option<PathBuf>) {
        if let Some(level) = level {
            self.level = level;
        }
        if file.is_some() {
            self.file = file;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_parsing() {
        assert_eq!(LogLevel::parse("warning"), LogLevel::Warning);
        assert_eq!(LogLevel::parse("NET"), LogLevel::Net);
        assert_eq!(LogLevel::parse("noise3"), LogLevel::Noise3);
        assert_eq!(LogLevel::parse("chatty"), LogLevel::Info);
    }

    #[test]
    fn test_tracing_levels() {
        assert_eq!(LogLevel::Notice.tracing_level(), tracing::Level::INFO);
        assert_eq!(LogLevel::Noise2.tracing_level(), tracing::Level::TRACE);
        assert_eq!(LogLevel::Warning.tracing_level(), tracing::Level::WARN);
    }

    #[test]
    fn test_settings_merge() {
        let mut settings = LogSettings::default();
        assert_eq!(settings.level, LogLevel::Info);
        assert_eq!(settings.format, LogFormat::Full);

        settings.merge(Some(LogLevel::Debug), Some(PathBuf::from("/tmp/vroot.log")));
        assert_eq!(settings.level, LogLevel::Debug);
        assert_eq!(settings.file, Some(PathBuf::from("/tmp/vroot.log")));

        settings.merge(None, None);
        assert_eq!(settings.level, LogLevel::Debug);
        assert!(settings.file.is_some());
    }
}
