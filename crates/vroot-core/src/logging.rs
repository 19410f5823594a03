//! Logging sink setup and leveled emission

use crate::config::{LogFormat, LogLevel, LogSettings};
use crate::error::ConfigError;
use std::fs::OpenOptions;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Target used for network-tier messages
pub const NET_TARGET: &str = "vroot::net";

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence over the configured level. Calling this twice
/// is harmless; the second call keeps the first subscriber.
pub fn init(settings: &LogSettings) -> Result<(), ConfigError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(directive_for(settings.level)));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let installed = match (&settings.file, settings.format) {
        (Some(path), format) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| ConfigError::unreadable(path, &e))?;
            let builder = builder.with_writer(Arc::new(file)).with_ansi(false);
            match format {
                LogFormat::Simple => builder.without_time().try_init(),
                LogFormat::Full => builder.try_init(),
            }
        }
        (None, LogFormat::Simple) => builder
            .with_writer(std::io::stderr)
            .without_time()
            .try_init(),
        (None, LogFormat::Full) => builder.with_writer(std::io::stderr).try_init(),
    };
    if installed.is_err() {
        tracing::debug!("Logging already initialized, keeping existing subscriber");
    }
    Ok(())
}

/// EnvFilter directive enabling `level` for vroot and warnings elsewhere
pub fn directive_for(level: LogLevel) -> String {
    let level = level.tracing_level().as_str().to_ascii_lowercase();
    format!("warn,vroot={level},vroot_core={level},vroot_cli={level}")
}

/// Emit a message at one of the session log tiers
pub fn emit(level: LogLevel, message: &str) {
    match level {
        LogLevel::Error => tracing::error!("{}", message),
        LogLevel::Warning => tracing::warn!("{}", message),
        LogLevel::Net => tracing::info!(target: NET_TARGET, "{}", message),
        LogLevel::Notice => tracing::info!(notice = true, "{}", message),
        LogLevel::Info => tracing::info!("{}", message),
        LogLevel::Debug => tracing::debug!("{}", message),
        LogLevel::Noise | LogLevel::Noise2 | LogLevel::Noise3 => tracing::trace!("{}", message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directive() {
        assert_eq!(
            directive_for(LogLevel::Noise),
            "warn,vroot=trace,vroot_core=trace,vroot_cli=trace"
        );
        assert!(directive_for(LogLevel::Notice).contains("vroot_core=info"));
    }

    #[test]
    fn test_init_with_file_is_idempotent() {
        let dir = tempfile::TempDir::new().unwrap();
        let settings = LogSettings {
            level: LogLevel::Debug,
            file: Some(dir.path().join("vroot.log")),
            format: LogFormat::Simple,
        };
        init(&settings).unwrap();
        init(&settings).unwrap();
        emit(LogLevel::Notice, "mapping audit line");
        assert!(dir.path().join("vroot.log").exists());
    }
}
