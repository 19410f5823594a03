//! Key/value and environment based session configuration loading

use super::logging_config::{LogFormat, LogLevel};
use super::session_config::SessionConfig;
use crate::error::ConfigError;
use std::path::PathBuf;

pub const ENV_SESSION_DIR: &str = "VROOT_SESSION_DIR";
pub const ENV_SESSION_MODE: &str = "VROOT_SESSION_MODE";
pub const ENV_NETWORK_MODE: &str = "VROOT_NETWORK_MODE";
pub const ENV_VPERM_IDS: &str = "VROOT_VPERM_IDS";
pub const ENV_BINARY_NAME: &str = "__VROOT_BINARYNAME";
pub const ENV_REAL_BINARY_NAME: &str = "__VROOT_REAL_BINARYNAME";
pub const ENV_ORIG_BINARY_NAME: &str = "__VROOT_ORIG_BINARYNAME";
pub const ENV_EXEC_POLICY_NAME: &str = "__VROOT_EXEC_POLICY_NAME";
pub const ENV_CHROOT_PATH: &str = "__VROOT_CHROOT_PATH";
pub const ENV_LOG_LEVEL: &str = "VROOT_LOG_LEVEL";
pub const ENV_LOG_FILE: &str = "VROOT_LOG_FILE";
pub const ENV_LOG_FORMAT: &str = "VROOT_LOG_FORMAT";

impl SessionConfig {
    /// Build the configuration from a read-only key/value set.
    ///
    /// Unknown keys are ignored. Empty values count as unset.
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut session_dir = None;
        let mut config = SessionConfig::new(PathBuf::new());

        for (key, value) in vars {
            let value: String = value.into();
            if value.is_empty() {
                continue;
            }
            match key.as_ref() {
                ENV_SESSION_DIR => session_dir = Some(PathBuf::from(value)),
                ENV_SESSION_MODE => config.mapping_mode = Some(value),
                ENV_NETWORK_MODE => config.network_mode = Some(value),
                ENV_VPERM_IDS => config.vperm_ids = Some(value),
                ENV_BINARY_NAME => config.binary_name = value,
                ENV_REAL_BINARY_NAME => config.real_binary_name = Some(value),
                ENV_ORIG_BINARY_NAME => config.orig_binary_name = Some(value),
                ENV_EXEC_POLICY_NAME => config.exec_policy_name = Some(value),
                ENV_CHROOT_PATH => {
                    if !value.starts_with('/') {
                        return Err(ConfigError::InvalidValue {
                            key: ENV_CHROOT_PATH.to_string(),
                            value,
                        });
                    }
                    config.chroot_path = Some(value);
                }
                ENV_LOG_LEVEL => config.log.level = LogLevel::parse(&value),
                ENV_LOG_FILE => config.log.file = Some(PathBuf::from(value)),
                ENV_LOG_FORMAT => {
                    config.log.format =
                        LogFormat::parse(&value).ok_or_else(|| ConfigError::InvalidValue {
                            key: ENV_LOG_FORMAT.to_string(),
                            value: value.clone(),
                        })?;
                }
                _ => {}
            }
        }

        config.session_dir = session_dir.ok_or(ConfigError::MissingSessionDir(ENV_SESSION_DIR))?;
        if config.binary_name.is_empty() {
            config.binary_name = default_binary_name();
        }
        Ok(config)
    }

    /// Build the configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(std::env::vars())
    }
}

fn default_binary_name() -> String {
    std::env::args()
        .next()
        .as_deref()
        .and_then(|argv0| argv0.rsplit('/').next())
        .unwrap_or("")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_vars_full() {
        let config = SessionConfig::from_vars([
            (ENV_SESSION_DIR, "/tmp/s1"),
            (ENV_SESSION_MODE, "emulate"),
            (ENV_NETWORK_MODE, "offline"),
            (ENV_BINARY_NAME, "gcc"),
            (ENV_EXEC_POLICY_NAME, "target"),
            (ENV_CHROOT_PATH, "/srv/root"),
            (ENV_LOG_LEVEL, "debug"),
            (ENV_LOG_FORMAT, "simple"),
            ("UNRELATED", "x"),
        ])
        .unwrap();

        assert_eq!(config.session_dir, PathBuf::from("/tmp/s1"));
        assert_eq!(config.mapping_mode.as_deref(), Some("emulate"));
        assert_eq!(config.network_mode.as_deref(), Some("offline"));
        assert_eq!(config.binary_name, "gcc");
        assert_eq!(config.exec_policy_name.as_deref(), Some("target"));
        assert_eq!(config.chroot_path.as_deref(), Some("/srv/root"));
        assert_eq!(config.log.level, LogLevel::Debug);
        assert_eq!(config.log.format, LogFormat::Simple);
    }

    #[test]
    fn test_missing_session_dir() {
        let err = SessionConfig::from_vars([(ENV_BINARY_NAME, "sh")]).unwrap_err();
        assert_eq!(err, ConfigError::MissingSessionDir(ENV_SESSION_DIR));
    }

    #[test]
    fn test_invalid_values() {
        let err = SessionConfig::from_vars([
            (ENV_SESSION_DIR, "/tmp/s"),
            (ENV_CHROOT_PATH, "relative"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));

        let err = SessionConfig::from_vars([
            (ENV_SESSION_DIR, "/tmp/s"),
            (ENV_LOG_FORMAT, "xml"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key, .. } if key == ENV_LOG_FORMAT));
    }

    #[test]
    fn test_empty_values_are_unset() {
        let config =
            SessionConfig::from_vars([(ENV_SESSION_DIR, "/tmp/s"), (ENV_CHROOT_PATH, "")]).unwrap();
        assert_eq!(config.chroot_path, None);
    }
}
