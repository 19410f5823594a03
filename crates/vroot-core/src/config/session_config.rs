//! Immutable per-process session configuration

use super::logging_config::LogSettings;
use std::path::{Path, PathBuf};

/// File name of the compiled rule tree inside the session directory
pub const RULE_TREE_FILE: &str = "RuleTree.bin";
/// File name of the vperm daemon socket inside the session directory
pub const DAEMON_SOCKET_FILE: &str = "vrootd.sock";
/// File name of the default rules file inside the session directory
pub const RULES_FILE: &str = "rules.toml";

/// Session settings, built once at process start and passed by reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub session_dir: PathBuf,
    /// Forced mapping mode; selects `rules.<mode>.toml`
    pub mapping_mode: Option<String>,
    pub network_mode: Option<String>,
    /// Name of the calling binary, used for rule selection
    pub binary_name: String,
    pub real_binary_name: Option<String>,
    pub orig_binary_name: Option<String>,
    /// Exec policy active at process start
    pub exec_policy_name: Option<String>,
    /// Simulated chroot restored at process start
    pub chroot_path: Option<String>,
    /// Simulated identity string handed to the vperm layer
    pub vperm_ids: Option<String>,
    pub log: LogSettings,
}

impl SessionConfig {
    /// Minimal configuration for a session directory
    pub fn new(session_dir: impl Into<PathBuf>) -> Self {
        Self {
            session_dir: session_dir.into(),
            mapping_mode: None,
            network_mode: None,
            binary_name: String::new(),
            real_binary_name: None,
            orig_binary_name: None,
            exec_policy_name: None,
            chroot_path: None,
            vperm_ids: None,
            log: LogSettings::default(),
        }
    }

    pub fn with_binary_name(mut self, binary_name: impl Into<String>) -> Self {
        self.binary_name = binary_name.into();
        self
    }

    pub fn with_chroot(mut self, chroot_path: impl Into<String>) -> Self {
        self.chroot_path = Some(chroot_path.into());
        self
    }

    pub fn with_exec_policy(mut self, policy: impl Into<String>) -> Self {
        self.exec_policy_name = Some(policy.into());
        self
    }

    pub fn session_dir(&self) -> &Path {
        &self.session_dir
    }

    pub fn rule_tree_path(&self) -> PathBuf {
        self.session_dir.join(RULE_TREE_FILE)
    }

    pub fn socket_path(&self) -> PathBuf {
        self.session_dir.join(DAEMON_SOCKET_FILE)
    }

    pub fn rules_path(&self) -> PathBuf {
        match &self.mapping_mode {
            Some(mode) => self.session_dir.join(format!("rules.{}.toml", mode)),
            None => self.session_dir.join(RULES_FILE),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_paths() {
        let config = SessionConfig::new("/tmp/sess");
        assert_eq!(config.rule_tree_path(), PathBuf::from("/tmp/sess/RuleTree.bin"));
        assert_eq!(config.socket_path(), PathBuf::from("/tmp/sess/vrootd.sock"));
        assert_eq!(config.rules_path(), PathBuf::from("/tmp/sess/rules.toml"));
    }

    #[test]
    fn test_mapping_mode_selects_rules_file() {
        let mut config = SessionConfig::new("/tmp/sess");
        config.mapping_mode = Some("emulate".into());
        assert_eq!(
            config.rules_path(),
            PathBuf::from("/tmp/sess/rules.emulate.toml")
        );
    }
}
