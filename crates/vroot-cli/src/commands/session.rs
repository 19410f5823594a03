//! Building a mapping session from command-line options

use crate::args::MappingArgs;
use anyhow::{Context, anyhow};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;
use vroot_core::ruletree::layout::DEFAULT_CAPACITY;
use vroot_core::{InterfaceClass, RuleSetDef, RuleTree, Session, SessionConfig};

/// Open the session described by `args`.
///
/// An explicit `--rules` file is compiled into a private in-memory tree.
/// Otherwise the session's compiled tree is used, falling back to its rules
/// file when no tree has been built yet.
pub fn open_session(args: &MappingArgs) -> anyhow::Result<Session> {
    let config = SessionConfig::new(&args.session.session)
        .with_binary_name(args.binary.as_deref().unwrap_or("vroot"));

    let session = match &args.session.rules {
        Some(rules) => session_from_rules(config, rules)?,
        None if config.rule_tree_path().exists() => {
            let tree_path = config.rule_tree_path();
            Session::open(config)
                .with_context(|| format!("Failed to open rule tree {}", tree_path.display()))?
        }
        None => {
            let rules = config.rules_path();
            if !rules.exists() {
                return Err(anyhow!(
                    "No rule tree or rules file in {}",
                    config.session_dir().display()
                ));
            }
            session_from_rules(config, &rules)?
        }
    };

    if let Some(chroot) = &args.chroot {
        session
            .chroot(chroot)
            .with_context(|| format!("Cannot enter chroot {}", chroot))?;
    }
    Ok(session)
}

fn session_from_rules(config: SessionConfig, rules: &Path) -> anyhow::Result<Session> {
    let specs = RuleSetDef::from_file(rules)?
        .to_specs()
        .with_context(|| format!("Invalid rules in {}", rules.display()))?;
    let mut tree = RuleTree::create_anonymous(DEFAULT_CAPACITY)?;
    tree.load_rules(&specs)?;
    debug!("Loaded {} rules from {}", specs.len(), rules.display());
    Ok(Session::new(config, Arc::new(tree)))
}

/// Interface classes named on the command line; none means `open`
/// Classes from `--class`; without any, the classes of the simulated function
pub fn call_classes(names: &[String], func: &str) -> anyhow::Result<InterfaceClass> {
    if !names.is_empty() {
        return InterfaceClass::parse_list(names)
            .map_err(|name| anyhow!("Unknown interface class '{}'", name));
    }
    Ok(InterfaceClass::for_function(func).unwrap_or_else(|| {
        debug!("No interface class known for '{}', mapping as open", func);
        InterfaceClass::OPEN
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::SessionArgs;
    use tempfile::TempDir;

    fn mapping_args(dir: &TempDir, rules: Option<&str>) -> MappingArgs {
        MappingArgs {
            session: SessionArgs {
                session: dir.path().to_path_buf(),
                rules: rules.map(|r| dir.path().join(r)),
            },
            classes: Vec::new(),
            binary: None,
            chroot: None,
            json: false,
        }
    }

    #[test]
    fn test_call_classes() {
        let classes = call_classes(&["stat".to_string(), "exec".to_string()], "open").unwrap();
        assert_eq!(classes, InterfaceClass::STAT | InterfaceClass::EXEC);
        let err = call_classes(&["bogus".to_string()], "open").unwrap_err();
        assert!(err.to_string().contains("bogus"));
    }

    #[test]
    fn test_call_classes_from_function_name() {
        assert_eq!(call_classes(&[], "execve").unwrap(), InterfaceClass::EXEC);
        assert_eq!(call_classes(&[], "lstat").unwrap(), InterfaceClass::STAT);
        assert_eq!(call_classes(&[], "my_wrapper").unwrap(), InterfaceClass::OPEN);
    }

    #[test]
    fn test_open_session_from_session_rules_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("rules.toml"),
            "[[rules]]\ndir = \"/usr\"\nmap_to = \"/opt/t\"\n",
        )
        .unwrap();
        let session = open_session(&mapping_args(&dir, None)).unwrap();
        assert_eq!(session.tree().rule_count(), 1);
        assert_eq!(session.config().binary_name, "vroot");
    }

    #[test]
    fn test_open_session_without_rules_fails() {
        let dir = TempDir::new().unwrap();
        let err = open_session(&mapping_args(&dir, None)).unwrap_err();
        assert!(err.to_string().contains("No rule tree"));
    }

    #[test]
    fn test_open_session_bad_rules_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("bad.toml"), "[[rules]]\ndir = \"/\"\n").unwrap();
        assert!(open_session(&mapping_args(&dir, Some("bad.toml"))).is_err());
    }
}
