//! TOML rule definitions
//!
//! ```toml
//! [[rules]]
//! name = "toolchain"
//! dir = "/usr"
//! map_to = "/opt/target"
//! readonly = true
//! classes = ["open", "stat", "exec"]
//!
//! [[rules]]
//! prefix = "/tools"
//! [[rules.subtree]]
//! dir = "/tools/bin"
//! use_orig_path = true
//! ```

use crate::error::{ConfigError, RuleDefError};
use crate::mapping::InterfaceClass;
use crate::ruletree::{Action, RuleFlags, RuleSpec, SelectorKind};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A whole rules file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleSetDef {
    #[serde(default)]
    pub rules: Vec<RuleDef>,
}

/// One rule as written by a user
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleDef {
    pub name: Option<String>,

    pub dir: Option<String>,
    pub prefix: Option<String>,
    pub path: Option<String>,

    #[serde(default)]
    pub use_orig_path: bool,
    pub map_to: Option<String>,
    pub replace_by: Option<String>,
    pub set_path: Option<String>,
    #[serde(default)]
    pub deny: bool,
    pub if_exists_then_map_to: Option<String>,
    pub if_exists_then_replace_by: Option<String>,
    pub subtree: Option<Vec<RuleDef>>,

    #[serde(default)]
    pub readonly: bool,
    #[serde(default)]
    pub call_translate_for_all: bool,
    #[serde(default)]
    pub force_orig_path: bool,
    #[serde(default)]
    pub force_orig_path_unless_chroot: bool,

    /// Interface class names; omitted means all classes
    pub classes: Option<Vec<String>>,
    pub exec_policy: Option<String>,
    pub binary_name: Option<String>,
}

impl RuleSetDef {
    pub fn from_toml_str(source: &str) -> Result<Self, RuleDefError> {
        Ok(toml::from_str(source)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, crate::error::VrootError> {
        let path = path.as_ref();
        let source =
            std::fs::read_to_string(path).map_err(|e| ConfigError::unreadable(path, &e))?;
        Ok(Self::from_toml_str(&source)?)
    }

    /// Validate every rule and convert it into storable form
    pub fn to_specs(&self) -> Result<Vec<RuleSpec>, RuleDefError> {
        self.rules
            .iter()
            .enumerate()
            .map(|(i, rule)| rule.to_spec(&format!("#{}", i + 1)))
            .collect()
    }
}

impl RuleDef {
    /// Validate this rule; `position` identifies it in errors when it has no name
    pub fn to_spec(&self, position: &str) -> Result<RuleSpec, RuleDefError> {
        let label = self
            .name
            .clone()
            .unwrap_or_else(|| position.to_string());

        let selectors = [
            (SelectorKind::Dir, &self.dir),
            (SelectorKind::Prefix, &self.prefix),
            (SelectorKind::Path, &self.path),
        ];
        let mut given = selectors
            .iter()
            .filter_map(|(kind, value)| value.as_ref().map(|v| (*kind, v.clone())));
        let (selector_kind, selector) = match (given.next(), given.next()) {
            (Some(only), None) => only,
            _ => return Err(RuleDefError::Selector { rule: label }),
        };
        require_absolute(&label, selector_kind.as_str(), &selector)?;

        let mut actions = Vec::new();
        if self.use_orig_path {
            actions.push(Action::UseOrigPath);
        }
        if self.deny {
            actions.push(Action::Deny);
        }
        let path_actions: [(&'static str, &Option<String>, fn(String) -> Action); 5] = [
            ("map_to", &self.map_to, Action::MapTo),
            ("replace_by", &self.replace_by, Action::ReplaceBy),
            ("set_path", &self.set_path, Action::SetPath),
            (
                "if_exists_then_map_to",
                &self.if_exists_then_map_to,
                Action::IfExistsThenMapTo,
            ),
            (
                "if_exists_then_replace_by",
                &self.if_exists_then_replace_by,
                Action::IfExistsThenReplaceBy,
            ),
        ];
        for (field, value, build) in path_actions {
            if let Some(value) = value {
                require_absolute(&label, field, value)?;
                actions.push(build(value.clone()));
            }
        }
        if let Some(children) = &self.subtree {
            let nested = children
                .iter()
                .enumerate()
                .map(|(i, child)| child.to_spec(&format!("{}.{}", label, i + 1)))
                .collect::<Result<Vec<_>, _>>()?;
            actions.push(Action::Subtree(nested));
        }
        if actions.len() != 1 {
            return Err(RuleDefError::Action { rule: label });
        }
        let action = actions.remove(0);

        let mut flags = RuleFlags::empty();
        flags.set(RuleFlags::READONLY, self.readonly);
        flags.set(RuleFlags::CALL_TRANSLATE_FOR_ALL, self.call_translate_for_all);
        flags.set(RuleFlags::FORCE_ORIG_PATH, self.force_orig_path);
        flags.set(
            RuleFlags::FORCE_ORIG_PATH_UNLESS_CHROOT,
            self.force_orig_path_unless_chroot,
        );

        let classes = match &self.classes {
            Some(names) => InterfaceClass::parse_list(names)
                .map_err(|class| RuleDefError::UnknownClass {
                    rule: label.clone(),
                    class: class.to_string(),
                })?,
            None => InterfaceClass::all(),
        };

        Ok(RuleSpec {
            name: self.name.clone(),
            selector_kind,
            selector,
            action,
            flags,
            classes,
            exec_policy: self.exec_policy.clone(),
            binary_name: self.binary_name.clone(),
        })
    }
}

fn require_absolute(rule: &str, field: &'static str, value: &str) -> Result<(), RuleDefError> {
    if value.starts_with('/') {
        Ok(())
    } else {
        Err(RuleDefError::NotAbsolute {
            rule: rule.to_string(),
            field,
            value: value.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ruletree::ActionKind;

    const SAMPLE: &str = r#"
[[rules]]
name = "usr"
dir = "/usr"
map_to = "/opt/target"
readonly = true
classes = ["open", "stat"]

[[rules]]
path = "/etc/resolv.conf"
set_path = "/tmp/session/resolv.conf"
exec_policy = "host"

[[rules]]
prefix = "/tools"
[[rules.subtree]]
dir = "/tools/bin"
use_orig_path = true
[[rules.subtree]]
dir = "/tools"
deny = true
"#;

    #[test]
    fn test_parse_sample() {
        let set = RuleSetDef::from_toml_str(SAMPLE).unwrap();
        let specs = set.to_specs().unwrap();
        assert_eq!(specs.len(), 3);

        assert_eq!(specs[0].selector_kind, SelectorKind::Dir);
        assert_eq!(specs[0].action, Action::MapTo("/opt/target".into()));
        assert!(specs[0].flags.contains(RuleFlags::READONLY));
        assert_eq!(specs[0].classes, InterfaceClass::OPEN | InterfaceClass::STAT);

        assert_eq!(specs[1].exec_policy.as_deref(), Some("host"));
        assert_eq!(specs[1].classes, InterfaceClass::all());

        match &specs[2].action {
            Action::Subtree(inner) => {
                assert_eq!(inner.len(), 2);
                assert_eq!(inner[1].action.kind(), ActionKind::Deny);
            }
            other => panic!("expected subtree, got {:?}", other),
        }
    }

    #[test]
    fn test_two_selectors_rejected() {
        let set = RuleSetDef::from_toml_str(
            "[[rules]]\nname = \"bad\"\ndir = \"/a\"\nprefix = \"/a\"\nuse_orig_path = true\n",
        )
        .unwrap();
        assert_eq!(
            set.to_specs().unwrap_err(),
            RuleDefError::Selector { rule: "bad".into() }
        );
    }

    #[test]
    fn test_missing_action_rejected() {
        let set = RuleSetDef::from_toml_str("[[rules]]\ndir = \"/a\"\n").unwrap();
        assert_eq!(
            set.to_specs().unwrap_err(),
            RuleDefError::Action { rule: "#1".into() }
        );
    }

    #[test]
    fn test_unknown_class_rejected() {
        let set = RuleSetDef::from_toml_str(
            "[[rules]]\ndir = \"/a\"\ndeny = true\nclasses = [\"open\", \"fly\"]\n",
        )
        .unwrap();
        assert!(matches!(
            set.to_specs().unwrap_err(),
            RuleDefError::UnknownClass { class, .. } if class == "fly"
        ));
    }

    #[test]
    fn test_relative_target_rejected() {
        let set =
            RuleSetDef::from_toml_str("[[rules]]\ndir = \"/a\"\nmap_to = \"opt\"\n").unwrap();
        assert!(matches!(
            set.to_specs().unwrap_err(),
            RuleDefError::NotAbsolute { field: "map_to", .. }
        ));
    }

    #[test]
    fn test_unknown_key_is_parse_error() {
        let err = RuleSetDef::from_toml_str("[[rules]]\ndir = \"/a\"\nteleport = 1\n").unwrap_err();
        assert!(matches!(err, RuleDefError::Parse(_)));
    }
}
