//! Mapping rule model: selectors, actions, flags

use crate::mapping::InterfaceClass;

/// How a rule's selector string is compared with a virtual path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum SelectorKind {
    /// Path-component aligned prefix
    Dir = 1,
    /// Raw string prefix
    Prefix = 2,
    /// Exact path (one trailing `/` tolerated)
    Path = 3,
}

impl SelectorKind {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(Self::Dir),
            2 => Some(Self::Prefix),
            3 => Some(Self::Path),
            _ => None,
        }
    }

    /// Rank used to break ties between equally long matches
    pub fn specificity(self) -> u8 {
        match self {
            Self::Dir => 1,
            Self::Prefix => 2,
            Self::Path => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dir => "dir",
            Self::Prefix => "prefix",
            Self::Path => "path",
        }
    }
}

/// Stored action tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ActionKind {
    UseOrigPath = 1,
    MapTo = 2,
    ReplaceBy = 3,
    SetPath = 4,
    Deny = 5,
    IfExistsThenMapTo = 6,
    IfExistsThenReplaceBy = 7,
    Subtree = 8,
}

impl ActionKind {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(Self::UseOrigPath),
            2 => Some(Self::MapTo),
            3 => Some(Self::ReplaceBy),
            4 => Some(Self::SetPath),
            5 => Some(Self::Deny),
            6 => Some(Self::IfExistsThenMapTo),
            7 => Some(Self::IfExistsThenReplaceBy),
            8 => Some(Self::Subtree),
            _ => None,
        }
    }

    /// Whether the action argument is a string offset
    pub fn takes_path(self) -> bool {
        matches!(
            self,
            Self::MapTo
                | Self::ReplaceBy
                | Self::SetPath
                | Self::IfExistsThenMapTo
                | Self::IfExistsThenReplaceBy
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::UseOrigPath => "use_orig_path",
            Self::MapTo => "map_to",
            Self::ReplaceBy => "replace_by",
            Self::SetPath => "set_path",
            Self::Deny => "deny",
            Self::IfExistsThenMapTo => "if_exists_then_map_to",
            Self::IfExistsThenReplaceBy => "if_exists_then_replace_by",
            Self::Subtree => "subtree",
        }
    }
}

bitflags::bitflags! {
    /// Per-rule behavior flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct RuleFlags: u32 {
        /// Host path must be treated as read-only
        const READONLY = 1 << 0;
        /// Translate every prefix with its own rule lookup during resolution
        const CALL_TRANSLATE_FOR_ALL = 1 << 1;
        /// Host path is the virtual path, never chroot-prefixed
        const FORCE_ORIG_PATH = 1 << 2;
        /// Like FORCE_ORIG_PATH, but only while no chroot is active
        const FORCE_ORIG_PATH_UNLESS_CHROOT = 1 << 3;
    }
}

/// Action of a rule being built
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    UseOrigPath,
    MapTo(String),
    ReplaceBy(String),
    SetPath(String),
    Deny,
    IfExistsThenMapTo(String),
    IfExistsThenReplaceBy(String),
    Subtree(Vec<RuleSpec>),
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::UseOrigPath => ActionKind::UseOrigPath,
            Action::MapTo(_) => ActionKind::MapTo,
            Action::ReplaceBy(_) => ActionKind::ReplaceBy,
            Action::SetPath(_) => ActionKind::SetPath,
            Action::Deny => ActionKind::Deny,
            Action::IfExistsThenMapTo(_) => ActionKind::IfExistsThenMapTo,
            Action::IfExistsThenReplaceBy(_) => ActionKind::IfExistsThenReplaceBy,
            Action::Subtree(_) => ActionKind::Subtree,
        }
    }
}

/// An owned, validated rule ready to be stored in a rule tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSpec {
    pub name: Option<String>,
    pub selector_kind: SelectorKind,
    pub selector: String,
    pub action: Action,
    pub flags: RuleFlags,
    pub classes: InterfaceClass,
    pub exec_policy: Option<String>,
    pub binary_name: Option<String>,
}

impl RuleSpec {
    /// A rule applying to every interface class with no flags
    pub fn new(selector_kind: SelectorKind, selector: impl Into<String>, action: Action) -> Self {
        Self {
            name: None,
            selector_kind,
            selector: selector.into(),
            action,
            flags: RuleFlags::empty(),
            classes: InterfaceClass::all(),
            exec_policy: None,
            binary_name: None,
        }
    }

    pub fn dir(selector: impl Into<String>, action: Action) -> Self {
        Self::new(SelectorKind::Dir, selector, action)
    }

    pub fn prefix(selector: impl Into<String>, action: Action) -> Self {
        Self::new(SelectorKind::Prefix, selector, action)
    }

    pub fn path(selector: impl Into<String>, action: Action) -> Self {
        Self::new(SelectorKind::Path, selector, action)
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_flags(mut self, flags: RuleFlags) -> Self {
        self.flags |= flags;
        self
    }

    pub fn with_classes(mut self, classes: InterfaceClass) -> Self {
        self.classes = classes;
        self
    }

    pub fn with_exec_policy(mut self, policy: impl Into<String>) -> Self {
        self.exec_policy = Some(policy.into());
        self
    }

    pub fn for_binary(mut self, binary_name: impl Into<String>) -> Self {
        self.binary_name = Some(binary_name.into());
        self
    }
}

/// A rule as read back from a rule tree, borrowing its strings from the region
#[derive(Debug, Clone, Copy)]
pub struct FsRule<'t> {
    /// Offset of this rule in the tree
    pub offset: u32,
    pub selector_kind: SelectorKind,
    pub selector: &'t str,
    pub action: ActionKind,
    /// Host path for path-taking actions
    pub action_path: Option<&'t str>,
    /// Nested rule list for `subtree`
    pub subtree: u32,
    /// Flags exactly as stored, unknown bits included
    pub raw_flags: u32,
    pub classes: InterfaceClass,
    pub exec_policy: Option<&'t str>,
    pub binary_name: Option<&'t str>,
    pub name: Option<&'t str>,
}

impl<'t> FsRule<'t> {
    /// Known flags; unknown bits are dropped
    pub fn flags(&self) -> RuleFlags {
        RuleFlags::from_bits_truncate(self.raw_flags)
    }

    /// Stored flag bits this engine does not understand
    pub fn unknown_flags(&self) -> u32 {
        self.raw_flags & !RuleFlags::all().bits()
    }

    /// Name for diagnostics: the rule name or `<kind> <selector>`
    pub fn display_name(&self) -> String {
        match self.name {
            Some(name) => name.to_string(),
            None => format!("{} {}", self.selector_kind.as_str(), self.selector),
        }
    }

    /// Whether this rule applies to the given call
    pub fn applies_to(&self, class: InterfaceClass, binary_name: &str) -> bool {
        if !self.classes.intersects(class) {
            return false;
        }
        match self.binary_name {
            Some(only) => only == binary_name,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_roundtrip_of_tags() {
        for kind in [SelectorKind::Dir, SelectorKind::Prefix, SelectorKind::Path] {
            assert_eq!(SelectorKind::from_raw(kind as u32), Some(kind));
        }
        assert_eq!(SelectorKind::from_raw(0), None);
        assert_eq!(ActionKind::from_raw(8), Some(ActionKind::Subtree));
        assert_eq!(ActionKind::from_raw(99), None);
    }

    #[test]
    fn test_specificity_order() {
        assert!(SelectorKind::Path.specificity() > SelectorKind::Prefix.specificity());
        assert!(SelectorKind::Prefix.specificity() > SelectorKind::Dir.specificity());
    }

    #[test]
    fn test_builder() {
        let rule = RuleSpec::dir("/usr", Action::MapTo("/opt/target".into()))
            .named("usr")
            .with_flags(RuleFlags::READONLY)
            .with_classes(InterfaceClass::OPEN | InterfaceClass::STAT)
            .for_binary("gcc");
        assert_eq!(rule.name.as_deref(), Some("usr"));
        assert!(rule.flags.contains(RuleFlags::READONLY));
        assert_eq!(rule.action.kind(), ActionKind::MapTo);
        assert!(!rule.classes.contains(InterfaceClass::EXEC));
        assert_eq!(rule.binary_name.as_deref(), Some("gcc"));
    }
}
