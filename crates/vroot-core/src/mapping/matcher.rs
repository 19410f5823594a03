//! Best-rule selection for a clean absolute virtual path
//!
//! Every rule whose class mask intersects the call's class (and whose binary
//! restriction, if any, names the caller) is tested. The winner has the
//! longest match; equal lengths go to the more specific selector
//! (`path` > `prefix` > `dir`), and remaining ties to the rule that comes
//! first in list order.

use super::InterfaceClass;
use crate::error::RuleTreeError;
use crate::ruletree::{ActionKind, FsRule, RuleFlags, RuleTree, SelectorKind, TreeResult};

/// Nesting limit for subtree rules
const MAX_SUBTREE_DEPTH: usize = 16;

/// The selected rule and how much of the path it matched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleMatch {
    pub offset: u32,
    pub match_len: usize,
    pub kind: SelectorKind,
}

/// What the resolver must do before the final translation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MappingRequirements {
    pub rule: Option<RuleMatch>,
    /// Prefixes no longer than this are taken as-is, without symlink checks
    pub min_path_len: usize,
    /// Look up a rule for every prefix instead of reusing the full-path rule
    pub call_translate_for_all: bool,
}

/// Match length of one selector against `path`, if it matches at all
pub fn selector_match_len(kind: SelectorKind, selector: &str, path: &str) -> Option<usize> {
    match kind {
        SelectorKind::Dir => {
            if !path.starts_with(selector) {
                return None;
            }
            let aligned = selector == "/"
                || path.len() == selector.len()
                || path.as_bytes()[selector.len()] == b'/';
            aligned.then_some(selector.len())
        }
        SelectorKind::Prefix => path.starts_with(selector).then_some(selector.len()),
        SelectorKind::Path => {
            let exact = path == selector;
            let trailing_slash = path.len() == selector.len() + 1
                && path.ends_with('/')
                && path.starts_with(selector);
            (exact || trailing_slash).then_some(selector.len())
        }
    }
}

/// Find the best rule for `path` in `list`
pub fn find_best_rule(
    tree: &RuleTree,
    list: u32,
    path: &str,
    class: InterfaceClass,
    binary_name: &str,
) -> TreeResult<Option<RuleMatch>> {
    best_in_list(tree, list, path, class, binary_name, 0)
}

fn best_in_list(
    tree: &RuleTree,
    list: u32,
    path: &str,
    class: InterfaceClass,
    binary_name: &str,
    depth: usize,
) -> TreeResult<Option<RuleMatch>> {
    if depth > MAX_SUBTREE_DEPTH {
        return Err(RuleTreeError::Corrupt(format!(
            "subtree nesting deeper than {} at list {}",
            MAX_SUBTREE_DEPTH, list
        )));
    }
    if list == 0 {
        return Ok(None);
    }

    let mut best: Option<RuleMatch> = None;
    for offset in tree.list_items(list)? {
        let rule = tree.get_rule(offset)?;
        if !rule.applies_to(class, binary_name) {
            continue;
        }
        let Some(match_len) = selector_match_len(rule.selector_kind, rule.selector, path) else {
            continue;
        };
        let candidate = if rule.action == ActionKind::Subtree {
            match best_in_list(tree, rule.subtree, path, class, binary_name, depth + 1)? {
                Some(inner) => inner,
                None => continue,
            }
        } else {
            RuleMatch {
                offset,
                match_len,
                kind: rule.selector_kind,
            }
        };
        if is_better(&candidate, best.as_ref()) {
            best = Some(candidate);
        }
    }
    Ok(best)
}

fn is_better(candidate: &RuleMatch, current: Option<&RuleMatch>) -> bool {
    match current {
        None => true,
        Some(current) => {
            candidate.match_len > current.match_len
                || (candidate.match_len == current.match_len
                    && candidate.kind.specificity() > current.kind.specificity())
        }
    }
}

/// Rule and resolution requirements for `path`
pub fn mapping_requirements<'t>(
    tree: &'t RuleTree,
    list: u32,
    path: &str,
    class: InterfaceClass,
    binary_name: &str,
) -> TreeResult<(MappingRequirements, Option<FsRule<'t>>)> {
    let Some(found) = find_best_rule(tree, list, path, class, binary_name)? else {
        return Ok((MappingRequirements::default(), None));
    };
    let rule = tree.get_rule(found.offset)?;
    let requirements = MappingRequirements {
        rule: Some(found),
        min_path_len: found.match_len,
        call_translate_for_all: rule.flags().contains(RuleFlags::CALL_TRANSLATE_FOR_ALL),
    };
    Ok((requirements, Some(rule)))
}
