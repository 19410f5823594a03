//! Reverse mapping: host path back to the virtual path a program would see
//!
//! Used for diagnostics and for calls that hand paths back to the program
//! (getcwd, readlink of mapped links). Every rule's host-side target is
//! tried as a prefix of the host path; a candidate is accepted only if
//! mapping it forward selects a rule that produces the same host path.

use super::context::MappingContext;
use super::resolver::{map_resolved, prepend_root, with_chroot};
use super::InterfaceClass;
use crate::error::MappingError;
use crate::path_list::{join_path, PathList};
use crate::ruletree::{ActionKind, FsRule, RuleFlags, SelectorKind};
use tracing::{debug, trace};

const MAX_SUBTREE_DEPTH: usize = 16;

/// Host-side prefix a rule produces, paired with the virtual prefix it serves
#[derive(Debug, Clone, PartialEq, Eq)]
struct Candidate {
    host_prefix: String,
    virtual_prefix: String,
    kind: SelectorKind,
}

impl Candidate {
    /// Remainder of `host` after this candidate's prefix, if it covers `host`
    fn remainder<'h>(&self, host: &'h str) -> Option<&'h str> {
        let rest = host.strip_prefix(self.host_prefix.as_str())?;
        match self.kind {
            SelectorKind::Path => (rest.is_empty() || rest == "/").then_some(""),
            SelectorKind::Prefix => Some(rest),
            SelectorKind::Dir => {
                let aligned =
                    rest.is_empty() || rest.starts_with('/') || self.host_prefix.ends_with('/');
                aligned.then_some(rest)
            }
        }
    }

    fn virtual_for(&self, remainder: &str) -> String {
        if remainder.is_empty() {
            return self.virtual_prefix.clone();
        }
        if remainder.starts_with('/') {
            format!("{}{}", self.virtual_prefix.trim_end_matches('/'), remainder)
        } else if self.kind == SelectorKind::Dir {
            join_path(&self.virtual_prefix, remainder)
        } else {
            format!("{}{}", self.virtual_prefix, remainder)
        }
    }
}

fn candidate_for(ctx: &MappingContext<'_>, rule: &FsRule<'_>) -> Option<Candidate> {
    let flags = rule.flags();
    let forced = flags.contains(RuleFlags::FORCE_ORIG_PATH)
        || (flags.contains(RuleFlags::FORCE_ORIG_PATH_UNLESS_CHROOT) && ctx.chroot.is_none());
    let host_prefix = if forced {
        rule.selector.to_string()
    } else {
        let unchrooted = match rule.action {
            ActionKind::UseOrigPath => rule.selector.to_string(),
            ActionKind::MapTo | ActionKind::IfExistsThenMapTo => {
                prepend_root(rule.action_path?, rule.selector)
            }
            ActionKind::ReplaceBy | ActionKind::IfExistsThenReplaceBy | ActionKind::SetPath => {
                rule.action_path?.to_string()
            }
            ActionKind::Deny | ActionKind::Subtree => return None,
        };
        with_chroot(ctx.chroot, unchrooted)
    };
    let kind = if rule.action == ActionKind::SetPath {
        SelectorKind::Path
    } else {
        rule.selector_kind
    };
    Some(Candidate {
        host_prefix,
        virtual_prefix: rule.selector.to_string(),
        kind,
    })
}

fn collect_candidates(
    ctx: &MappingContext<'_>,
    list: u32,
    depth: usize,
    out: &mut Vec<Candidate>,
) -> Result<(), MappingError> {
    if list == 0 || depth > MAX_SUBTREE_DEPTH {
        return Ok(());
    }
    for rule in ctx.tree.rules(list)? {
        if !rule.applies_to(ctx.class, ctx.binary_name) {
            continue;
        }
        if rule.action == ActionKind::Subtree {
            collect_candidates(ctx, rule.subtree, depth + 1, out)?;
        } else if let Some(candidate) = candidate_for(ctx, &rule) {
            out.push(candidate);
        }
    }
    Ok(())
}

/// Map `host_path` back to a virtual path.
///
/// Returns `None` when no rule covers the path; callers then treat the host
/// path as already virtual. With a chroot active the result is in the
/// chroot's view, unless `drop_chroot_prefix` is false, in which case the
/// chroot's own virtual path is put back in front.
pub fn reverse_map(
    ctx: &MappingContext<'_>,
    host_path: &str,
    drop_chroot_prefix: bool,
) -> Result<Option<String>, MappingError> {
    if !host_path.starts_with('/') {
        return Err(MappingError::RelativePath {
            path: host_path.to_string(),
        });
    }
    let host = PathList::split(host_path).lexical_clean().to_plain_string();

    let mut candidates = Vec::new();
    collect_candidates(ctx, ctx.rule_list, 0, &mut candidates)?;
    // longest host-side match first
    candidates.sort_by(|a, b| b.host_prefix.len().cmp(&a.host_prefix.len()));

    for candidate in &candidates {
        let Some(remainder) = candidate.remainder(&host) else {
            continue;
        };
        let virtual_path = candidate.virtual_for(remainder);
        let forward = match map_resolved(ctx, &PathList::split(&virtual_path)) {
            Ok(result) => result.host_path,
            Err(_) => continue,
        };
        if forward.as_deref() != Some(host.as_str()) {
            trace!(
                "reverse candidate '{}' maps forward to {:?}, not '{}'",
                virtual_path, forward, host
            );
            continue;
        }
        let virtual_path = match ctx.chroot {
            Some(root) if !drop_chroot_prefix => {
                let inner = virtual_path.trim_start_matches('/');
                join_path(&root.virtual_path, inner)
            }
            _ => virtual_path,
        };
        debug!("{}: reverse '{}' -> '{}'", ctx.func_name, host_path, virtual_path);
        return Ok(Some(virtual_path));
    }
    Ok(None)
}

/// Reverse map for a call class, returning the input unchanged when nothing covers it
pub fn reverse_or_identity(ctx: &MappingContext<'_>, host_path: &str) -> String {
    let ctx = ctx.with_class(ctx.class | InterfaceClass::GETCWD);
    match reverse_map(&ctx, host_path, true) {
        Ok(Some(virtual_path)) => virtual_path,
        _ => host_path.to_string(),
    }
}
