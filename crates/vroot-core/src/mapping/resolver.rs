//! Forward mapping: virtual path to host path
//!
//! The resolver walks the virtual path one component at a time. Before a
//! component is crossed, the prefix built so far is translated to the host
//! and checked with `lstat`; a symlink there is expanded in the virtual view
//! and processing restarts with rules re-evaluated for the new path. Prefixes
//! covered by the governing rule's match are taken as-is. Once the virtual
//! path is fully resolved, the best rule for it decides the host path.

use super::context::{ChrootRoot, MappingContext};
use super::matcher::{find_best_rule, mapping_requirements};
use super::{InterfaceClass, MappingResult};
use crate::config::LogLevel;
use crate::error::MappingError;
use crate::logging;
use crate::path_list::PathList;
use crate::ruletree::{ActionKind, FsRule, RuleFlags};
use std::collections::VecDeque;
use std::io::ErrorKind;
use tracing::{debug, trace, warn};

/// Symlink expansions allowed in one mapping call
pub const MAX_SYMLINK_EXPANSIONS: usize = 40;

bitflags::bitflags! {
    /// Caller-supplied mapping options
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MapFlags: u32 {
        /// Leave a trailing symlink unresolved (lstat, readlink, unlink...)
        const DONT_RESOLVE_FINAL_SYMLINK = 1 << 0;
    }
}

/// Host-side outcome of applying one rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Translation {
    pub host_path: String,
    pub readonly: bool,
    pub exec_policy: Option<String>,
    pub rule_name: Option<String>,
}

/// Map `path` for the call described by `ctx`
pub fn forward_map(ctx: &MappingContext<'_>, path: &str, flags: MapFlags) -> MappingResult {
    if ctx.mapping_disabled {
        return MappingResult::unmapped(path);
    }
    match map_checked(ctx, path, flags) {
        Ok(result) => {
            debug!(
                "{}: '{}' -> '{}'",
                ctx.func_name,
                path,
                result.host_path.as_deref().unwrap_or("")
            );
            result
        }
        Err(err) => {
            logging::emit(
                LogLevel::Notice,
                &format!("{}: mapping '{}' failed: {}", ctx.func_name, path, err),
            );
            MappingResult::failed(path, err)
        }
    }
}

fn map_checked(
    ctx: &MappingContext<'_>,
    path: &str,
    flags: MapFlags,
) -> Result<MappingResult, MappingError> {
    let input = absolute_input(ctx, path)?;
    let resolved = resolve(ctx, &input, flags)?;
    map_resolved(ctx, &resolved)
}

/// Anchor a possibly relative path at the context's virtual cwd
pub fn absolute_input(ctx: &MappingContext<'_>, path: &str) -> Result<PathList, MappingError> {
    let list = PathList::split(path);
    if list.is_absolute() {
        return Ok(list);
    }
    match ctx.virtual_cwd {
        Some(cwd) if !path.is_empty() => Ok(PathList::split(cwd).join(&list)),
        _ => Err(MappingError::RelativePath {
            path: path.to_string(),
        }),
    }
}

/// Which rule translates intermediate prefixes while resolving one path
struct ResolutionPlan<'t> {
    rule: Option<FsRule<'t>>,
    match_len: usize,
    per_prefix: bool,
    /// Rules that never touch the filesystem
    skip_checks: bool,
}

impl<'t> ResolutionPlan<'t> {
    fn for_path(ctx: &MappingContext<'t>, path: &str) -> Result<Self, MappingError> {
        let (requirements, rule) =
            mapping_requirements(ctx.tree, ctx.rule_list, path, ctx.class, ctx.binary_name)?;
        let skip_checks = rule
            .as_ref()
            .is_some_and(|r| matches!(r.action, ActionKind::SetPath | ActionKind::Deny));
        trace!(
            "resolution plan for '{}': min_path_len={} translate_for_all={}",
            path, requirements.min_path_len, requirements.call_translate_for_all
        );
        Ok(Self {
            rule,
            match_len: requirements.min_path_len,
            per_prefix: requirements.call_translate_for_all,
            skip_checks,
        })
    }

    /// Host path of a virtual prefix, or None if it must not be inspected
    fn host_of_prefix(
        &self,
        ctx: &MappingContext<'t>,
        prefix: &str,
    ) -> Result<Option<String>, MappingError> {
        let translation = if self.per_prefix {
            let found =
                find_best_rule(ctx.tree, ctx.rule_list, prefix, ctx.class, ctx.binary_name)?;
            let rule = found.map(|m| ctx.tree.get_rule(m.offset)).transpose()?;
            translate(ctx, rule.as_ref(), found.map_or(0, |m| m.match_len), prefix)
        } else {
            translate(ctx, self.rule.as_ref(), self.match_len, prefix)
        };
        match translation {
            Ok(t) => Ok(Some(t.host_path)),
            Err(MappingError::Denied { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }
}

fn remaining_view(resolved: &PathList, pending: &VecDeque<String>, trailing: bool) -> String {
    let mut full = resolved.clone();
    for component in pending {
        full.push(component.clone());
    }
    let mut full = full.lexical_clean();
    full.set_trailing_slash(trailing);
    full.to_string()
}

/// Resolve symlinks and `..` in the virtual view
pub fn resolve(
    ctx: &MappingContext<'_>,
    input: &PathList,
    flags: MapFlags,
) -> Result<PathList, MappingError> {
    let trailing = input.has_trailing_slash();
    let mut pending: VecDeque<String> = input.components().iter().cloned().collect();
    let mut resolved = PathList::root();
    let mut plan = ResolutionPlan::for_path(ctx, &remaining_view(&resolved, &pending, trailing))?;
    let mut expansions = 0usize;
    let mut host_missing = false;

    while let Some(component) = pending.pop_front() {
        if component == ".." {
            if resolved.pop().is_none() {
                return Err(MappingError::PathEscapesRoot {
                    path: input.to_string(),
                });
            }
            host_missing = false;
            continue;
        }
        resolved.push(component);

        let is_last = pending.is_empty();
        if is_last && !trailing && flags.contains(MapFlags::DONT_RESOLVE_FINAL_SYMLINK) {
            continue;
        }
        if plan.skip_checks || host_missing {
            continue;
        }
        let prefix = resolved.to_plain_string();
        if prefix.len() <= plan.match_len {
            continue;
        }
        let Some(host_prefix) = plan.host_of_prefix(ctx, &prefix)? else {
            continue;
        };

        let metadata = match std::fs::symlink_metadata(&host_prefix) {
            Ok(metadata) => metadata,
            Err(err) => {
                if err.kind() == ErrorKind::NotFound && !plan.per_prefix {
                    host_missing = true;
                }
                continue;
            }
        };
        if !metadata.file_type().is_symlink() {
            continue;
        }

        expansions += 1;
        if expansions > MAX_SYMLINK_EXPANSIONS {
            return Err(MappingError::SymlinkLoop {
                path: input.to_string(),
                steps: MAX_SYMLINK_EXPANSIONS,
            });
        }
        let target = std::fs::read_link(&host_prefix)
            .map_err(|e| MappingError::io(host_prefix.clone(), &e))?;
        let target = PathList::split(&target.to_string_lossy());
        trace!("{}: symlink '{}' -> '{}'", ctx.func_name, prefix, target);

        resolved.pop();
        if target.is_absolute() {
            resolved = PathList::root();
        }
        for component in target.components().iter().rev() {
            pending.push_front(component.clone());
        }
        plan = ResolutionPlan::for_path(ctx, &remaining_view(&resolved, &pending, trailing))?;
    }

    resolved.set_trailing_slash(trailing);
    Ok(resolved)
}

/// Translate an already resolved virtual path
pub fn map_resolved(
    ctx: &MappingContext<'_>,
    resolved: &PathList,
) -> Result<MappingResult, MappingError> {
    let virtual_path = resolved.to_string();
    let found = find_best_rule(ctx.tree, ctx.rule_list, &virtual_path, ctx.class, ctx.binary_name)?;
    let rule = found.map(|m| ctx.tree.get_rule(m.offset)).transpose()?;
    let translation = translate(ctx, rule.as_ref(), found.map_or(0, |m| m.match_len), &virtual_path)?;

    let plain = resolved.to_plain_string();
    Ok(MappingResult {
        virtual_cwd: ctx
            .class
            .contains(InterfaceClass::CHDIR)
            .then(|| plain.clone()),
        virtual_path: plain,
        host_path: Some(translation.host_path),
        readonly: translation.readonly,
        exec_policy: translation
            .exec_policy
            .or_else(|| ctx.exec_policy.map(str::to_string)),
        rule_name: translation.rule_name,
        error: None,
    })
}

/// Apply `rule` (matched over `match_len` bytes) to a virtual path
pub fn translate(
    ctx: &MappingContext<'_>,
    rule: Option<&FsRule<'_>>,
    match_len: usize,
    virtual_path: &str,
) -> Result<Translation, MappingError> {
    let Some(rule) = rule else {
        warn!(
            "{}: no rule for '{}', using it unmapped",
            ctx.func_name, virtual_path
        );
        return Ok(Translation {
            host_path: with_chroot(ctx.chroot, virtual_path.to_string()),
            readonly: false,
            exec_policy: None,
            rule_name: None,
        });
    };
    if rule.unknown_flags() != 0 {
        warn!(
            "rule '{}' carries unknown flags {:#x}, ignoring them",
            rule.display_name(),
            rule.unknown_flags()
        );
    }

    let flags = rule.flags();
    let force_orig = flags.contains(RuleFlags::FORCE_ORIG_PATH)
        || (flags.contains(RuleFlags::FORCE_ORIG_PATH_UNLESS_CHROOT) && ctx.chroot.is_none());
    let host_path = if force_orig {
        virtual_path.to_string()
    } else {
        apply_action(ctx, rule, match_len, virtual_path)?
    };

    Ok(Translation {
        host_path,
        readonly: flags.contains(RuleFlags::READONLY),
        exec_policy: rule.exec_policy.map(str::to_string),
        rule_name: Some(rule.display_name()),
    })
}

/// Host path from the rule's action, chroot prefix included
fn apply_action(
    ctx: &MappingContext<'_>,
    rule: &FsRule<'_>,
    match_len: usize,
    virtual_path: &str,
) -> Result<String, MappingError> {
    let target = || {
        rule.action_path.ok_or_else(|| MappingError::InvalidResult {
            path: virtual_path.to_string(),
            rule: rule.display_name(),
            reason: format!("{} without a target path", rule.action.as_str()),
        })
    };
    let remainder = virtual_path.get(match_len..).unwrap_or("");

    let mapped = match rule.action {
        ActionKind::UseOrigPath => virtual_path.to_string(),
        ActionKind::MapTo => prepend_root(target()?, virtual_path),
        ActionKind::ReplaceBy => replace_prefix(target()?, remainder),
        ActionKind::SetPath => target()?.to_string(),
        ActionKind::Deny => {
            return Err(MappingError::Denied {
                path: virtual_path.to_string(),
                rule: rule.display_name(),
            });
        }
        ActionKind::IfExistsThenMapTo | ActionKind::IfExistsThenReplaceBy => {
            let candidate = if rule.action == ActionKind::IfExistsThenMapTo {
                prepend_root(target()?, virtual_path)
            } else {
                replace_prefix(target()?, remainder)
            };
            let candidate = with_chroot(ctx.chroot, candidate);
            if std::fs::symlink_metadata(&candidate).is_ok() {
                return Ok(candidate);
            }
            trace!("'{}' does not exist, passing '{}' through", candidate, virtual_path);
            virtual_path.to_string()
        }
        ActionKind::Subtree => {
            return Err(MappingError::InvalidResult {
                path: virtual_path.to_string(),
                rule: rule.display_name(),
                reason: "subtree rules cannot translate a path".to_string(),
            });
        }
    };
    Ok(with_chroot(ctx.chroot, mapped))
}

/// `root` + `path`, where a root of `/` is the identity
pub fn prepend_root(root: &str, path: &str) -> String {
    let root = root.trim_end_matches('/');
    if root.is_empty() {
        path.to_string()
    } else if path == "/" {
        root.to_string()
    } else {
        format!("{}{}", root, path)
    }
}

/// `replacement` followed by the unmatched `remainder`
pub fn replace_prefix(replacement: &str, remainder: &str) -> String {
    if remainder.is_empty() {
        return replacement.to_string();
    }
    if remainder.starts_with('/') {
        let base = replacement.trim_end_matches('/');
        format!("{}{}", base, remainder)
    } else {
        format!("{}{}", replacement, remainder)
    }
}

/// Prefix a host path with the active chroot's host path
pub fn with_chroot(chroot: Option<&ChrootRoot>, host_path: String) -> String {
    match chroot {
        Some(root) if root.host_path != "/" => prepend_root(&root.host_path, &host_path),
        _ => host_path,
    }
}

/// Map a clean absolute path without symlink resolution
pub fn map_abstract(ctx: &MappingContext<'_>, path: &str) -> Option<(String, Option<String>)> {
    let list = PathList::split(path);
    if !list.is_absolute() || !list.is_clean() {
        return None;
    }
    let result = map_resolved(ctx, &list).ok()?;
    Some((result.host_path?, result.exec_policy))
}

#[cfg(test)]
#[path = "resolver_tests.rs"]
mod resolver_tests;
