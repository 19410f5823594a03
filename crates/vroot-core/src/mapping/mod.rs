//! Path mapping engine
//!
//! [`Session`] is the per-process entry point: it owns the session
//! configuration, the shared rule tree and the process-wide chroot and cwd
//! state, and builds a [`MappingContext`] for every call.

pub mod chroot;
pub mod classes;
pub mod context;
pub mod matcher;
pub mod resolver;
pub mod reverse;

pub use classes::InterfaceClass;
pub use context::{
    active_strategy, call_depth, mapping_disabled, set_strategy, without_mapping, CallStateStrategy,
    ChrootRoot, MappingContext,
};
pub use matcher::{find_best_rule, mapping_requirements, MappingRequirements, RuleMatch};
pub use resolver::{MapFlags, MAX_SYMLINK_EXPANSIONS};

use crate::config::SessionConfig;
use crate::error::{MappingError, UnifiedError, VrootResult};
use crate::path_list::join_path;
use crate::ruletree::RuleTree;
use parking_lot::RwLock;
use std::os::unix::io::RawFd;
use std::sync::Arc;
use tracing::{info, warn};

/// Outcome of one forward mapping call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingResult {
    /// Resolved virtual path (clean, absolute) or the input when unresolved
    pub virtual_path: String,
    pub host_path: Option<String>,
    pub readonly: bool,
    /// New virtual cwd, set for `CHDIR` calls
    pub virtual_cwd: Option<String>,
    pub exec_policy: Option<String>,
    /// Rule that decided the mapping, for diagnostics
    pub rule_name: Option<String>,
    pub error: Option<MappingError>,
}

impl MappingResult {
    /// Host path equal to the input, no rule involved
    pub fn unmapped(path: &str) -> Self {
        Self {
            virtual_path: path.to_string(),
            host_path: Some(path.to_string()),
            readonly: false,
            virtual_cwd: None,
            exec_policy: None,
            rule_name: None,
            error: None,
        }
    }

    pub fn failed(path: &str, error: MappingError) -> Self {
        Self {
            virtual_path: path.to_string(),
            host_path: None,
            readonly: false,
            virtual_cwd: None,
            exec_policy: None,
            rule_name: None,
            error: Some(error),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// errno the interception layer should report, 0 on success
    pub fn errno(&self) -> i32 {
        self.error.as_ref().map_or(0, UnifiedError::errno)
    }

    /// The host path, or the mapping error
    pub fn into_result(self) -> Result<String, MappingError> {
        match (self.error, self.host_path) {
            (Some(err), _) => Err(err),
            (None, Some(host)) => Ok(host),
            (None, None) => Err(MappingError::NoRule {
                path: self.virtual_path,
            }),
        }
    }
}

/// Source of path strings for open directory handles (`*at()` calls)
pub trait DirPathLookup {
    fn dir_path(&self, dirfd: RawFd) -> Option<String>;
}

impl<F> DirPathLookup for F
where
    F: Fn(RawFd) -> Option<String>,
{
    fn dir_path(&self, dirfd: RawFd) -> Option<String> {
        self(dirfd)
    }
}

/// Per-process mapping session
#[derive(Debug)]
pub struct Session {
    config: SessionConfig,
    tree: Arc<RuleTree>,
    chroot: RwLock<Option<ChrootRoot>>,
    virtual_cwd: RwLock<Option<String>>,
}

impl Session {
    /// Create a session over an already opened rule tree.
    ///
    /// A chroot path in the configuration is restored here; if it cannot be
    /// entered the session starts without a chroot.
    pub fn new(config: SessionConfig, tree: Arc<RuleTree>) -> Self {
        let session = Self {
            config,
            tree,
            chroot: RwLock::new(None),
            virtual_cwd: RwLock::new(None),
        };
        if let Some(path) = session.config.chroot_path.clone() {
            let restored = chroot::restore_chroot(&session.base_context("chroot"), &path);
            match restored {
                Ok(root) => *session.chroot.write() = root,
                Err(e) => warn!("Could not restore chroot '{}': {}", path, e),
            }
        }
        session
    }

    /// Open the session's rule tree read-only and create the session
    pub fn open(config: SessionConfig) -> VrootResult<Self> {
        let tree = RuleTree::open_read_only(config.rule_tree_path())?;
        info!(
            "Opened rule tree {} ({} rules)",
            config.rule_tree_path().display(),
            tree.rule_count()
        );
        Ok(Self::new(config, Arc::new(tree)))
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn tree(&self) -> &Arc<RuleTree> {
        &self.tree
    }

    fn base_context<'a>(&'a self, func_name: &'a str) -> MappingContext<'a> {
        let mut ctx = MappingContext::new(&self.tree, func_name, InterfaceClass::all())
            .with_binary(&self.config.binary_name);
        ctx.exec_policy = self.config.exec_policy_name.as_deref();
        ctx.mapping_disabled = mapping_disabled();
        ctx
    }

    /// Map a virtual path to its host path
    pub fn map_path(
        &self,
        func_name: &str,
        virtual_path: &str,
        flags: MapFlags,
        class: InterfaceClass,
    ) -> MappingResult {
        let chroot = self.chroot.read();
        let cwd = self
            .virtual_cwd
            .read()
            .as_deref()
            .and_then(|cwd| cwd_in_view(chroot.as_ref(), cwd));
        let ctx = self
            .base_context(func_name)
            .with_class(class)
            .with_chroot(chroot.as_ref())
            .with_cwd(cwd.as_deref());
        resolver::forward_map(&ctx, virtual_path, flags)
    }

    /// Map a path relative to an open directory handle.
    ///
    /// Absolute paths and `AT_FDCWD` behave like [`map_path`](Self::map_path).
    /// If the handle's path is unknown the relative path is returned unmapped.
    pub fn map_path_at(
        &self,
        func_name: &str,
        dirfd: RawFd,
        lookup: &dyn DirPathLookup,
        virtual_path: &str,
        flags: MapFlags,
        class: InterfaceClass,
    ) -> MappingResult {
        if virtual_path.starts_with('/') || dirfd == libc::AT_FDCWD {
            return self.map_path(func_name, virtual_path, flags, class);
        }
        match lookup.dir_path(dirfd) {
            Some(dir) => {
                let full = join_path(&dir, virtual_path);
                self.map_path(func_name, &full, flags, class)
            }
            None => {
                warn!(
                    "{}: no path known for fd {}, '{}' left unmapped",
                    func_name, dirfd, virtual_path
                );
                MappingResult::unmapped(virtual_path)
            }
        }
    }

    /// Map a clean absolute path through `rule_list` without symlink resolution
    pub fn map_abstract_path(
        &self,
        rule_list: u32,
        virtual_path: &str,
        class: InterfaceClass,
    ) -> Option<(String, Option<String>)> {
        let chroot = self.chroot.read();
        let mut ctx = self
            .base_context("map_abstract_path")
            .with_class(class)
            .with_chroot(chroot.as_ref());
        ctx.rule_list = rule_list;
        resolver::map_abstract(&ctx, virtual_path)
    }

    /// Map a host path back to the virtual path, in the chroot's view
    pub fn reverse_path(
        &self,
        func_name: &str,
        host_path: &str,
        class: InterfaceClass,
    ) -> Option<String> {
        self.reverse_path_with(func_name, host_path, class, true)
    }

    pub fn reverse_path_with(
        &self,
        func_name: &str,
        host_path: &str,
        class: InterfaceClass,
        drop_chroot_prefix: bool,
    ) -> Option<String> {
        let chroot = self.chroot.read();
        let ctx = self
            .base_context(func_name)
            .with_class(class)
            .with_chroot(chroot.as_ref());
        match reverse::reverse_map(&ctx, host_path, drop_chroot_prefix) {
            Ok(found) => found,
            Err(e) => {
                warn!("{}: reverse mapping '{}' failed: {}", func_name, host_path, e);
                None
            }
        }
    }

    /// Enter (or, with `/`, leave) the simulated chroot
    pub fn chroot(&self, path: &str) -> Result<(), MappingError> {
        let mut current = self.chroot.write();
        let next = {
            let cwd = self.virtual_cwd.read();
            let ctx = self
                .base_context("chroot")
                .with_chroot(current.as_ref())
                .with_cwd(cwd.as_deref());
            chroot::enter_chroot(&ctx, path)?
        };
        *current = next;
        Ok(())
    }

    /// Virtual path of the active chroot, if any
    pub fn chroot_path(&self) -> Option<String> {
        self.chroot.read().as_ref().map(|r| r.virtual_path.clone())
    }

    pub fn chroot_root(&self) -> Option<ChrootRoot> {
        self.chroot.read().clone()
    }

    /// Set the cwd, given in the active chroot's view
    pub fn set_virtual_cwd(&self, cwd: Option<String>) {
        let chroot = self.chroot.read();
        *self.virtual_cwd.write() = cwd.map(|cwd| cwd_from_view(chroot.as_ref(), &cwd));
    }

    /// The cwd in the active chroot's view; `None` when it lies outside the chroot
    pub fn virtual_cwd(&self) -> Option<String> {
        let chroot = self.chroot.read();
        self.virtual_cwd
            .read()
            .as_deref()
            .and_then(|cwd| cwd_in_view(chroot.as_ref(), cwd))
    }

    /// `chdir()`: map the path and make it the virtual cwd on success
    pub fn chdir(&self, path: &str) -> Result<String, MappingError> {
        let result = self.map_path("chdir", path, MapFlags::empty(), InterfaceClass::CHDIR);
        let cwd = result.virtual_cwd.clone();
        let host = result.into_result()?;
        self.set_virtual_cwd(cwd);
        Ok(host)
    }

    /// Run `f` with mapping disabled on this thread
    pub fn without_mapping<R>(&self, f: impl FnOnce() -> R) -> R {
        without_mapping(f)
    }
}

/// An unchrooted cwd as seen from inside `chroot`
fn cwd_in_view(chroot: Option<&ChrootRoot>, cwd: &str) -> Option<String> {
    let Some(root) = chroot else {
        return Some(cwd.to_string());
    };
    match cwd.strip_prefix(root.virtual_path.as_str()) {
        Some("") => Some("/".to_string()),
        Some(rest) if rest.starts_with('/') => Some(rest.to_string()),
        _ => None,
    }
}

fn cwd_from_view(chroot: Option<&ChrootRoot>, cwd: &str) -> String {
    match chroot {
        Some(root) => join_path(&root.virtual_path, cwd.trim_start_matches('/')),
        None => cwd.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ruletree::{Action, RuleSpec};
    use tempfile::TempDir;

    fn session(rules: &[RuleSpec]) -> Session {
        let mut tree = RuleTree::create_anonymous(64 * 1024).unwrap();
        tree.load_rules(rules).unwrap();
        Session::new(
            SessionConfig::new("/tmp/vroot-session").with_binary_name("sh"),
            Arc::new(tree),
        )
    }

    #[test]
    fn test_result_accessors() {
        let ok = MappingResult::unmapped("/a");
        assert!(ok.is_ok());
        assert_eq!(ok.errno(), 0);
        assert_eq!(ok.into_result().unwrap(), "/a");

        let failed = MappingResult::failed("a", MappingError::RelativePath { path: "a".into() });
        assert_eq!(failed.errno(), libc::EINVAL);
        assert!(failed.into_result().is_err());
    }

    #[test]
    fn test_map_path_at() {
        let session = session(&[
            RuleSpec::dir("/work", Action::MapTo("/srv/build".into())),
            RuleSpec::dir("/", Action::UseOrigPath),
        ]);
        let lookup = |fd: RawFd| (fd == 7).then(|| "/work/src".to_string());
        let class = InterfaceClass::OPEN;

        let mapped = session.map_path_at("openat", 7, &lookup, "main.c", MapFlags::empty(), class);
        assert_eq!(mapped.host_path.as_deref(), Some("/srv/build/work/src/main.c"));

        let unknown = session.map_path_at("openat", 9, &lookup, "main.c", MapFlags::empty(), class);
        assert_eq!(unknown.host_path.as_deref(), Some("main.c"));

        let absolute =
            session.map_path_at("openat", 9, &lookup, "/work/x", MapFlags::empty(), class);
        assert_eq!(absolute.host_path.as_deref(), Some("/srv/build/work/x"));
    }

    #[test]
    fn test_chdir_then_relative() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("proj")).unwrap();
        let proj = dir.path().join("proj").to_string_lossy().into_owned();

        let session = session(&[RuleSpec::dir("/", Action::UseOrigPath)]);
        session.chdir(&proj).unwrap();
        assert_eq!(session.virtual_cwd().as_deref(), Some(proj.as_str()));

        let result = session.map_path("open", "file.txt", MapFlags::empty(), InterfaceClass::OPEN);
        assert_eq!(result.host_path, Some(format!("{}/file.txt", proj)));
    }

    #[test]
    fn test_chroot_lifecycle() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("jail")).unwrap();
        std::fs::write(dir.path().join("file"), b"x").unwrap();
        let jail = dir.path().join("jail").to_string_lossy().into_owned();

        let session = session(&[RuleSpec::dir("/", Action::UseOrigPath)]);
        session.chroot(&jail).unwrap();
        assert_eq!(session.chroot_path().as_deref(), Some(jail.as_str()));

        let inside = session.map_path("open", "/etc/x", MapFlags::empty(), InterfaceClass::OPEN);
        assert_eq!(inside.host_path, Some(format!("{}/etc/x", jail)));

        session.chroot("/").unwrap();
        assert_eq!(session.chroot_path(), None);

        let file = dir.path().join("file").to_string_lossy().into_owned();
        let err = session.chroot(&file).unwrap_err();
        assert!(matches!(err, MappingError::NotADirectory { .. }));
        assert_eq!(session.chroot_path(), None);
    }

    #[test]
    fn test_chroot_dot_from_root_cwd_leaves_chroot() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("sysroot/usr")).unwrap();
        let sysroot = dir.path().join("sysroot").to_string_lossy().into_owned();

        let session = session(&[RuleSpec::dir("/", Action::UseOrigPath)]);
        session.chdir("/").unwrap();
        session.chroot(&sysroot).unwrap();
        assert_eq!(session.chroot_path().as_deref(), Some(sysroot.as_str()));
        assert_eq!(session.virtual_cwd(), None);

        session.chroot(".").unwrap();
        assert_eq!(session.chroot_path(), None);
        assert_eq!(session.virtual_cwd().as_deref(), Some("/"));
    }

    #[test]
    fn test_cwd_follows_chroot_view() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("sysroot/usr")).unwrap();
        let sysroot = dir.path().join("sysroot").to_string_lossy().into_owned();

        let session = session(&[RuleSpec::dir("/", Action::UseOrigPath)]);
        session.chroot(&sysroot).unwrap();
        session.chdir("/usr").unwrap();
        assert_eq!(session.virtual_cwd().as_deref(), Some("/usr"));
        let inside = session.map_path("open", "lib", MapFlags::empty(), InterfaceClass::OPEN);
        assert_eq!(inside.host_path, Some(format!("{}/usr/lib", sysroot)));

        session.chroot("/").unwrap();
        assert_eq!(session.virtual_cwd(), Some(format!("{}/usr", sysroot)));
    }

    #[test]
    fn test_chroot_restored_from_config() {
        let dir = TempDir::new().unwrap();
        let jail = dir.path().to_string_lossy().into_owned();
        let mut tree = RuleTree::create_anonymous(64 * 1024).unwrap();
        tree.load_rules(&[RuleSpec::dir("/", Action::UseOrigPath)])
            .unwrap();
        let config = SessionConfig::new("/tmp/vroot-session").with_chroot(jail.clone());
        let session = Session::new(config, Arc::new(tree));
        assert_eq!(session.chroot_path(), Some(jail));
    }

    #[test]
    fn test_without_mapping_passes_through() {
        let session = session(&[RuleSpec::dir("/", Action::Deny)]);
        let denied = session.map_path("open", "/x", MapFlags::empty(), InterfaceClass::OPEN);
        assert_eq!(denied.errno(), libc::EACCES);

        let inside = session.without_mapping(|| {
            session.map_path("open", "/x", MapFlags::empty(), InterfaceClass::OPEN)
        });
        assert_eq!(inside.host_path.as_deref(), Some("/x"));
    }
}
