//! Simulated chroot
//!
//! The chroot is a per-process view change: once active, every virtual path
//! is interpreted relative to the chroot's virtual root and every host path
//! produced by the resolver gets the chroot's host path in front.
//!
//! The cwd survives chroot changes, as with chroot(2), and relative chroot
//! paths are taken from it. `chdir("/")`, `chroot(sysroot)`, `chroot(".")`
//! therefore ends back outside the chroot.

use super::context::{ChrootRoot, MappingContext};
use super::resolver::{forward_map, MapFlags};
use super::InterfaceClass;
use crate::error::MappingError;
use crate::path_list::join_path;
use tracing::info;

/// Compute the chroot state after `chroot(path)`.
///
/// `ctx.chroot` is the state before the call and `ctx.virtual_cwd` the cwd
/// in the unchrooted view. `Ok(None)` means the chroot becomes inactive. On
/// error the caller keeps its previous state.
pub fn enter_chroot(
    ctx: &MappingContext<'_>,
    path: &str,
) -> Result<Option<ChrootRoot>, MappingError> {
    if !path.starts_with('/') {
        return enter_relative(ctx, path);
    }
    let ctx = ctx.with_class(InterfaceClass::CHROOT);
    let result = forward_map(&ctx, path, MapFlags::empty());
    if let Some(err) = result.error {
        return Err(err);
    }
    if result.virtual_path == "/" {
        if ctx.chroot.is_some() {
            info!("chroot(\"{}\"): leaving simulated chroot", path);
        }
        return Ok(None);
    }

    let host_path = result.host_path.ok_or_else(|| MappingError::NotFound {
        path: path.to_string(),
    })?;
    let metadata = std::fs::metadata(&host_path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => MappingError::NotFound {
            path: path.to_string(),
        },
        _ => MappingError::io(host_path.clone(), &e),
    })?;
    if !metadata.is_dir() {
        return Err(MappingError::NotADirectory {
            path: path.to_string(),
        });
    }

    let virtual_path = match ctx.chroot {
        Some(current) => join_path(
            &current.virtual_path,
            result.virtual_path.trim_start_matches('/'),
        ),
        None => result.virtual_path,
    };
    info!("chroot(\"{}\"): virtual root '{}' at '{}'", path, virtual_path, host_path);
    Ok(Some(ChrootRoot {
        virtual_path,
        host_path,
    }))
}

fn enter_relative(
    ctx: &MappingContext<'_>,
    path: &str,
) -> Result<Option<ChrootRoot>, MappingError> {
    let cwd = match ctx.virtual_cwd {
        Some(cwd) if !path.is_empty() => cwd,
        _ => {
            return Err(MappingError::RelativePath {
                path: path.to_string(),
            })
        }
    };
    let absolute = join_path(cwd, path);
    let next = enter_chroot(&ctx.with_chroot(None).with_cwd(None), &absolute)?;
    if next.is_none() && ctx.chroot.is_some() {
        info!("chroot(\"{}\") from cwd '{}': leaving simulated chroot", path, cwd);
    }
    Ok(next)
}

/// Chroot state for a virtual path given at process start (no chroot before it)
pub fn restore_chroot(
    ctx: &MappingContext<'_>,
    virtual_path: &str,
) -> Result<Option<ChrootRoot>, MappingError> {
    enter_chroot(&ctx.with_chroot(None).with_cwd(None), virtual_path)
}
