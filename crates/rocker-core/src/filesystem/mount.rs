//! Mount utilities for the container's process-information filesystem.

use std::path::Path;

use rocker_common::error::{Result, RockerError};

/// Mounts a fresh `proc` filesystem at `target`, creating the directory first.
///
/// Called after the root switch, so `target` is a path inside the container.
///
/// # Errors
///
/// Returns `RockerError::IsolationSetup` if the directory cannot be created
/// or the `mount(2)` syscall fails.
#[cfg(target_os = "linux")]
pub fn mount_proc(target: &Path) -> Result<()> {
    use nix::mount::MsFlags;

    std::fs::create_dir_all(target).map_err(|e| RockerError::IsolationSetup {
        step: "proc mount",
        reason: format!("{}: {e}", target.display()),
    })?;
    nix::mount::mount(
        Some("proc"),
        target,
        Some("proc"),
        MsFlags::MS_NOSUID | MsFlags::MS_NODEV | MsFlags::MS_NOEXEC,
        None::<&str>,
    )
    .map_err(|e| RockerError::IsolationSetup {
        step: "proc mount",
        reason: format!("{}: {e}", target.display()),
    })?;
    tracing::debug!(target = %target.display(), "proc mounted");
    Ok(())
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error: mounting requires Linux.
#[cfg(not(target_os = "linux"))]
pub fn mount_proc(_target: &Path) -> Result<()> {
    Err(RockerError::IsolationSetup {
        step: "proc mount",
        reason: "Linux required for native container operations".into(),
    })
}

/// Lazily detaches a `proc` mount left behind by a finished container.
///
/// The init process shares the host mount table, so its `/proc` mount
/// outlives it. Returns `Ok(false)` when nothing was mounted at `target`.
///
/// # Errors
///
/// Returns `RockerError::Io` if `umount2(2)` fails for another reason.
#[cfg(target_os = "linux")]
pub fn unmount_proc(target: &Path) -> Result<bool> {
    use nix::errno::Errno;
    use nix::mount::MntFlags;

    match nix::mount::umount2(target, MntFlags::MNT_DETACH) {
        Ok(()) => {
            tracing::debug!(target = %target.display(), "proc unmounted");
            Ok(true)
        }
        Err(Errno::EINVAL | Errno::ENOENT) => Ok(false),
        Err(e) => Err(RockerError::Io {
            path: target.to_path_buf(),
            source: e.into(),
        }),
    }
}

/// Stub for non-Linux platforms; there is never anything to unmount.
///
/// # Errors
///
/// Never fails.
#[cfg(not(target_os = "linux"))]
pub fn unmount_proc(_target: &Path) -> Result<bool> {
    Ok(false)
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;

    #[test]
    fn unmount_proc_on_plain_directory_reports_nothing_mounted() {
        let dir = tempfile::tempdir().expect("tempdir");
        // EINVAL as root, EPERM otherwise.
        match unmount_proc(dir.path()) {
            Ok(mounted) => assert!(!mounted),
            Err(err) => assert!(matches!(err, RockerError::Io { .. })),
        }
    }
}
