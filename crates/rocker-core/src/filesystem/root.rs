//! Root filesystem switching via `chroot(2)`.

use std::path::Path;

use rocker_common::error::{Result, RockerError};

/// Changes the process root to `rootfs` and its working directory to the new `/`.
///
/// Must run before any code that resolves paths inside the container.
///
/// # Errors
///
/// Returns `RockerError::IsolationSetup` naming the failed step.
#[cfg(target_os = "linux")]
pub fn enter_root(rootfs: &Path) -> Result<()> {
    nix::unistd::chroot(rootfs).map_err(|e| RockerError::IsolationSetup {
        step: "chroot",
        reason: format!("{}: {e}", rootfs.display()),
    })?;
    nix::unistd::chdir("/").map_err(|e| RockerError::IsolationSetup {
        step: "chdir",
        reason: e.to_string(),
    })?;
    tracing::info!(rootfs = %rootfs.display(), "entered container root");
    Ok(())
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error: changing the root requires Linux.
#[cfg(not(target_os = "linux"))]
pub fn enter_root(_rootfs: &Path) -> Result<()> {
    Err(RockerError::IsolationSetup {
        step: "chroot",
        reason: "Linux required for native container operations".into(),
    })
}
