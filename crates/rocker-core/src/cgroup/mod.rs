//! Cgroups v2 resource management.
//!
//! Each launch gets its own group under `<mount_point>/<parent>/<name>`
//! with a memory ceiling and a CPU bandwidth quota. The group is created
//! empty, the init process is attached by pid, and the directory is
//! removed once the process has exited.

pub mod cpu;
pub mod memory;

use std::path::{Path, PathBuf};

use rocker_common::config::CgroupConfig;
use rocker_common::error::{Result, RockerError};
use rocker_common::types::ResourcePolicy;

/// Controllers every launch group needs from its ancestors.
const REQUIRED_CONTROLLERS: &str = "+cpu +memory";

/// Creates resource groups for container launches.
pub trait ResourceController {
    /// Group handle produced by this controller.
    type Group: ResourceGroup;

    /// Creates a fresh group named `name` with `policy` applied.
    ///
    /// # Errors
    ///
    /// Returns an error if the group cannot be created or its limits written.
    fn create_group(&self, name: &str, policy: &ResourcePolicy) -> Result<Self::Group>;
}

/// A live resource group.
pub trait ResourceGroup {
    /// Moves process `pid` into the group.
    ///
    /// # Errors
    ///
    /// Returns an error if the kernel rejects the attachment.
    fn attach(&self, pid: u32) -> Result<()>;

    /// Removes the group. It must hold no live processes.
    ///
    /// # Errors
    ///
    /// Returns an error if the group cannot be removed.
    fn destroy(self) -> Result<()>;
}

/// Resource controller backed by the cgroup v2 filesystem.
#[derive(Debug, Clone)]
pub struct CgroupController {
    mount_point: PathBuf,
    parent: String,
}

impl CgroupController {
    /// Creates a controller for the configured hierarchy.
    #[must_use]
    pub fn new(config: &CgroupConfig) -> Self {
        Self {
            mount_point: config.mount_point.clone(),
            parent: config.parent.clone(),
        }
    }

    /// Directory under which launch groups are created.
    #[must_use]
    pub fn parent_path(&self) -> PathBuf {
        self.mount_point.join(&self.parent)
    }
}

impl ResourceController for CgroupController {
    type Group = CgroupGroup;

    fn create_group(&self, name: &str, policy: &ResourcePolicy) -> Result<CgroupGroup> {
        if !self.mount_point.join("cgroup.controllers").is_file() {
            return Err(RockerError::ResourceAttach {
                message: format!(
                    "no cgroup v2 hierarchy mounted at {}",
                    self.mount_point.display()
                ),
            });
        }

        let parent = self.parent_path();
        std::fs::create_dir_all(&parent).map_err(|e| RockerError::Io {
            path: parent.clone(),
            source: e,
        })?;
        enable_controllers(&self.mount_point);
        enable_controllers(&parent);

        let path = parent.join(name);
        std::fs::create_dir(&path).map_err(|e| RockerError::Io {
            path: path.clone(),
            source: e,
        })?;
        let group = CgroupGroup { path };
        if let Err(e) = group.apply_policy(policy) {
            if let Err(cleanup) = std::fs::remove_dir(&group.path) {
                tracing::warn!(path = %group.path.display(), error = %cleanup, "failed to remove half-configured cgroup");
            }
            return Err(e);
        }

        tracing::info!(
            path = %group.path.display(),
            memory_max_bytes = policy.memory_max_bytes,
            cpu_quota_us = policy.cpu_quota_us,
            cpu_period_us = policy.cpu_period_us,
            "cgroup created"
        );
        Ok(group)
    }
}

/// Delegates the CPU and memory controllers to children of `dir`.
///
/// Failure is logged rather than returned: the controllers may already be
/// enabled by the host, and a missing controller surfaces when its limit
/// file is written.
fn enable_controllers(dir: &Path) {
    let file = dir.join("cgroup.subtree_control");
    if let Err(e) = std::fs::write(&file, REQUIRED_CONTROLLERS) {
        tracing::warn!(path = %file.display(), error = %e, "failed to enable cgroup controllers");
    }
}

/// Handle to one launch's cgroup directory.
#[derive(Debug)]
pub struct CgroupGroup {
    path: PathBuf,
}

impl CgroupGroup {
    /// Path to this group's directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn apply_policy(&self, policy: &ResourcePolicy) -> Result<()> {
        memory::set_memory_max(&self.path, policy.memory_max_bytes)?;
        cpu::set_cpu_max(&self.path, policy.cpu_quota_us, policy.cpu_period_us)
    }
}

impl ResourceGroup for CgroupGroup {
    fn attach(&self, pid: u32) -> Result<()> {
        let procs_path = self.path.join("cgroup.procs");
        std::fs::write(&procs_path, pid.to_string()).map_err(|e| RockerError::Io {
            path: procs_path,
            source: e,
        })?;
        tracing::debug!(pid, "added process to cgroup");
        Ok(())
    }

    fn destroy(self) -> Result<()> {
        match std::fs::remove_dir(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(RockerError::Io {
                    path: self.path,
                    source: e,
                });
            }
        }
        tracing::info!(path = %self.path.display(), "cgroup destroyed");
        Ok(())
    }
}
