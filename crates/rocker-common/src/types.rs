//! Domain primitive types used across the rocker workspace.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{Result, RockerError};

/// Reference to a remote image: `{name, tag}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageRef {
    /// Image name as written, e.g. `node` or `bitnami/redis`.
    pub name: String,
    /// Tag, e.g. `alpine`.
    pub tag: String,
}

impl ImageRef {
    /// Creates a reference from its parts.
    #[must_use]
    pub fn new(name: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tag: tag.into(),
        }
    }

    /// Parses `name[:tag]`. The tag defaults to `latest`.
    ///
    /// # Errors
    ///
    /// Returns `RockerError::Config` if the name or tag is empty.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let after_last_slash = raw.rfind('/').map_or(0, |p| p + 1);
        let (name, tag) = match raw.rfind(':') {
            Some(colon) if colon >= after_last_slash => (&raw[..colon], &raw[colon + 1..]),
            _ => (raw, constants::DEFAULT_TAG),
        };
        if name.is_empty() || tag.is_empty() {
            return Err(RockerError::Config {
                message: format!("invalid image reference: {raw:?}"),
            });
        }
        Ok(Self::new(name, tag))
    }

    /// Returns the registry repository path.
    ///
    /// Single-component names live in the official `library/` namespace.
    #[must_use]
    pub fn repository(&self) -> String {
        if self.name.contains('/') {
            self.name.clone()
        } else {
            format!("{}/{}", constants::OFFICIAL_NAMESPACE, self.name)
        }
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.tag)
    }
}

/// An `{os, architecture}` pair in OCI naming.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Platform {
    /// Operating system, e.g. `linux`.
    pub os: String,
    /// CPU architecture, e.g. `amd64`.
    pub architecture: String,
}

impl Platform {
    /// Creates a platform from its parts.
    #[must_use]
    pub fn new(os: impl Into<String>, architecture: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            architecture: architecture.into(),
        }
    }

    /// Returns the platform of the running host.
    #[must_use]
    pub fn host() -> Self {
        Self::new(
            std::env::consts::OS,
            oci_architecture(std::env::consts::ARCH),
        )
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.architecture)
    }
}

/// Maps a Rust target architecture name to its OCI equivalent.
#[must_use]
pub fn oci_architecture(rust_arch: &str) -> &str {
    match rust_arch {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "x86" => "386",
        "powerpc64" => "ppc64le",
        "loongarch64" => "loong64",
        other => other,
    }
}

/// Memory and CPU limits for one container launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourcePolicy {
    /// Hard memory ceiling in bytes.
    pub memory_max_bytes: u64,
    /// CPU time allowed per period, in microseconds.
    pub cpu_quota_us: u64,
    /// CPU accounting period, in microseconds.
    pub cpu_period_us: u64,
}

impl Default for ResourcePolicy {
    fn default() -> Self {
        Self {
            memory_max_bytes: constants::DEFAULT_MEMORY_MAX_BYTES,
            cpu_quota_us: constants::DEFAULT_CPU_QUOTA_US,
            cpu_period_us: constants::DEFAULT_CPU_PERIOD_US,
        }
    }
}

/// Everything the execution engine needs for one launch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchSpec {
    /// Host path of the assembled root filesystem.
    pub rootfs: PathBuf,
    /// Command vector; element 0 is an absolute path inside `rootfs`.
    pub entrypoint: Vec<String>,
}

impl LaunchSpec {
    /// Creates a launch spec.
    #[must_use]
    pub const fn new(rootfs: PathBuf, entrypoint: Vec<String>) -> Self {
        Self { rootfs, entrypoint }
    }

    /// Returns the entrypoint executable, as seen from inside the container.
    ///
    /// # Errors
    ///
    /// Returns `RockerError::Config` if the entrypoint vector is empty.
    pub fn program(&self) -> Result<&str> {
        self.entrypoint
            .first()
            .map(String::as_str)
            .ok_or_else(|| RockerError::Config {
                message: "entrypoint is empty".into(),
            })
    }

    /// Returns the host path of the entrypoint executable.
    ///
    /// # Errors
    ///
    /// Returns `RockerError::Config` if the entrypoint is empty or not absolute.
    pub fn program_on_host(&self) -> Result<PathBuf> {
        let program = self.program()?;
        let relative = program.strip_prefix('/').ok_or_else(|| RockerError::Config {
            message: format!("entrypoint must be an absolute path: {program}"),
        })?;
        Ok(self.rootfs.join(relative))
    }

    /// Returns the root filesystem path.
    #[must_use]
    pub fn rootfs(&self) -> &Path {
        &self.rootfs
    }
}

/// Unique identifier for one container launch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LaunchId(String);

impl LaunchId {
    /// Generates a random launch ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LaunchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How the container's main process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerExit {
    /// Exit code, if the process exited normally.
    pub code: Option<i32>,
    /// Terminating signal, if the process was killed.
    pub signal: Option<i32>,
}

impl ContainerExit {
    /// Returns whether the process exited with status 0.
    #[must_use]
    pub const fn success(&self) -> bool {
        matches!(self.code, Some(0))
    }

    /// Returns a shell-style status: the exit code, or 128 + signal.
    #[must_use]
    pub const fn status_code(&self) -> i32 {
        match (self.code, self.signal) {
            (Some(code), _) => code,
            (None, Some(signal)) => 128 + signal,
            (None, None) => 1,
        }
    }
}
