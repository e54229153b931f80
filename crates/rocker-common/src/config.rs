//! Global configuration model for the rocker runtime.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{Result, RockerError};
use crate::types::ResourcePolicy;

/// Root configuration for the rocker runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RockerConfig {
    /// Directory holding the layer cache and assembled root filesystems.
    pub cache_root: PathBuf,
    /// Registry endpoints.
    pub registry: RegistryConfig,
    /// Resource limits applied to each launch.
    pub resources: ResourcePolicy,
    /// Cgroup hierarchy placement.
    pub cgroup: CgroupConfig,
}

impl Default for RockerConfig {
    fn default() -> Self {
        Self {
            cache_root: PathBuf::from(constants::DEFAULT_CACHE_ROOT),
            registry: RegistryConfig::default(),
            resources: ResourcePolicy::default(),
            cgroup: CgroupConfig::default(),
        }
    }
}

impl RockerConfig {
    /// Loads a JSON configuration file. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid JSON.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| RockerError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks values that would otherwise fail late in the pipeline.
    ///
    /// # Errors
    ///
    /// Returns `RockerError::Config` on a zero CPU period or zero memory ceiling.
    pub fn validate(&self) -> Result<()> {
        if self.resources.cpu_period_us == 0 {
            return Err(RockerError::Config {
                message: "cpu_period_us must be greater than zero".into(),
            });
        }
        if self.resources.memory_max_bytes == 0 {
            return Err(RockerError::Config {
                message: "memory_max_bytes must be greater than zero".into(),
            });
        }
        Ok(())
    }
}

/// Registry endpoints used by the image client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Token endpoint.
    pub auth_url: String,
    /// `service` parameter sent to the token endpoint.
    pub auth_service: String,
    /// Registry API base URL (without `/v2`).
    pub registry_url: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            auth_url: constants::DEFAULT_AUTH_URL.into(),
            auth_service: constants::DEFAULT_AUTH_SERVICE.into(),
            registry_url: constants::DEFAULT_REGISTRY_URL.into(),
        }
    }
}

/// Placement of per-launch cgroups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CgroupConfig {
    /// Mount point of the cgroup v2 unified hierarchy.
    pub mount_point: PathBuf,
    /// Parent group, relative to the mount point.
    pub parent: String,
}

impl Default for CgroupConfig {
    fn default() -> Self {
        Self {
            mount_point: PathBuf::from(constants::CGROUP_V2_PATH),
            parent: constants::CGROUP_PARENT.into(),
        }
    }
}
