//! Command-line arguments and how they override the configuration file.

use std::path::{Path, PathBuf};

use clap::Parser;
use rocker_common::config::RockerConfig;
use rocker_common::error::Result;

/// Instruction file looked up first when none is named.
const CONTAINERFILE: &str = "Containerfile";

/// Instruction file looked up when no `Containerfile` exists.
const DOCKERFILE: &str = "Dockerfile";

/// rocker: run a Containerfile's entrypoint in a confined root filesystem.
#[derive(Parser, Debug)]
#[command(name = "rocker", version, about, long_about = None)]
pub struct Cli {
    /// Instruction file. Defaults to `Containerfile` (or `Dockerfile`) in the context directory.
    pub file: Option<PathBuf>,

    /// Directory `COPY` sources are resolved against.
    #[arg(short, long, default_value = ".")]
    pub context: PathBuf,

    /// JSON configuration file.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Root of the layer and root filesystem cache.
    #[arg(long, env = "ROCKER_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Memory ceiling in bytes.
    #[arg(long)]
    pub memory: Option<u64>,

    /// CPU time allowed per period, in microseconds.
    #[arg(long)]
    pub cpu_quota: Option<u64>,
}

impl Cli {
    /// Loads the configuration file, if any, and applies flag overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be loaded or the merged values
    /// are invalid.
    pub fn resolve_config(&self) -> Result<RockerConfig> {
        let mut config = match &self.config {
            Some(path) => RockerConfig::load(path)?,
            None => RockerConfig::default(),
        };
        if let Some(dir) = &self.cache_dir {
            config.cache_root.clone_from(dir);
        }
        if let Some(bytes) = self.memory {
            config.resources.memory_max_bytes = bytes;
        }
        if let Some(quota) = self.cpu_quota {
            config.resources.cpu_quota_us = quota;
        }
        config.validate()?;
        Ok(config)
    }

    /// Path of the instruction file to build.
    #[must_use]
    pub fn instruction_file(&self) -> PathBuf {
        self.file
            .clone()
            .unwrap_or_else(|| default_instruction_file(&self.context))
    }
}

fn default_instruction_file(context: &Path) -> PathBuf {
    let containerfile = context.join(CONTAINERFILE);
    let dockerfile = context.join(DOCKERFILE);
    if !containerfile.exists() && dockerfile.exists() {
        dockerfile
    } else {
        containerfile
    }
}
