//! CPU bandwidth control via cgroups v2 `cpu.max`.

use std::path::Path;

use rocker_common::error::{Result, RockerError};

/// Sets the CPU bandwidth limit (max microseconds per period).
///
/// Writes `quota_us period_us` to `cpu.max`, where `quota_us` is the
/// maximum CPU time allowed per `period_us` window.
///
/// # Errors
///
/// Returns an error if writing to `cpu.max` fails.
pub fn set_cpu_max(cgroup_path: &Path, quota_us: u64, period_us: u64) -> Result<()> {
    let file = cgroup_path.join("cpu.max");
    std::fs::write(&file, format!("{quota_us} {period_us}")).map_err(|e| RockerError::Io {
        path: file,
        source: e,
    })?;
    tracing::debug!(quota_us, period_us, "CPU max quota set");
    Ok(())
}
