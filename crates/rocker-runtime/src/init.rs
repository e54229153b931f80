//! The container init branch.
//!
//! Runs in the re-executed child: waits at the start gate, enters the
//! root filesystem, mounts `/proc`, and replaces itself with the
//! entrypoint. Any failure before `execve` aborts the launch with the
//! step that failed.

use std::convert::Infallible;
use std::ffi::{CString, OsString};
use std::fs::File;
use std::io::{self, Read};
use std::os::fd::{FromRawFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use rocker_common::constants::{INIT_ENV, LAUNCH_SPEC_ENV, PROC_MOUNT, SYNC_FD_ENV};
use rocker_common::error::{Result, RockerError};
use rocker_common::types::LaunchSpec;
use rocker_core::filesystem::{mount, root};

/// Exit status of an init that could not find its entrypoint.
pub const EXIT_ENTRYPOINT_NOT_FOUND: i32 = 127;

/// Exit status of an init that failed any other setup step.
pub const EXIT_SETUP_FAILED: i32 = 126;

/// What the supervisor hands to the init through its environment.
#[derive(Debug)]
pub struct InitHandoff {
    spec: LaunchSpec,
    gate: File,
}

impl InitHandoff {
    /// Reads the launch spec and start gate from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `RockerError::IsolationSetup` if either variable is missing
    /// or malformed.
    pub fn from_env() -> Result<Self> {
        let spec = std::env::var(LAUNCH_SPEC_ENV).ok();
        let fd = std::env::var(SYNC_FD_ENV).ok();
        let (spec, fd) = parse_handoff(spec.as_deref(), fd.as_deref())?;
        // SAFETY: the supervisor passed this descriptor to us for the start
        // gate; nothing else in this process owns or closes it.
        let gate = unsafe { File::from_raw_fd(fd) };
        Ok(Self { spec, gate })
    }

    /// Blocks until the supervisor opens the start gate, then closes it.
    ///
    /// # Errors
    ///
    /// Returns `RockerError::IsolationSetup` if the gate closes without
    /// being opened, which means the supervisor aborted the launch.
    pub fn wait_for_release(self) -> Result<LaunchSpec> {
        let Self { spec, mut gate } = self;
        let mut byte = [0_u8; 1];
        gate.read_exact(&mut byte).map_err(|e| RockerError::IsolationSetup {
            step: "start gate",
            reason: if e.kind() == io::ErrorKind::UnexpectedEof {
                "supervisor closed the start gate".into()
            } else {
                e.to_string()
            },
        })?;
        Ok(spec)
    }
}

/// Runs the init branch. Only returns on failure.
///
/// # Errors
///
/// Returns the error of the first setup step that fails.
pub fn run() -> Result<Infallible> {
    let spec = InitHandoff::from_env()?.wait_for_release()?;
    tracing::debug!(rootfs = %spec.rootfs().display(), "init released");

    root::enter_root(spec.rootfs())?;
    mount::mount_proc(Path::new(PROC_MOUNT))?;

    let program = spec.program()?;
    if !Path::new(program).exists() {
        return Err(RockerError::EntrypointNotFound {
            path: program.to_string(),
        });
    }
    exec_entrypoint(&spec)
}

/// Maps an init failure onto the process exit status seen by the supervisor.
#[must_use]
pub const fn exit_code_for(err: &RockerError) -> i32 {
    match err {
        RockerError::EntrypointNotFound { .. } => EXIT_ENTRYPOINT_NOT_FOUND,
        _ => EXIT_SETUP_FAILED,
    }
}

fn exec_entrypoint(spec: &LaunchSpec) -> Result<Infallible> {
    let program = to_cstring(spec.program()?)?;
    let args = spec
        .entrypoint
        .iter()
        .map(|arg| to_cstring(arg))
        .collect::<Result<Vec<_>>>()?;
    let env = container_env(std::env::vars_os());

    tracing::info!(entrypoint = ?spec.entrypoint, "executing entrypoint");
    nix::unistd::execve(&program, &args, &env).map_err(|e| RockerError::IsolationSetup {
        step: "exec",
        reason: format!("{}: {e}", spec.entrypoint.join(" ")),
    })
}

fn parse_handoff(spec: Option<&str>, fd: Option<&str>) -> Result<(LaunchSpec, RawFd)> {
    let spec = spec.ok_or_else(|| missing(LAUNCH_SPEC_ENV))?;
    let spec: LaunchSpec = serde_json::from_str(spec).map_err(|e| RockerError::IsolationSetup {
        step: "handoff",
        reason: format!("malformed {LAUNCH_SPEC_ENV}: {e}"),
    })?;
    let fd = fd.ok_or_else(|| missing(SYNC_FD_ENV))?;
    let fd: RawFd = fd
        .parse()
        .ok()
        .filter(|fd| *fd >= 0)
        .ok_or_else(|| RockerError::IsolationSetup {
            step: "handoff",
            reason: format!("malformed {SYNC_FD_ENV}: {fd:?}"),
        })?;
    Ok((spec, fd))
}

fn missing(var: &str) -> RockerError {
    RockerError::IsolationSetup {
        step: "handoff",
        reason: format!("{var} is not set"),
    }
}

/// Environment handed to the entrypoint: everything but the handoff variables.
fn container_env(vars: impl IntoIterator<Item = (OsString, OsString)>) -> Vec<CString> {
    vars.into_iter()
        .filter(|(key, _)| {
            ![INIT_ENV, LAUNCH_SPEC_ENV, SYNC_FD_ENV]
                .iter()
                .any(|k| key.as_os_str() == *k)
        })
        .filter_map(|(key, value)| {
            let mut entry = key.as_bytes().to_vec();
            entry.push(b'=');
            entry.extend_from_slice(value.as_bytes());
            CString::new(entry).ok()
        })
        .collect()
}

fn to_cstring(value: &str) -> Result<CString> {
    CString::new(value).map_err(|_| RockerError::IsolationSetup {
        step: "exec",
        reason: format!("argument contains a NUL byte: {value:?}"),
    })
}
