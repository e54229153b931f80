//! Spawning the container init process.
//!
//! The init is a re-execution of the current binary with the launch mode
//! marker set. It inherits the read end of a pipe (the start gate) and
//! blocks on it until the supervisor has attached it to its resource
//! group, so it never runs unconstrained code.

use std::ffi::OsString;
use std::fs::File;
use std::io::{self, Write};
use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};

use rocker_common::constants::{INIT_ENV, LAUNCH_SPEC_ENV, SYNC_FD_ENV};
use rocker_common::error::{Result, RockerError};
use rocker_common::types::{ContainerExit, LaunchSpec};

/// Executable that re-enters this binary on Linux.
const SELF_EXE: &str = "/proc/self/exe";

/// Starts init processes for a launch spec.
pub trait InitSpawner {
    /// Handle to a spawned init.
    type Child: InitChild;

    /// Starts a gated init process for `spec`.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be started.
    fn spawn(&self, spec: &LaunchSpec) -> Result<Self::Child>;
}

/// A spawned init process waiting at its start gate.
pub trait InitChild {
    /// Host pid of the process.
    fn pid(&self) -> u32;

    /// Opens the start gate.
    ///
    /// # Errors
    ///
    /// Returns an error if the gate cannot be signalled.
    fn release(&mut self) -> Result<()>;

    /// Kills the process.
    ///
    /// # Errors
    ///
    /// Returns an error if the signal cannot be delivered.
    fn kill(&mut self) -> Result<()>;

    /// Waits for the process to exit. Closes the gate first if still held.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be reaped.
    fn wait(&mut self) -> Result<ContainerExit>;
}

/// Spawns the init by re-executing a binary with the original arguments.
#[derive(Debug, Clone)]
pub struct SelfExecSpawner {
    exe: PathBuf,
    args: Vec<OsString>,
}

impl SelfExecSpawner {
    /// Re-executes the running binary with its own arguments.
    #[must_use]
    pub fn new() -> Self {
        Self {
            exe: PathBuf::from(SELF_EXE),
            args: std::env::args_os().skip(1).collect(),
        }
    }

    /// Spawns `exe` with `args` instead of the running binary.
    #[must_use]
    pub fn with_command(exe: impl Into<PathBuf>, args: Vec<OsString>) -> Self {
        Self {
            exe: exe.into(),
            args,
        }
    }
}

impl Default for SelfExecSpawner {
    fn default() -> Self {
        Self::new()
    }
}

impl InitSpawner for SelfExecSpawner {
    type Child = SpawnedInit;

    fn spawn(&self, spec: &LaunchSpec) -> Result<SpawnedInit> {
        let io_err = |e: io::Error| RockerError::Io {
            path: self.exe.clone(),
            source: e,
        };
        let (gate_read, gate_write) = start_gate().map_err(io_err)?;
        let payload = serde_json::to_string(spec)?;

        let child = Command::new(&self.exe)
            .args(&self.args)
            .env(INIT_ENV, "1")
            .env(LAUNCH_SPEC_ENV, payload)
            .env(SYNC_FD_ENV, gate_read.as_raw_fd().to_string())
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(io_err)?;
        // The child holds its own copy; keeping ours would hide the EOF.
        drop(gate_read);

        tracing::debug!(pid = child.id(), exe = %self.exe.display(), "init spawned");
        Ok(SpawnedInit {
            child,
            gate: Some(File::from(gate_write)),
        })
    }
}

/// Creates the start-gate pipe. Only the read end survives `exec`.
fn start_gate() -> io::Result<(OwnedFd, OwnedFd)> {
    use nix::fcntl::OFlag;

    let (read, write) = nix::unistd::pipe2(OFlag::O_CLOEXEC)?;
    // SAFETY: `read` is an open descriptor owned by this function;
    // F_SETFD only changes its descriptor flags.
    let rc = unsafe { libc::fcntl(read.as_raw_fd(), libc::F_SETFD, 0) };
    if rc == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok((read, write))
}

/// A child spawned by [`SelfExecSpawner`].
#[derive(Debug)]
pub struct SpawnedInit {
    child: Child,
    gate: Option<File>,
}

impl InitChild for SpawnedInit {
    fn pid(&self) -> u32 {
        self.child.id()
    }

    fn release(&mut self) -> Result<()> {
        let Some(mut gate) = self.gate.take() else {
            return Ok(());
        };
        match gate.write_all(&[1]) {
            // The child is already gone; `wait` reports how it ended.
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Ok(()),
            Err(e) => Err(RockerError::IsolationSetup {
                step: "start gate",
                reason: e.to_string(),
            }),
            Ok(()) => {
                tracing::debug!(pid = self.child.id(), "start gate released");
                Ok(())
            }
        }
    }

    fn kill(&mut self) -> Result<()> {
        self.child.kill().map_err(|e| RockerError::Io {
            path: PathBuf::from(format!("/proc/{}", self.child.id())),
            source: e,
        })
    }

    fn wait(&mut self) -> Result<ContainerExit> {
        drop(self.gate.take());
        let status = self.child.wait().map_err(|e| RockerError::Io {
            path: PathBuf::from(format!("/proc/{}", self.child.id())),
            source: e,
        })?;
        Ok(ContainerExit {
            code: status.code(),
            signal: status.signal(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell(script: &str) -> SelfExecSpawner {
        SelfExecSpawner::with_command("/bin/sh", vec!["-c".into(), script.into()])
    }

    fn spec() -> LaunchSpec {
        LaunchSpec::new(PathBuf::from("/tmp/rootfs"), vec!["/bin/app".into()])
    }

    #[test]
    fn exit_code_is_reported() {
        let mut child = shell("exit 3").spawn(&spec()).expect("spawn");
        child.release().expect("release");
        let exit = child.wait().expect("wait");
        assert_eq!(exit.code, Some(3));
        assert_eq!(exit.signal, None);
    }

    #[test]
    fn killed_child_reports_signal() {
        let mut child = SelfExecSpawner::with_command("sleep", vec!["30".into()])
            .spawn(&spec())
            .expect("spawn");
        child.kill().expect("kill");
        let exit = child.wait().expect("wait");
        assert_eq!(exit.code, None);
        assert_eq!(exit.signal, Some(9));
        assert_eq!(exit.status_code(), 137);
    }

    #[test]
    fn released_gate_delivers_one_byte() {
        let script = r#"test "$(head -c 1 <&"$ROCKER_SYNC_FD" | wc -c)" -eq 1 && exit 7; exit 9"#;
        let mut child = shell(script).spawn(&spec()).expect("spawn");
        child.release().expect("release");
        assert_eq!(child.wait().expect("wait").code, Some(7));
    }

    #[test]
    fn unreleased_gate_reads_eof() {
        let script = r#"test "$(head -c 1 <&"$ROCKER_SYNC_FD" | wc -c)" -eq 1 && exit 7; exit 9"#;
        let mut child = shell(script).spawn(&spec()).expect("spawn");
        assert_eq!(child.wait().expect("wait").code, Some(9));
    }

    #[test]
    fn init_environment_carries_mode_and_spec() {
        let script = r#"test "$ROCKER_INIT" = 1 || exit 1
case "$ROCKER_LAUNCH_SPEC" in *'"/bin/app"'*) exit 0 ;; esac
exit 2"#;
        let mut child = shell(script).spawn(&spec()).expect("spawn");
        child.release().expect("release");
        assert_eq!(child.wait().expect("wait").code, Some(0));
    }

    #[test]
    fn missing_executable_fails_to_spawn() {
        let result =
            SelfExecSpawner::with_command("/nonexistent/rocker", Vec::new()).spawn(&spec());
        assert!(matches!(result, Err(RockerError::Io { .. })));
    }
}
