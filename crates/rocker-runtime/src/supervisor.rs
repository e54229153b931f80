//! Container supervision: spawn, confine, release, reap.
//!
//! The supervisor never lets the init run past its start gate until it is
//! a member of a fresh resource group. If the group cannot be created or
//! joined, the init is killed while still gated.

use rocker_common::error::{Result, RockerError};
use rocker_common::types::{ContainerExit, LaunchId, LaunchSpec, ResourcePolicy};
use rocker_core::cgroup::{ResourceController, ResourceGroup};
use rocker_core::filesystem::mount;

use crate::process::{InitChild, InitSpawner};

/// Runs one container launch at a time.
#[derive(Debug)]
pub struct Supervisor<S, R> {
    spawner: S,
    controller: R,
    policy: ResourcePolicy,
}

impl<S: InitSpawner, R: ResourceController> Supervisor<S, R> {
    /// Creates a supervisor applying `policy` to every launch.
    pub const fn new(spawner: S, controller: R, policy: ResourcePolicy) -> Self {
        Self {
            spawner,
            controller,
            policy,
        }
    }

    /// Launches `spec` and blocks until the container's main process exits.
    ///
    /// # Errors
    ///
    /// - `RockerError::EntrypointNotFound` if the entrypoint is absent from
    ///   the root filesystem. Nothing is spawned.
    /// - `RockerError::IsolationSetup` if the init cannot be spawned.
    /// - `RockerError::ResourceAttach` if the resource group cannot be
    ///   created or joined, or the init cannot be released. The init is
    ///   killed and reaped first.
    pub fn run(&self, spec: &LaunchSpec) -> Result<ContainerExit> {
        validate(spec)?;

        let launch_id = LaunchId::generate();
        tracing::info!(
            launch = %launch_id,
            rootfs = %spec.rootfs().display(),
            entrypoint = ?spec.entrypoint,
            "launching container"
        );

        let mut child = self
            .spawner
            .spawn(spec)
            .map_err(|e| RockerError::IsolationSetup {
                step: "spawn",
                reason: e.to_string(),
            })?;

        let group = match self.confine(&mut child, launch_id.as_str()) {
            Ok(group) => group,
            Err((group, cause)) => {
                tracing::error!(launch = %launch_id, error = %cause, "confinement failed, killing init");
                abort(&mut child, group);
                return Err(RockerError::ResourceAttach {
                    message: cause.to_string(),
                });
            }
        };

        let exit = child.wait();
        teardown(group, spec);
        let exit = exit?;
        tracing::info!(
            launch = %launch_id,
            code = ?exit.code,
            signal = ?exit.signal,
            "container exited"
        );
        Ok(exit)
    }

    /// Creates the group, attaches the child, and opens the start gate.
    ///
    /// On failure, hands back the group (if it was created) for cleanup.
    fn confine(
        &self,
        child: &mut S::Child,
        name: &str,
    ) -> std::result::Result<R::Group, (Option<R::Group>, RockerError)> {
        let group = self
            .controller
            .create_group(name, &self.policy)
            .map_err(|e| (None, e))?;
        if let Err(e) = group.attach(child.pid()) {
            return Err((Some(group), e));
        }
        tracing::debug!(pid = child.pid(), group = name, "init attached");
        if let Err(e) = child.release() {
            return Err((Some(group), e));
        }
        Ok(group)
    }
}

/// Checks the launch spec before any process exists.
fn validate(spec: &LaunchSpec) -> Result<()> {
    if !spec.rootfs().is_dir() {
        return Err(RockerError::IsolationSetup {
            step: "chroot",
            reason: format!("{} is not a directory", spec.rootfs().display()),
        });
    }
    let program = spec.program()?;
    let on_host = spec.program_on_host()?;
    // The link itself counts: absolute link targets only resolve inside the root.
    if std::fs::symlink_metadata(&on_host).is_err() {
        return Err(RockerError::EntrypointNotFound {
            path: program.to_string(),
        });
    }
    Ok(())
}

fn abort<C: InitChild, G: ResourceGroup>(child: &mut C, group: Option<G>) {
    if let Err(e) = child.kill() {
        tracing::warn!(pid = child.pid(), error = %e, "failed to kill init");
    }
    if let Err(e) = child.wait() {
        tracing::warn!(pid = child.pid(), error = %e, "failed to reap init");
    }
    if let Some(group) = group {
        if let Err(e) = group.destroy() {
            tracing::warn!(error = %e, "failed to remove resource group");
        }
    }
}

fn teardown<G: ResourceGroup>(group: G, spec: &LaunchSpec) {
    if let Err(e) = group.destroy() {
        tracing::warn!(error = %e, "failed to remove resource group");
    }
    let proc_mount = spec.rootfs().join("proc");
    if let Err(e) = mount::unmount_proc(&proc_mount) {
        tracing::warn!(path = %proc_mount.display(), error = %e, "failed to detach proc mount");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::path::Path;
    use std::rc::Rc;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Event {
        Spawn,
        CreateGroup(String),
        Attach(u32),
        Release,
        Kill,
        Wait,
        Destroy,
    }

    type Log = Rc<RefCell<Vec<Event>>>;

    #[derive(Default, Clone, Copy)]
    struct Faults {
        spawn: bool,
        create: bool,
        attach: bool,
        release: bool,
    }

    fn failure(what: &str) -> RockerError {
        RockerError::Config {
            message: format!("injected {what} failure"),
        }
    }

    struct FakeSpawner {
        log: Log,
        faults: Faults,
        exit: ContainerExit,
    }

    struct FakeChild {
        log: Log,
        faults: Faults,
        exit: ContainerExit,
    }

    impl InitSpawner for FakeSpawner {
        type Child = FakeChild;

        fn spawn(&self, _spec: &LaunchSpec) -> Result<FakeChild> {
            if self.faults.spawn {
                return Err(failure("spawn"));
            }
            self.log.borrow_mut().push(Event::Spawn);
            Ok(FakeChild {
                log: Rc::clone(&self.log),
                faults: self.faults,
                exit: self.exit,
            })
        }
    }

    impl InitChild for FakeChild {
        fn pid(&self) -> u32 {
            42
        }

        fn release(&mut self) -> Result<()> {
            if self.faults.release {
                return Err(failure("release"));
            }
            self.log.borrow_mut().push(Event::Release);
            Ok(())
        }

        fn kill(&mut self) -> Result<()> {
            self.log.borrow_mut().push(Event::Kill);
            self.exit = ContainerExit {
                code: None,
                signal: Some(9),
            };
            Ok(())
        }

        fn wait(&mut self) -> Result<ContainerExit> {
            self.log.borrow_mut().push(Event::Wait);
            Ok(self.exit)
        }
    }

    struct FakeController {
        log: Log,
        faults: Faults,
    }

    struct FakeGroup {
        log: Log,
        faults: Faults,
    }

    impl ResourceController for FakeController {
        type Group = FakeGroup;

        fn create_group(&self, name: &str, _policy: &ResourcePolicy) -> Result<FakeGroup> {
            self.log
                .borrow_mut()
                .push(Event::CreateGroup(name.to_string()));
            if self.faults.create {
                return Err(failure("create"));
            }
            Ok(FakeGroup {
                log: Rc::clone(&self.log),
                faults: self.faults,
            })
        }
    }

    impl ResourceGroup for FakeGroup {
        fn attach(&self, pid: u32) -> Result<()> {
            self.log.borrow_mut().push(Event::Attach(pid));
            if self.faults.attach {
                return Err(failure("attach"));
            }
            Ok(())
        }

        fn destroy(self) -> Result<()> {
            self.log.borrow_mut().push(Event::Destroy);
            Ok(())
        }
    }

    fn supervisor(faults: Faults, exit_code: i32) -> (Supervisor<FakeSpawner, FakeController>, Log) {
        let log: Log = Rc::default();
        let spawner = FakeSpawner {
            log: Rc::clone(&log),
            faults,
            exit: ContainerExit {
                code: Some(exit_code),
                signal: None,
            },
        };
        let controller = FakeController {
            log: Rc::clone(&log),
            faults,
        };
        (
            Supervisor::new(spawner, controller, ResourcePolicy::default()),
            log,
        )
    }

    fn rootfs_with(entrypoint: &str) -> (tempfile::TempDir, LaunchSpec) {
        let dir = tempfile::tempdir().expect("tempdir");
        let program = dir.path().join(entrypoint.trim_start_matches('/'));
        std::fs::create_dir_all(program.parent().expect("parent")).expect("mkdir");
        std::fs::write(&program, b"#!/bin/sh\n").expect("write");
        let spec = LaunchSpec::new(dir.path().to_path_buf(), vec![entrypoint.into()]);
        (dir, spec)
    }

    fn without_names(log: &Log) -> Vec<Event> {
        log.borrow()
            .iter()
            .map(|e| match e {
                Event::CreateGroup(_) => Event::CreateGroup(String::new()),
                other => other.clone(),
            })
            .collect()
    }

    #[test]
    fn attaches_before_releasing_and_cleans_up_after_exit() {
        let (_dir, spec) = rootfs_with("/usr/local/bin/app");
        let (sup, log) = supervisor(Faults::default(), 3);

        let exit = sup.run(&spec).expect("run");
        assert_eq!(exit.code, Some(3));
        assert_eq!(
            without_names(&log),
            vec![
                Event::Spawn,
                Event::CreateGroup(String::new()),
                Event::Attach(42),
                Event::Release,
                Event::Wait,
                Event::Destroy,
            ]
        );
    }

    #[test]
    fn attach_failure_kills_gated_child() {
        let (_dir, spec) = rootfs_with("/app");
        let faults = Faults {
            attach: true,
            ..Faults::default()
        };
        let (sup, log) = supervisor(faults, 0);

        let err = sup.run(&spec).expect_err("attach fails");
        assert!(matches!(err, RockerError::ResourceAttach { .. }));
        assert!(err.to_string().contains("injected attach failure"));
        let events = without_names(&log);
        assert!(!events.contains(&Event::Release));
        assert_eq!(
            &events[2..],
            &[Event::Attach(42), Event::Kill, Event::Wait, Event::Destroy]
        );
    }

    #[test]
    fn group_creation_failure_kills_child_without_destroy() {
        let (_dir, spec) = rootfs_with("/app");
        let faults = Faults {
            create: true,
            ..Faults::default()
        };
        let (sup, log) = supervisor(faults, 0);

        let err = sup.run(&spec).expect_err("create fails");
        assert!(matches!(err, RockerError::ResourceAttach { .. }));
        assert_eq!(
            without_names(&log),
            vec![
                Event::Spawn,
                Event::CreateGroup(String::new()),
                Event::Kill,
                Event::Wait,
            ]
        );
    }

    #[test]
    fn release_failure_is_resource_attach_error() {
        let (_dir, spec) = rootfs_with("/app");
        let faults = Faults {
            release: true,
            ..Faults::default()
        };
        let (sup, log) = supervisor(faults, 0);

        let err = sup.run(&spec).expect_err("release fails");
        assert!(matches!(err, RockerError::ResourceAttach { .. }));
        assert_eq!(
            &without_names(&log)[3..],
            &[Event::Kill, Event::Wait, Event::Destroy]
        );
    }

    #[test]
    fn missing_entrypoint_never_spawns() {
        let dir = tempfile::tempdir().expect("tempdir");
        let rootfs = dir.path().join("rootfs/node/alpine");
        std::fs::create_dir_all(rootfs.join("usr/bin")).expect("mkdir");
        let spec = LaunchSpec::new(rootfs, vec!["/app/index.js".into()]);
        let (sup, log) = supervisor(Faults::default(), 0);

        let err = sup.run(&spec).expect_err("missing entrypoint");
        assert!(matches!(
            err,
            RockerError::EntrypointNotFound { ref path } if path == "/app/index.js"
        ));
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn dangling_symlink_entrypoint_passes_host_check() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir(dir.path().join("bin")).expect("mkdir");
        std::os::unix::fs::symlink("/bin/busybox", dir.path().join("bin/sh")).expect("symlink");
        let spec = LaunchSpec::new(dir.path().to_path_buf(), vec!["/bin/sh".into()]);
        let (sup, _log) = supervisor(Faults::default(), 0);

        assert!(sup.run(&spec).expect("run").success());
    }

    #[test]
    fn spawn_failure_is_isolation_setup_error() {
        let (_dir, spec) = rootfs_with("/app");
        let faults = Faults {
            spawn: true,
            ..Faults::default()
        };
        let (sup, log) = supervisor(faults, 0);

        let err = sup.run(&spec).expect_err("spawn fails");
        assert!(matches!(
            err,
            RockerError::IsolationSetup { step: "spawn", .. }
        ));
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn each_launch_gets_a_fresh_group() {
        let (_dir, spec) = rootfs_with("/app");
        let (sup, log) = supervisor(Faults::default(), 0);
        let _ = sup.run(&spec).expect("first");
        let _ = sup.run(&spec).expect("second");

        let names: Vec<String> = log
            .borrow()
            .iter()
            .filter_map(|e| match e {
                Event::CreateGroup(name) => Some(name.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(names.len(), 2);
        assert_ne!(names[0], names[1]);
    }

    #[test]
    fn relative_entrypoint_is_rejected() {
        let (_dir, mut spec) = rootfs_with("/app");
        spec.entrypoint = vec!["app".into()];
        let (sup, _log) = supervisor(Faults::default(), 0);
        assert!(matches!(
            sup.run(&spec),
            Err(RockerError::Config { .. })
        ));
    }

    #[test]
    fn rootfs_must_be_a_directory() {
        let spec = LaunchSpec::new(
            Path::new("/nonexistent/rootfs").to_path_buf(),
            vec!["/a".into()],
        );
        let (sup, _log) = supervisor(Faults::default(), 0);
        assert!(matches!(
            sup.run(&spec),
            Err(RockerError::IsolationSetup { step: "chroot", .. })
        ));
    }
}
