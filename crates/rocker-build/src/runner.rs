//! Sequential execution of build instructions.
//!
//! `FROM` materializes the base image's root filesystem (downloading and
//! assembling it unless a cached one exists), `COPY` places build-context
//! files into it, and `ENTRYPOINT` records the command. The result is what
//! the execution engine needs to launch the container.

use std::fs;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::{Component, Path, PathBuf};

use rocker_common::error::{Result, RockerError};
use rocker_common::types::{ImageRef, LaunchSpec};
use rocker_image::layer;
use rocker_image::registry::ImagePuller;
use rocker_image::storage::LayerStore;

use crate::instruction::Instruction;

/// A root filesystem and command ready for launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedContainer {
    /// Host path of the assembled root filesystem.
    pub rootfs: PathBuf,
    /// Command vector of the container's main process.
    pub entrypoint: Vec<String>,
}

impl PreparedContainer {
    /// Converts into the execution engine's launch spec.
    #[must_use]
    pub fn into_launch_spec(self) -> LaunchSpec {
        LaunchSpec::new(self.rootfs, self.entrypoint)
    }
}

/// Runs build instructions against a layer store.
#[derive(Debug)]
pub struct BuildRunner<P> {
    store: LayerStore,
    puller: P,
    context_dir: PathBuf,
}

impl<P: ImagePuller> BuildRunner<P> {
    /// Creates a runner resolving `COPY` sources against `context_dir`.
    pub fn new(store: LayerStore, puller: P, context_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            puller,
            context_dir: context_dir.into(),
        }
    }

    /// Executes `instructions` in order.
    ///
    /// A later `FROM` starts over from a new base; the last `ENTRYPOINT` wins.
    ///
    /// # Errors
    ///
    /// Returns `RockerError::Config` for a `COPY` before any `FROM`, a
    /// missing `COPY` source, an empty `ENTRYPOINT`, or a sequence without
    /// `FROM` or `ENTRYPOINT`. Image and filesystem failures propagate
    /// unchanged.
    pub fn prepare(&self, instructions: &[Instruction]) -> Result<PreparedContainer> {
        let mut rootfs: Option<PathBuf> = None;
        let mut entrypoint: Option<Vec<String>> = None;
        let total = instructions.len();

        for (index, instruction) in instructions.iter().enumerate() {
            tracing::info!(step = index + 1, total, %instruction, "build step");
            match instruction {
                Instruction::From(image) => rootfs = Some(self.materialize(image)?),
                Instruction::Copy {
                    source,
                    destination,
                } => {
                    let root = rootfs.as_deref().ok_or_else(|| RockerError::Config {
                        message: format!("{instruction} appears before any FROM"),
                    })?;
                    self.copy_into(root, source, destination)?;
                }
                Instruction::Entrypoint(argv) => {
                    if argv.is_empty() {
                        return Err(RockerError::Config {
                            message: "ENTRYPOINT requires a command".into(),
                        });
                    }
                    entrypoint = Some(argv.clone());
                }
            }
        }

        let rootfs = rootfs.ok_or_else(|| RockerError::Config {
            message: "no FROM instruction".into(),
        })?;
        let entrypoint = entrypoint.ok_or_else(|| RockerError::Config {
            message: "no ENTRYPOINT instruction".into(),
        })?;
        Ok(PreparedContainer { rootfs, entrypoint })
    }

    /// Returns the root filesystem for `image`, building it if not cached.
    fn materialize(&self, image: &ImageRef) -> Result<PathBuf> {
        let rootfs = self.store.rootfs_dir(image);
        if self.store.has_rootfs(image) {
            tracing::info!(image = %image, rootfs = %rootfs.display(), "using cached root filesystem");
            return Ok(rootfs);
        }

        let layers_dir = self.store.layers_dir(image);
        // Archives from an earlier interrupted pull would be assembled too.
        remove_dir_if_present(&layers_dir)?;
        for dir in [&layers_dir, &rootfs] {
            fs::create_dir_all(dir).map_err(|e| RockerError::Io {
                path: dir.clone(),
                source: e,
            })?;
        }

        let layers = self.puller.pull(image, &layers_dir)?;
        let summaries = layer::assemble_rootfs(&layers_dir, &rootfs)?;
        let entries: usize = summaries.iter().map(|s| s.entries).sum();
        tracing::info!(
            image = %image,
            layers = layers.len(),
            entries,
            rootfs = %rootfs.display(),
            "root filesystem assembled"
        );
        Ok(rootfs)
    }

    fn copy_into(&self, root: &Path, source: &Path, destination: &Path) -> Result<()> {
        let src = self.context_dir.join(source);
        let meta = fs::symlink_metadata(&src).map_err(|_| RockerError::Config {
            message: format!("COPY source {} not found in build context", src.display()),
        })?;

        let mut relative = inside_root(destination)?;
        if names_directory(destination) && !meta.is_dir() {
            if let Some(name) = src.file_name() {
                relative.push(name);
            }
        }

        let copied = if meta.is_dir() {
            copy_tree(&src, root, &relative)
        } else {
            link_or_copy(&src, root, &relative)
        };
        copied.map_err(|e| RockerError::Io {
            path: root.join(&relative),
            source: e,
        })?;
        tracing::debug!(source = %src.display(), dest = %relative.display(), "copied into root filesystem");
        Ok(())
    }
}

/// Strips the leading `/` from a container path and rejects `..`.
fn inside_root(destination: &Path) -> Result<PathBuf> {
    let mut relative = PathBuf::new();
    for component in destination.components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
            Component::ParentDir => {
                return Err(RockerError::Config {
                    message: format!(
                        "COPY destination {} escapes the root filesystem",
                        destination.display()
                    ),
                });
            }
        }
    }
    Ok(relative)
}

fn names_directory(destination: &Path) -> bool {
    destination.as_os_str().as_bytes().ends_with(b"/")
}

fn remove_dir_if_present(dir: &Path) -> Result<()> {
    match fs::remove_dir_all(dir) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(RockerError::Io {
            path: dir.to_path_buf(),
            source: e,
        }),
        _ => Ok(()),
    }
}

/// Hard-links `src` at `relative` inside `root`, replacing whatever is there.
/// Falls back to a byte copy when the two paths cannot share an inode.
fn link_or_copy(src: &Path, root: &Path, relative: &Path) -> io::Result<()> {
    let dest = layer::resolve_in_root(root, relative)?;
    let dest = dest.as_path();
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    match fs::symlink_metadata(dest) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(dest)?,
        Ok(_) => fs::remove_file(dest)?,
        Err(_) => {}
    }
    match fs::hard_link(src, dest) {
        Ok(()) => Ok(()),
        Err(e)
            if matches!(
                e.kind(),
                io::ErrorKind::CrossesDevices | io::ErrorKind::PermissionDenied
            ) =>
        {
            tracing::debug!(source = %src.display(), error = %e, "hard link refused, copying bytes");
            fs::copy(src, dest).map(|_| ())
        }
        Err(e) => Err(e),
    }
}

fn copy_tree(src: &Path, root: &Path, relative: &Path) -> io::Result<()> {
    fs::create_dir_all(layer::resolve_in_root(root, relative)?)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let target = relative.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_tree(&entry.path(), root, &target)?;
        } else {
            link_or_copy(&entry.path(), root, &target)?;
        }
    }
    Ok(())
}
