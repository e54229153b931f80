//! Root filesystem assembly from ordered layer archives.
//!
//! Layers are applied strictly in manifest order. Each entry overwrites
//! whatever an earlier layer left at the same path; deletion markers
//! (whiteouts) have no special meaning and land as ordinary files.
//! Symlinks left by earlier layers resolve inside the root filesystem, never
//! on the host.

use std::borrow::Cow;
use std::ffi::{OsStr, OsString};
use std::fs::{self, DirBuilder, File, Permissions};
use std::io::{self, BufReader, Read};
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use rocker_common::constants::DIR_MODE;
use rocker_common::error::{Result, RockerError};
use tar::{Archive, Entry, EntryType};

use crate::storage;

/// Symlinks followed while resolving one path before giving up.
pub const MAX_LINK_HOPS: usize = 40;

/// Outcome of extracting one layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerSummary {
    /// Layer archive that was applied.
    pub path: PathBuf,
    /// Number of entries written to the root filesystem.
    pub entries: usize,
}

/// Entry kinds with defined extraction behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
enum EntryKind {
    Directory,
    RegularFile { mode: u32 },
    Symlink { target: PathBuf },
    HardLink { target: PathBuf },
}

/// Extracts every layer archive in `layers_dir` into `rootfs`, in name order.
///
/// Layer files are named so that name order equals manifest order
/// (see [`storage::layer_file_name`]). Files without the layer suffix
/// are ignored.
///
/// # Errors
///
/// Returns `RockerError::Io` if a directory cannot be listed or created,
/// `RockerError::Extraction` for malformed archives or filesystem failures,
/// and `RockerError::UnsupportedEntry` for entry kinds with no defined
/// handling. The first failure aborts the whole assembly.
pub fn assemble_rootfs(layers_dir: &Path, rootfs: &Path) -> Result<Vec<LayerSummary>> {
    let layers = list_layers(layers_dir)?;
    fs::create_dir_all(rootfs).map_err(|e| RockerError::Io {
        path: rootfs.to_path_buf(),
        source: e,
    })?;
    tracing::info!(
        layers = layers.len(),
        rootfs = %rootfs.display(),
        "assembling root filesystem"
    );

    layers
        .iter()
        .map(|layer| extract_layer(layer, rootfs))
        .collect()
}

/// Lists layer archives in `layers_dir`, sorted by file name.
///
/// # Errors
///
/// Returns `RockerError::Io` if the directory cannot be read.
pub fn list_layers(layers_dir: &Path) -> Result<Vec<PathBuf>> {
    let io_err = |e: io::Error| RockerError::Io {
        path: layers_dir.to_path_buf(),
        source: e,
    };
    let mut layers = Vec::new();
    for entry in fs::read_dir(layers_dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        if storage::is_layer_file(&path) {
            layers.push(path);
        }
    }
    layers.sort();
    Ok(layers)
}

/// Applies one gzip-compressed tar layer on top of `rootfs`.
///
/// # Errors
///
/// See [`assemble_rootfs`].
pub fn extract_layer(archive_path: &Path, rootfs: &Path) -> Result<LayerSummary> {
    let extraction = |path: &Path, source: io::Error| RockerError::Extraction {
        layer: archive_path.to_path_buf(),
        path: path.to_path_buf(),
        source,
    };
    tracing::info!(layer = %archive_path.display(), "extracting layer");

    let file = File::open(archive_path).map_err(|e| extraction(archive_path, e))?;
    let mut archive = Archive::new(GzDecoder::new(BufReader::new(file)));
    let mut entries = 0;

    for entry in archive.entries().map_err(|e| extraction(archive_path, e))? {
        let mut entry = entry.map_err(|e| extraction(archive_path, e))?;
        let raw_path = entry
            .path()
            .map_err(|e| extraction(archive_path, e))?
            .into_owned();

        let Some(kind) = classify(&entry, archive_path, &raw_path)? else {
            continue;
        };
        let relative = sanitize(&raw_path).map_err(|e| extraction(&raw_path, e))?;
        if relative.as_os_str().is_empty() {
            // The archive's own root directory.
            continue;
        }

        let dest = resolve_in_root(rootfs, &relative).map_err(|e| extraction(&raw_path, e))?;
        tracing::debug!(entry = %relative.display(), kind = ?kind, "applying entry");
        apply_entry(kind, &mut entry, rootfs, &dest).map_err(|e| extraction(&dest, e))?;
        entries += 1;
    }

    tracing::info!(layer = %archive_path.display(), entries, "layer extracted");
    Ok(LayerSummary {
        path: archive_path.to_path_buf(),
        entries,
    })
}

/// Maps a tar header onto a known entry kind.
///
/// Pax global headers carry archive metadata only and yield `None`.
fn classify<R: Read>(entry: &Entry<'_, R>, layer: &Path, path: &Path) -> Result<Option<EntryKind>> {
    let header = entry.header();
    let io_err = |source: io::Error| RockerError::Extraction {
        layer: layer.to_path_buf(),
        path: path.to_path_buf(),
        source,
    };
    let kind = match header.entry_type() {
        EntryType::Directory => EntryKind::Directory,
        EntryType::Regular | EntryType::Continuous => EntryKind::RegularFile {
            mode: header.mode().map_err(io_err)?,
        },
        EntryType::Symlink => EntryKind::Symlink {
            target: link_target(entry).map_err(io_err)?,
        },
        EntryType::Link => EntryKind::HardLink {
            target: link_target(entry).map_err(io_err)?,
        },
        EntryType::XGlobalHeader => return Ok(None),
        other => {
            return Err(RockerError::UnsupportedEntry {
                layer: layer.to_path_buf(),
                entry: path.display().to_string(),
                kind: format!("{other:?}"),
            });
        }
    };
    Ok(Some(kind))
}

fn link_target<R: Read>(entry: &Entry<'_, R>) -> io::Result<PathBuf> {
    entry
        .link_name()?
        .map(Cow::into_owned)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "link entry has no target"))
}

fn apply_entry(kind: EntryKind, data: &mut impl Read, root: &Path, dest: &Path) -> io::Result<()> {
    match kind {
        EntryKind::Directory => {
            if fs::symlink_metadata(dest).is_ok_and(|m| !m.is_dir()) {
                remove_existing(dest)?;
            }
            DirBuilder::new().recursive(true).mode(DIR_MODE).create(dest)
        }
        EntryKind::RegularFile { mode } => {
            create_parent(dest)?;
            // Never write through a symlink or a hard link left by an earlier layer.
            remove_existing(dest)?;
            let mut file = File::create(dest)?;
            file.set_permissions(Permissions::from_mode(mode & 0o7777))?;
            let _ = io::copy(data, &mut file)?;
            Ok(())
        }
        EntryKind::Symlink { target } => {
            create_parent(dest)?;
            remove_existing(dest)?;
            std::os::unix::fs::symlink(target, dest)
        }
        EntryKind::HardLink { target } => {
            create_parent(dest)?;
            let source = resolve_in_root(root, &sanitize(&target)?)?;
            if source == dest {
                return Ok(());
            }
            remove_existing(dest)?;
            fs::hard_link(source, dest)
        }
    }
}

/// Resolves `relative` against `root` the way a process chrooted into `root`
/// would see it.
///
/// Symlinks in parent positions are followed with `root` as `/`: absolute
/// targets restart at `root` and `..` stops there. The last component is
/// never followed, so callers replace or link the entry itself.
///
/// # Errors
///
/// Returns an error if a link cannot be read or more than
/// [`MAX_LINK_HOPS`] links are followed.
pub fn resolve_in_root(root: &Path, relative: &Path) -> io::Result<PathBuf> {
    let Some(name) = relative.file_name() else {
        return Ok(root.to_path_buf());
    };
    let mut pending: Vec<OsString> = Vec::new();
    if let Some(parent) = relative.parent() {
        push_components(&mut pending, parent);
    }
    let mut resolved = PathBuf::new();
    let mut hops = 0;

    while let Some(part) = pending.pop() {
        if part.as_os_str() == OsStr::new("..") {
            let _ = resolved.pop();
            continue;
        }
        let candidate = root.join(&resolved).join(&part);
        match fs::symlink_metadata(&candidate) {
            Ok(meta) if meta.file_type().is_symlink() => {
                hops += 1;
                if hops > MAX_LINK_HOPS {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        format!("too many levels of symbolic links: {}", relative.display()),
                    ));
                }
                let target = fs::read_link(&candidate)?;
                if target.has_root() {
                    resolved.clear();
                }
                push_components(&mut pending, &target);
            }
            _ => resolved.push(part),
        }
    }
    Ok(root.join(resolved).join(name))
}

/// Queues the components of `path` so that popping yields them in order.
fn push_components(pending: &mut Vec<OsString>, path: &Path) {
    let start = pending.len();
    for component in path.components() {
        match component {
            Component::Normal(part) => pending.push(part.to_os_string()),
            Component::ParentDir => pending.push(OsString::from("..")),
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }
    pending[start..].reverse();
}

fn create_parent(dest: &Path) -> io::Result<()> {
    match dest.parent() {
        Some(parent) => DirBuilder::new().recursive(true).mode(DIR_MODE).create(parent),
        None => Ok(()),
    }
}

/// Removes whatever exists at `path`. A missing path is not an error.
fn remove_existing(path: &Path) -> io::Result<()> {
    let result = match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) => Err(e),
    };
    match result {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Reduces an archive path to a path relative to the root filesystem.
///
/// Leading `/` and `.` components are dropped; `..` is rejected.
fn sanitize(path: &Path) -> io::Result<PathBuf> {
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
            Component::ParentDir => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("path escapes the root filesystem: {}", path.display()),
                ));
            }
        }
    }
    Ok(clean)
}
