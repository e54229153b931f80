//! Local storage layout for layer archives and root filesystems.
//!
//! ```text
//! <root>/layers/<name>/<tag>/NNNNNNNN-<base64url(digest)>.tar.gz
//! <root>/rootfs/<name>/<tag>/
//! ```
//!
//! The zero-padded manifest index in each file name makes a sorted directory
//! listing equal to manifest order.

use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use rocker_common::constants::{LAYER_FILE_SUFFIX, LAYERS_DIR, ROOTFS_DIR};
use rocker_common::error::{Result, RockerError};
use rocker_common::types::ImageRef;

/// Manages the on-disk cache rooted at a configured directory.
#[derive(Debug, Clone)]
pub struct LayerStore {
    /// Root directory for all cached data.
    root: PathBuf,
}

impl LayerStore {
    /// Opens the store, creating the root directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| RockerError::Io {
            path: root.clone(),
            source: e,
        })?;
        tracing::info!(path = %root.display(), "opening layer store");
        Ok(Self { root })
    }

    /// Directory holding the layer archives of `image`.
    #[must_use]
    pub fn layers_dir(&self, image: &ImageRef) -> PathBuf {
        self.root.join(LAYERS_DIR).join(&image.name).join(&image.tag)
    }

    /// Directory holding the assembled root filesystem of `image`.
    #[must_use]
    pub fn rootfs_dir(&self, image: &ImageRef) -> PathBuf {
        self.root.join(ROOTFS_DIR).join(&image.name).join(&image.tag)
    }

    /// Whether a root filesystem for `image` already exists and is non-empty.
    ///
    /// This is the coarse cache check: contents are not verified.
    #[must_use]
    pub fn has_rootfs(&self, image: &ImageRef) -> bool {
        std::fs::read_dir(self.rootfs_dir(image))
            .is_ok_and(|mut entries| entries.next().is_some())
    }

    /// Returns the root storage path.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// File name for the layer at manifest position `index` with `digest`.
#[must_use]
pub fn layer_file_name(index: usize, digest: &str) -> String {
    format!("{index:08}-{}{LAYER_FILE_SUFFIX}", URL_SAFE.encode(digest))
}

/// Recovers `(index, digest)` from a name produced by [`layer_file_name`].
#[must_use]
pub fn parse_layer_file_name(name: &str) -> Option<(usize, String)> {
    let stem = name.strip_suffix(LAYER_FILE_SUFFIX)?;
    let (index, encoded) = stem.split_once('-')?;
    let index = index.parse().ok()?;
    let bytes = URL_SAFE.decode(encoded).ok()?;
    let digest = String::from_utf8(bytes).ok()?;
    Some((index, digest))
}

/// Whether `path` carries the layer archive suffix.
#[must_use]
pub fn is_layer_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.ends_with(LAYER_FILE_SUFFIX))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIGEST: &str = "sha256:4abcf20661432fb2d719aaf90656f55c287f8ca915dc1c92ec14ff61e67fbaf8";

    #[test]
    fn store_open_creates_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join("cache");
        let store = LayerStore::open(&root).expect("open");
        assert!(root.is_dir());
        assert_eq!(store.root(), root);
    }

    #[test]
    fn store_paths_are_keyed_by_name_and_tag() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = LayerStore::open(dir.path()).expect("open");
        let image = ImageRef::new("node", "alpine");
        assert!(store.layers_dir(&image).ends_with("layers/node/alpine"));
        assert!(store.rootfs_dir(&image).ends_with("rootfs/node/alpine"));
    }

    #[test]
    fn has_rootfs_requires_non_empty_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = LayerStore::open(dir.path()).expect("open");
        let image = ImageRef::new("alpine", "3.19");
        assert!(!store.has_rootfs(&image));

        let rootfs = store.rootfs_dir(&image);
        std::fs::create_dir_all(&rootfs).expect("mkdir");
        assert!(!store.has_rootfs(&image));

        std::fs::create_dir(rootfs.join("bin")).expect("mkdir bin");
        assert!(store.has_rootfs(&image));
    }

    #[test]
    fn layer_file_name_is_reversible() {
        let name = layer_file_name(3, DIGEST);
        assert!(name.starts_with("00000003-"));
        assert!(name.ends_with(".tar.gz"));
        assert!(!name.contains('/'));
        assert_eq!(parse_layer_file_name(&name), Some((3, DIGEST.to_string())));
    }

    #[test]
    fn layer_file_names_sort_in_manifest_order() {
        let mut names: Vec<String> = [
            (10_000, "sha256:aa"),
            (9_999, "sha256:bb"),
            (10, "sha256:cc"),
            (2, "sha256:ff"),
            (0, "sha256:zz"),
        ]
        .iter()
        .map(|(i, d)| layer_file_name(*i, d))
        .collect();
        names.sort();
        let order: Vec<usize> = names
            .iter()
            .filter_map(|n| parse_layer_file_name(n).map(|(i, _)| i))
            .collect();
        assert_eq!(order, vec![0, 2, 10, 9_999, 10_000]);
    }

    #[test]
    fn parse_rejects_foreign_names() {
        assert!(parse_layer_file_name("notes.txt").is_none());
        assert!(parse_layer_file_name("abc.tar.gz").is_none());
    }

    #[test]
    fn is_layer_file_checks_suffix() {
        assert!(is_layer_file(Path::new("/x/0000-abc.tar.gz")));
        assert!(!is_layer_file(Path::new("/x/0000-abc.tar")));
    }
}
