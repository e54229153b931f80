//! Filesystem isolation for the container init process.
//!
//! Provides the `chroot` switch into an assembled root filesystem and the
//! `/proc` mount inside it.

pub mod mount;
pub mod root;
