//! # rocker-core
//!
//! Low-level Linux isolation primitives for the rocker runtime.
//!
//! This crate provides safe abstractions over:
//! - **Cgroups v2**: per-launch groups with memory and CPU ceilings.
//! - **Filesystem**: `chroot` into an assembled root and the `/proc` mount.
//!
//! Operations that only make sense on Linux have stubs on other targets
//! that fail with a descriptive error.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod cgroup;
pub mod filesystem;
