//! # rocker-image
//!
//! Image acquisition and root filesystem assembly for the rocker runtime.
//!
//! Handles:
//! - **Registry**: token, manifest list, manifest, and blob requests against a
//!   Docker registry v2 endpoint.
//! - **Manifests**: wire types for manifest lists and single-platform manifests.
//! - **Storage**: on-disk layout of the layer cache and root filesystems.
//! - **Hashing**: SHA-256 verification of downloaded blobs.
//! - **Layers**: ordered extraction of layer archives into a root filesystem.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod hash;
pub mod layer;
pub mod manifest;
pub mod registry;
pub mod storage;
