//! Container execution for the rocker runtime.
//!
//! The binary runs in one of two modes (see [`launch::LaunchMode`]). The
//! supervisor re-executes itself as the container init, confines the new
//! process in a resource group, then lets it proceed; the init isolates
//! itself inside the root filesystem and replaces its image with the
//! entrypoint.

#![allow(unsafe_code)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod init;
pub mod launch;
pub mod process;
pub mod supervisor;
