//! # rocker-build
//!
//! Turns a Containerfile into a ready-to-launch root filesystem.
//!
//! Handles:
//! - **Instructions**: the closed set of `FROM`, `COPY`, and `ENTRYPOINT` records.
//! - **Parser**: line-oriented parsing of instruction files with `nom`.
//! - **Runner**: sequential execution of instructions against the layer store.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod instruction;
pub mod parser;
pub mod runner;
