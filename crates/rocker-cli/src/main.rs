//! rocker: build a root filesystem from a Containerfile and run it confined.
//!
//! The same binary plays two roles. Started by a user it is the supervisor;
//! re-executed by the supervisor with `ROCKER_INIT=1` it is the container's
//! init and ends by exec'ing the entrypoint.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

mod cli;
mod pipeline;

use clap::Parser;
use rocker_runtime::init;
use rocker_runtime::launch::LaunchMode;
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if LaunchMode::current() == LaunchMode::Init {
        match init::run() {
            Ok(never) => match never {},
            Err(err) => {
                tracing::error!(error = %err, stage = ?err.stage(), "container init failed");
                std::process::exit(init::exit_code_for(&err));
            }
        }
    }

    let cli = Cli::parse();
    let exit = pipeline::execute(&cli)?;
    std::process::exit(exit.status_code());
}
