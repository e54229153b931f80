//! Supervisor branch: build the root filesystem, then launch the container.

use anyhow::Context;
use rocker_build::parser;
use rocker_build::runner::BuildRunner;
use rocker_common::error::RockerError;
use rocker_common::types::ContainerExit;
use rocker_core::cgroup::CgroupController;
use rocker_image::registry::RegistryClient;
use rocker_image::storage::LayerStore;
use rocker_runtime::process::SelfExecSpawner;
use rocker_runtime::supervisor::Supervisor;

use crate::cli::Cli;

/// Runs the download, assemble, isolate, execute pipeline for `cli`.
///
/// # Errors
///
/// Returns the first failure, labelled with its pipeline stage when it has one.
pub fn execute(cli: &Cli) -> anyhow::Result<ContainerExit> {
    let config = cli.resolve_config().context("loading configuration")?;
    let file = cli.instruction_file();
    let instructions = parser::parse_file(&file)
        .with_context(|| format!("parsing {}", file.display()))?;

    let store = LayerStore::open(&config.cache_root).map_err(staged)?;
    let client = RegistryClient::new(config.registry.clone()).map_err(staged)?;
    let prepared = BuildRunner::new(store, client, &cli.context)
        .prepare(&instructions)
        .map_err(staged)?;

    let supervisor = Supervisor::new(
        SelfExecSpawner::new(),
        CgroupController::new(&config.cgroup),
        config.resources,
    );
    let exit = supervisor
        .run(&prepared.into_launch_spec())
        .map_err(staged)?;

    if exit.success() {
        tracing::info!("container exited successfully");
    } else {
        tracing::warn!(code = ?exit.code, signal = ?exit.signal, "container exited with failure");
    }
    Ok(exit)
}

fn staged(err: RockerError) -> anyhow::Error {
    match err.stage() {
        Some(stage) => anyhow::Error::new(err).context(format!("{stage} failed")),
        None => err.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staged_errors_name_their_stage() {
        let err = staged(RockerError::ResourceAttach {
            message: "cgroup v2 is not mounted".into(),
        });
        assert_eq!(err.to_string(), "resource attach failed");
        assert!(format!("{err:#}").contains("cgroup v2 is not mounted"));
    }

    #[test]
    fn ambient_errors_pass_through() {
        let err = staged(RockerError::Config {
            message: "missing ENTRYPOINT".into(),
        });
        assert_eq!(err.to_string(), "invalid configuration: missing ENTRYPOINT");
    }
}
