//! Stratum CLI - the `stratum` binary entry point.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use stratum_cli::catalog_file::FileCatalog;
use stratum_cli::Cli;
use stratum_core::{init_logging, FilesystemBackend, StorageBackend};
use stratum_index::catalog::Catalog;
use stratum_index::coordinator::RunCoordinator;
use stratum_index::gate::DeployGate;
use stratum_index::gc::RetentionPolicy;

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    init_logging(cli.log_format.into());
    stratum_index::metrics::register_metrics();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("build tokio runtime")?;

    runtime.block_on(run(cli))
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let policy = RetentionPolicy::new(cli.keep_generations, cli.delay_hours);
    if let Some(message) = policy.validate() {
        anyhow::bail!("invalid retention policy: {message}");
    }

    let backend = Arc::new(
        FilesystemBackend::new(&cli.index_root)
            .with_context(|| format!("open index root {}", cli.index_root.display()))?,
    );
    let catalog = Arc::new(
        FileCatalog::load(&cli.catalog)
            .await
            .with_context(|| format!("open catalog {}", cli.catalog.display()))?,
    );
    let gate = DeployGate::new(cli.deploy_gate_path());

    let coordinator = RunCoordinator::new(
        backend as Arc<dyn StorageBackend>,
        catalog as Arc<dyn Catalog>,
        gate,
        policy,
    );

    let outcome = coordinator.run(cli.run_mode(), cli.verbose).await;
    Ok(ExitCode::from(outcome.exit_code()))
}
