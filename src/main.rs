//! snapvault binary: snapshot phase, then archive phase.

use anyhow::{Context, Result};
use clap::Parser;
use snapvault::archive::{ArchiveOrchestrator, BorgArchives};
use snapvault::cli::{Cli, CliCommand, utils};
use snapvault::exec::{CommandRunner, DryRunRunner, SystemRunner};
use snapvault::report::{ArchivePhaseReport, ArchiveSkipReason, RunReport};
use snapvault::snapshot::{BtrfsSnapshots, SnapshotOrchestrator};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    utils::init_logging(&cli);

    let config = utils::load_config(cli.config.as_ref())?;

    match cli.command.clone().unwrap_or_default() {
        CliCommand::Config { json } => return utils::display_config(&config, json),
        CliCommand::Validate => {
            config.validate().context("configuration is invalid")?;
            println!("Configuration is valid");
            return Ok(());
        }
        CliCommand::Run => {}
    }

    // Every malformed rule or pattern surfaces here, before any action.
    config.validate().context("configuration is invalid")?;

    let runner: Arc<dyn CommandRunner> = if cli.dry_run {
        info!("dry-run mode: mutating commands will be skipped");
        Arc::new(DryRunRunner::new())
    } else {
        Arc::new(SystemRunner::new())
    };

    let provider = Arc::new(BtrfsSnapshots::new(
        runner.clone(),
        &config.snapshots,
        config.snapshot_naming(),
    ));

    let snapshot_orchestrator =
        SnapshotOrchestrator::new(provider.clone(), runner.clone(), &config)?;
    let now = chrono::Local::now().naive_local();
    let (pool, snapshot_report) = snapshot_orchestrator.run(now, cli.skip_snapshot).await?;

    let archives = if pool.is_empty() {
        ArchivePhaseReport::skipped(ArchiveSkipReason::NoSnapshots)
    } else {
        let source = provider
            .resolve_source()
            .await
            .context("failed to resolve btrfs source device")?;
        let store = Arc::new(BorgArchives::new(
            runner.clone(),
            &config.archive,
            config.archive_naming(),
        ));
        let archive_orchestrator =
            ArchiveOrchestrator::new(store, runner.clone(), &config, source.device, cli.dry_run)?;
        archive_orchestrator.run(&pool).await
    };

    let report = RunReport {
        snapshots: snapshot_report,
        archives,
    };
    report.log();

    Ok(())
}
