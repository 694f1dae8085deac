//! Per-repository archive creation, pruning and compaction.

use super::{ArchiveStore, MountGuard};
use crate::config::{Configuration, RepositoryConfig};
use crate::exec::CommandRunner;
use crate::pool::{Naming, Pool};
use crate::report::{ArchivePhaseReport, ArchiveSkipReason, RepositoryReport};
use crate::retention::{RetentionRule, grandfatherson};
use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Reconciles the retained snapshot pool against every configured archive
/// repository, under the backup-eligible rules only.
///
/// Repositories are processed strictly sequentially: the work mount point is
/// a singleton resource, and exclusivity is enforced purely by sequencing.
/// A failure inside one repository abandons its remaining candidates but
/// never aborts the others.
pub struct ArchiveOrchestrator {
    store: Arc<dyn ArchiveStore>,
    runner: Arc<dyn CommandRunner>,
    naming: Naming,
    rules: Vec<RetentionRule>,
    origin: NaiveDateTime,
    repositories: Vec<RepositoryConfig>,
    paths: Vec<String>,
    device: String,
    mount_point: PathBuf,
    settle: Duration,
    dry_run: bool,
}

impl ArchiveOrchestrator {
    pub fn new(
        store: Arc<dyn ArchiveStore>,
        runner: Arc<dyn CommandRunner>,
        config: &Configuration,
        device: String,
        dry_run: bool,
    ) -> Result<Self> {
        Ok(Self {
            store,
            runner,
            naming: config.archive_naming(),
            rules: config
                .retention_rules()
                .into_iter()
                .filter(|rule| rule.backup_eligible)
                .collect(),
            origin: config.origin().context("invalid time origin")?,
            repositories: config.archive.repositories.clone(),
            paths: config.archive.paths.clone(),
            device,
            mount_point: config.work_mount_point(),
            settle: config.archive.settle,
            dry_run,
        })
    }

    /// Run the archive phase against every configured repository.
    pub async fn run(&self, snapshots: &Pool) -> ArchivePhaseReport {
        let Some(latest) = snapshots.latest() else {
            return ArchivePhaseReport::skipped(ArchiveSkipReason::NoSnapshots);
        };

        let decision = grandfatherson(&snapshots.instants(), self.origin, &self.rules);
        let Some(most_recent_selected) = decision.keep.iter().next_back().copied() else {
            info!("nothing selected for backup, skipping archive phase");
            return ArchivePhaseReport::skipped(ArchiveSkipReason::NothingSelected);
        };
        if !decision.keep.contains(&latest) {
            // Running now would silently produce backups that omit the
            // newest snapshot.
            info!(
                latest = %latest,
                most_recent_selected = %most_recent_selected,
                "latest snapshot not selected for backup, skipping archive phase"
            );
            return ArchivePhaseReport::skipped(ArchiveSkipReason::LatestNotSelected {
                latest,
                most_recent_selected,
            });
        }

        // Instants outside the keep set are never referenced in this phase;
        // the per-repository prune comparison below is intentionally partial.
        let candidates = snapshots.filtered(|instant| decision.keep.contains(&instant));

        let mut report = ArchivePhaseReport::default();
        for repository in &self.repositories {
            let mut repository_report = RepositoryReport::new(&repository.url);
            match self
                .process_repository(repository, &candidates, &decision.keep, &mut repository_report)
                .await
            {
                Ok(()) => {
                    info!(
                        repository = %repository.url,
                        created = repository_report.created.len(),
                        pruned = repository_report.pruned.len(),
                        "repository reconciled"
                    );
                }
                Err(error) => {
                    let reason = format!("{error:#}");
                    warn!(
                        repository = %repository.url,
                        error = %reason,
                        "repository processing failed"
                    );
                    repository_report.error = Some(reason);
                }
            }
            report.repositories.push(repository_report);
        }
        report
    }

    /// Reconcile one repository: create missing candidate archives, prune
    /// everything outside the keep set, compact if anything was pruned.
    async fn process_repository(
        &self,
        repository: &RepositoryConfig,
        candidates: &Pool,
        keep: &BTreeSet<NaiveDateTime>,
        report: &mut RepositoryReport,
    ) -> Result<()> {
        if let Err(error) = self.store.probe(repository).await {
            warn!(repository = %repository.url, error = %error, "could not access repository, skipping");
            report.unreachable = true;
            return Ok(());
        }

        let archives = self
            .store
            .list(repository)
            .await
            .context("failed to list archives")?;

        for (instant, snapshot_name) in candidates.iter() {
            if archives.contains(&instant) {
                continue;
            }
            let archive_name = self
                .create_archive(repository, instant, snapshot_name)
                .await?;
            report.created.push(archive_name);
        }

        // Oldest first.
        for (instant, archive_name) in archives.iter() {
            if keep.contains(&instant) {
                continue;
            }
            self.store
                .delete(repository, archive_name)
                .await
                .with_context(|| format!("failed to delete archive {archive_name}"))?;
            report.pruned.push(archive_name.to_string());
        }

        // Compaction is expensive; only reclaim space when something was
        // actually deleted.
        if !report.pruned.is_empty() {
            self.store
                .compact(repository)
                .await
                .context("failed to compact repository")?;
            report.compacted = true;
        }

        Ok(())
    }

    /// Mount the snapshot, verify the source paths, create the archive.
    ///
    /// The mount is released on every exit path; a creation failure
    /// propagates only after cleanup completes.
    async fn create_archive(
        &self,
        repository: &RepositoryConfig,
        instant: NaiveDateTime,
        snapshot_name: &str,
    ) -> Result<String> {
        let archive_name = self.naming.format(instant);
        let guard = MountGuard::acquire(
            self.runner.as_ref(),
            &self.device,
            snapshot_name,
            &self.mount_point,
        )
        .await?;

        let result = self.verify_and_create(repository, &archive_name, instant).await;
        let cleanup = guard.release(self.settle).await;
        result?;
        cleanup?;
        Ok(archive_name)
    }

    async fn verify_and_create(
        &self,
        repository: &RepositoryConfig,
        archive_name: &str,
        instant: NaiveDateTime,
    ) -> Result<()> {
        if !self.dry_run {
            for path in &self.paths {
                let full_path = self.mount_point.join(path);
                if !full_path.exists() {
                    anyhow::bail!(
                        "path does not exist under snapshot mount: {}",
                        full_path.display()
                    );
                }
            }
        }
        self.store
            .create(
                repository,
                archive_name,
                instant,
                &self.paths,
                &self.mount_point,
            )
            .await
            .with_context(|| format!("failed to create archive {archive_name}"))
    }
}
