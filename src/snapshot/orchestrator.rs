//! Snapshot creation and pruning under the full rule set.

use super::SnapshotProvider;
use crate::config::Configuration;
use crate::exec::{CommandLine, CommandRunner};
use crate::pool::{Naming, Pool};
use crate::report::{SnapshotPhaseReport, SnapshotSkipReason};
use crate::retention::{RetentionRule, grandfatherson};
use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use std::sync::Arc;
use tracing::{info, warn};

/// Decides and executes local snapshot creation and deletion.
///
/// A deletion failure aborts the rest of the phase; the archive phase must
/// never run against an inconsistent on-disk snapshot set.
pub struct SnapshotOrchestrator {
    provider: Arc<dyn SnapshotProvider>,
    runner: Arc<dyn CommandRunner>,
    naming: Naming,
    rules: Vec<RetentionRule>,
    origin: NaiveDateTime,
    pre: Vec<Vec<String>>,
    post: Vec<Vec<String>>,
}

impl SnapshotOrchestrator {
    pub fn new(
        provider: Arc<dyn SnapshotProvider>,
        runner: Arc<dyn CommandRunner>,
        config: &Configuration,
    ) -> Result<Self> {
        Ok(Self {
            provider,
            runner,
            naming: config.snapshot_naming(),
            rules: config.retention_rules(),
            origin: config.origin().context("invalid time origin")?,
            pre: config.snapshots.pre.clone(),
            post: config.snapshots.post.clone(),
        })
    }

    /// Run the snapshot phase anchored at `now` and return the retained pool.
    ///
    /// With `skip_snapshot` the pool is only listed; neither creation nor
    /// pruning takes place.
    pub async fn run(
        &self,
        now: NaiveDateTime,
        skip_snapshot: bool,
    ) -> Result<(Pool, SnapshotPhaseReport)> {
        let mut pool = self
            .provider
            .list()
            .await
            .context("failed to list snapshots")?;
        info!(snapshots = pool.len(), "listed existing snapshots");

        let mut report = SnapshotPhaseReport::default();
        if skip_snapshot {
            info!("skipping snapshot creation and pruning on request");
            report.skipped = Some(SnapshotSkipReason::SkipRequested);
            return Ok((pool, report));
        }

        // The candidate instant is re-derived by parsing the synthesized name
        // back, so the decision uses the exact representation that will be
        // persisted.
        let candidate_name = self.naming.format(now);
        let candidate = self
            .naming
            .parse(&candidate_name)
            .context("candidate name does not round-trip through the configured pattern")?;
        pool.insert(candidate, candidate_name.clone());

        let decision = grandfatherson(&pool.instants(), self.origin, &self.rules);
        if decision.keep.contains(&candidate) {
            self.create_snapshot(&candidate_name).await?;
            report.created = Some(candidate_name);
        } else {
            info!(candidate = %candidate_name, "candidate not selected by any rule, skipping snapshot");
            pool.remove(&candidate);
            report.skipped = Some(SnapshotSkipReason::NotSelected);
        }

        // Ascending instant order; deletion order is a determinism contract,
        // not cosmetic, so reruns behave identically regardless of listing
        // order.
        for instant in &decision.prune {
            let Some(name) = pool.get(instant).map(str::to_string) else {
                // The unselected candidate was never created.
                continue;
            };
            self.provider
                .delete(&name)
                .await
                .with_context(|| format!("failed to delete snapshot {name}"))?;
            info!(snapshot = %name, "snapshot pruned");
            pool.remove(instant);
            report.pruned.push(name);
        }

        Ok((pool, report))
    }

    /// Create a snapshot bracketed by the configured hooks.
    async fn create_snapshot(&self, name: &str) -> Result<()> {
        let result = self.prepare_and_create(name).await;
        // Post-hooks are the cleanup half of the pre/post pair and run on
        // every exit path, including after a failed creation.
        let cleanup = self.run_post_hooks().await;
        result?;
        cleanup
    }

    async fn prepare_and_create(&self, name: &str) -> Result<()> {
        for hook in &self.pre {
            let command = hook_command(hook);
            self.runner
                .run(&command)
                .await
                .with_context(|| format!("pre-hook `{command}` failed"))?;
        }
        info!(snapshot = %name, "creating new snapshot");
        self.provider
            .create(name)
            .await
            .with_context(|| format!("failed to create snapshot {name}"))
    }

    /// Run every post-hook, then surface the first failure.
    async fn run_post_hooks(&self) -> Result<()> {
        let mut first_error = None;
        for hook in &self.post {
            let command = hook_command(hook);
            if let Err(error) = self.runner.run(&command).await {
                warn!(command = %command, error = %error, "post-hook failed");
                first_error
                    .get_or_insert(anyhow::Error::new(error).context("post-hook failed"));
            }
        }
        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

fn hook_command(argv: &[String]) -> CommandLine {
    // Validation rejects empty hooks before orchestration starts.
    let mut parts = argv.iter().cloned();
    let program = parts.next().unwrap_or_default();
    CommandLine::new(program).args(parts)
}
