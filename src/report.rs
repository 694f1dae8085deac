//! Per-run outcome reporting.
//!
//! Orchestrators return these structs instead of logging through ambient
//! state; the binary logs a summary at the end of the run.

use chrono::NaiveDateTime;
use std::fmt;
use tracing::info;

/// Why the snapshot phase did not create a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotSkipReason {
    /// Creation was skipped on request (`--skip-snapshot`).
    SkipRequested,
    /// The candidate instant was not selected by any retention rule.
    NotSelected,
}

impl fmt::Display for SnapshotSkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SkipRequested => write!(f, "skipped on request"),
            Self::NotSelected => write!(f, "not selected by any retention rule"),
        }
    }
}

/// Outcome of the snapshot phase.
#[derive(Debug, Clone, Default)]
pub struct SnapshotPhaseReport {
    /// Name of the created snapshot, if one was created.
    pub created: Option<String>,
    /// Why no snapshot was created, when none was.
    pub skipped: Option<SnapshotSkipReason>,
    /// Names of the pruned snapshots, in deletion order.
    pub pruned: Vec<String>,
}

/// Why the archive phase did not run at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveSkipReason {
    /// No snapshots exist to archive.
    NoSnapshots,
    /// No snapshot is selected by any backup-eligible rule.
    NothingSelected,
    /// The newest snapshot is not selected for backup; running now would
    /// silently omit it.
    LatestNotSelected {
        latest: NaiveDateTime,
        most_recent_selected: NaiveDateTime,
    },
}

impl fmt::Display for ArchiveSkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSnapshots => write!(f, "no snapshots available"),
            Self::NothingSelected => write!(f, "nothing selected for backup"),
            Self::LatestNotSelected {
                latest,
                most_recent_selected,
            } => write!(
                f,
                "latest snapshot {latest} not selected for backup (most recent selected: {most_recent_selected})"
            ),
        }
    }
}

/// Outcome for a single archive repository.
#[derive(Debug, Clone, Default)]
pub struct RepositoryReport {
    /// Repository URL.
    pub repository: String,
    /// The repository could not be reached and was skipped.
    pub unreachable: bool,
    /// Names of the archives created, in creation order.
    pub created: Vec<String>,
    /// Names of the archives pruned, oldest first.
    pub pruned: Vec<String>,
    /// Whether a compaction request was issued.
    pub compacted: bool,
    /// Error that aborted this repository's processing, if any. Other
    /// repositories are unaffected.
    pub error: Option<String>,
}

impl RepositoryReport {
    pub fn new(repository: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            ..Default::default()
        }
    }
}

/// Outcome of the archive phase.
#[derive(Debug, Clone, Default)]
pub struct ArchivePhaseReport {
    /// Why the phase was skipped entirely, if it was.
    pub skipped: Option<ArchiveSkipReason>,
    /// Per-repository outcomes, in configured order.
    pub repositories: Vec<RepositoryReport>,
}

impl ArchivePhaseReport {
    pub fn skipped(reason: ArchiveSkipReason) -> Self {
        Self {
            skipped: Some(reason),
            repositories: Vec::new(),
        }
    }
}

/// Outcome of a complete run.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub snapshots: SnapshotPhaseReport,
    pub archives: ArchivePhaseReport,
}

impl RunReport {
    /// Log a human-readable summary of the run.
    pub fn log(&self) {
        match (&self.snapshots.created, self.snapshots.skipped) {
            (Some(name), _) => info!(snapshot = %name, "snapshot created"),
            (None, Some(reason)) => info!(reason = %reason, "no snapshot created"),
            (None, None) => {}
        }
        info!(pruned = self.snapshots.pruned.len(), "snapshots pruned");

        if let Some(reason) = self.archives.skipped {
            info!(reason = %reason, "archive phase skipped");
            return;
        }
        for repository in &self.archives.repositories {
            if repository.unreachable {
                info!(repository = %repository.repository, "repository skipped (unreachable)");
                continue;
            }
            info!(
                repository = %repository.repository,
                created = repository.created.len(),
                pruned = repository.pruned.len(),
                compacted = repository.compacted,
                error = repository.error.as_deref().unwrap_or("none"),
                "repository processed"
            );
        }
    }
}
