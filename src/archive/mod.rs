//! Off-site archive repositories.
//!
//! ## Architecture
//!
//! - `borg`: the Borg-backed [`ArchiveStore`]
//! - `mount`: scoped mount acquisition and guaranteed release
//! - `orchestrator`: per-repository archive creation, pruning and compaction
//!
//! Repositories are independent; a failure in one never aborts the others.

pub mod borg;
pub mod mount;
pub mod orchestrator;

use crate::config::RepositoryConfig;
use crate::exec::CommandError;
use crate::pool::{NameError, Pool};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use std::path::Path;
use thiserror::Error;

// Re-export commonly used types
pub use borg::BorgArchives;
pub use mount::MountGuard;
pub use orchestrator::ArchiveOrchestrator;

/// Capability for querying and mutating archive repositories.
#[async_trait]
pub trait ArchiveStore: Send + Sync {
    /// Lightweight reachability probe. An error marks the repository as
    /// unreachable for this run.
    async fn probe(&self, repository: &RepositoryConfig) -> Result<(), ArchiveError>;

    /// List the archives in a repository as an instant-keyed pool.
    async fn list(&self, repository: &RepositoryConfig) -> Result<Pool, ArchiveError>;

    /// Create an archive of `paths` (relative to `work_dir`), stamped with
    /// the snapshot's own instant rather than the backup run time.
    async fn create(
        &self,
        repository: &RepositoryConfig,
        name: &str,
        instant: NaiveDateTime,
        paths: &[String],
        work_dir: &Path,
    ) -> Result<(), ArchiveError>;

    /// Delete one archive.
    async fn delete(&self, repository: &RepositoryConfig, name: &str) -> Result<(), ArchiveError>;

    /// Reclaim space after deletions.
    async fn compact(&self, repository: &RepositoryConfig) -> Result<(), ArchiveError>;
}

/// Errors from the archive store.
#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error(transparent)]
    Name(#[from] NameError),

    #[error(transparent)]
    Command(#[from] CommandError),
}
