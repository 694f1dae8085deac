//! Local filesystem snapshots.
//!
//! ## Architecture
//!
//! - `btrfs`: the Btrfs-backed [`SnapshotProvider`] and mount-table
//!   resolution
//! - `orchestrator`: snapshot creation and pruning under the full rule set
//!
//! The snapshot phase runs first; its retained pool feeds the archive phase.

pub mod btrfs;
pub mod orchestrator;

use crate::exec::CommandError;
use crate::pool::{NameError, Pool};
use async_trait::async_trait;
use thiserror::Error;

// Re-export commonly used types
pub use btrfs::{BtrfsSnapshots, BtrfsSource, find_source};
pub use orchestrator::SnapshotOrchestrator;

/// Capability for listing and mutating the snapshot pool.
#[async_trait]
pub trait SnapshotProvider: Send + Sync {
    /// List the current snapshot pool.
    async fn list(&self) -> Result<Pool, SnapshotError>;

    /// Create a new read-only snapshot under the given name.
    async fn create(&self, name: &str) -> Result<(), SnapshotError>;

    /// Delete the snapshot with the given name.
    async fn delete(&self, name: &str) -> Result<(), SnapshotError>;
}

/// Errors from the snapshot provider.
#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error(transparent)]
    Name(#[from] NameError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("could not find a btrfs mount containing {path}")]
    SourceNotFound { path: String },

    #[error("could not find subvol= in mount options '{options}'")]
    MissingSubvolume { options: String },

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
