//! snapvault
//!
//! Retains and prunes two chained pools of point-in-time data copies: local
//! Btrfs snapshots and off-site Borg archives derived from them, under a
//! generalized grandfather-son retention scheme.
//!
//! The snapshot phase runs first and yields the retained snapshot pool; the
//! archive phase then reconciles that pool against every configured
//! repository in sequence, with per-repository fault isolation and
//! guaranteed mount cleanup.

pub mod archive;
pub mod cli;
pub mod config;
pub mod exec;
pub mod pool;
pub mod report;
pub mod retention;
pub mod snapshot;

// Re-export commonly used types
pub use archive::{ArchiveOrchestrator, ArchiveStore, BorgArchives, MountGuard};
pub use config::{ConfigError, Configuration};
pub use exec::{CommandLine, CommandRunner, DryRunRunner, SystemRunner};
pub use pool::{Naming, Pool};
pub use report::{ArchivePhaseReport, RepositoryReport, RunReport, SnapshotPhaseReport};
pub use retention::{RetentionDecision, RetentionRule, grandfatherson, select_relevant};
pub use snapshot::{BtrfsSnapshots, SnapshotOrchestrator, SnapshotProvider};
