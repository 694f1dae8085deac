//! Btrfs-backed snapshot provider.

use super::{SnapshotError, SnapshotProvider};
use crate::config::SnapshotConfig;
use crate::exec::{CommandLine, CommandRunner};
use crate::pool::{Naming, Pool, parse_snapshot_listing};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// The device and subvolume backing a mounted path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BtrfsSource {
    pub device: String,
    pub subvolume: String,
}

/// Resolve the device and subvolume of a mounted path from mount-table text
/// in `/proc/mounts` format.
///
/// The btrfs mount with the longest mount point containing `path` wins.
pub fn find_source(mounts: &str, path: &str) -> Result<BtrfsSource, SnapshotError> {
    let mut best: Option<(&str, &str, &str)> = None;
    for line in mounts.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 || fields[2] != "btrfs" {
            continue;
        }
        let mount_point = fields[1];
        if !path.starts_with(mount_point) {
            continue;
        }
        if best.is_none_or(|(_, previous, _)| mount_point.len() > previous.len()) {
            best = Some((fields[0], mount_point, fields[3]));
        }
    }
    let Some((device, _, options)) = best else {
        return Err(SnapshotError::SourceNotFound {
            path: path.to_string(),
        });
    };
    options
        .split(',')
        .find_map(|option| option.strip_prefix("subvol="))
        .map(|subvolume| BtrfsSource {
            device: device.to_string(),
            subvolume: subvolume.to_string(),
        })
        .ok_or_else(|| SnapshotError::MissingSubvolume {
            options: options.to_string(),
        })
}

/// Snapshot provider invoking btrfs through the command runner.
///
/// btrfs runs under sudo, which does not consult PATH; the binary path comes
/// from configuration.
pub struct BtrfsSnapshots {
    runner: Arc<dyn CommandRunner>,
    naming: Naming,
    btrfs_bin: String,
    source_path: String,
    mount_dir: PathBuf,
}

impl BtrfsSnapshots {
    pub fn new(runner: Arc<dyn CommandRunner>, config: &SnapshotConfig, naming: Naming) -> Self {
        Self {
            runner,
            naming,
            btrfs_bin: config.btrfs_bin.clone(),
            source_path: config.source_path.clone(),
            mount_dir: PathBuf::from(&config.mount_dir),
        }
    }

    /// Resolve the device and subvolume backing the configured source path.
    pub async fn resolve_source(&self) -> Result<BtrfsSource, SnapshotError> {
        let mounts = tokio::fs::read_to_string("/proc/mounts")
            .await
            .map_err(|source| SnapshotError::Io {
                path: "/proc/mounts".to_string(),
                source,
            })?;
        find_source(&mounts, &self.source_path)
    }

    fn subvolume_path(&self, name: &str) -> String {
        self.mount_dir.join(name).display().to_string()
    }
}

#[async_trait]
impl SnapshotProvider for BtrfsSnapshots {
    async fn list(&self) -> Result<Pool, SnapshotError> {
        let command = CommandLine::new("sudo")
            .arg(self.btrfs_bin.as_str())
            .args(["subvolume", "list"])
            .arg(self.source_path.as_str());
        let output = self.runner.capture(&command).await?;
        Ok(parse_snapshot_listing(&output, &self.naming)?)
    }

    async fn create(&self, name: &str) -> Result<(), SnapshotError> {
        info!(snapshot = %name, source = %self.source_path, "creating btrfs snapshot");
        let command = CommandLine::new("sudo")
            .arg(self.btrfs_bin.as_str())
            .args(["subvolume", "snapshot", "-r"])
            .arg(self.source_path.as_str())
            .arg(self.subvolume_path(name));
        Ok(self.runner.run(&command).await?)
    }

    async fn delete(&self, name: &str) -> Result<(), SnapshotError> {
        info!(snapshot = %name, "deleting btrfs snapshot");
        let command = CommandLine::new("sudo")
            .arg(self.btrfs_bin.as_str())
            .args(["subvolume", "delete"])
            .arg(self.subvolume_path(name));
        Ok(self.runner.run(&command).await?)
    }
}
