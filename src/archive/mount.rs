//! Scoped snapshot mounts.
//!
//! The mount point is a singleton resource reused serially across every
//! candidate/repository pair. Release is an explicit step the orchestrator
//! runs on every exit path rather than implicit unwind behavior.

use crate::exec::{CommandLine, CommandRunner};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// A snapshot subvolume mounted at the shared work mount point.
pub struct MountGuard<'r> {
    runner: &'r dyn CommandRunner,
    mount_point: PathBuf,
}

impl<'r> MountGuard<'r> {
    /// Prepare the mount point and mount the snapshot subvolume there.
    ///
    /// A stale mount left behind by an interrupted prior run is unmounted
    /// defensively first.
    pub async fn acquire(
        runner: &'r dyn CommandRunner,
        device: &str,
        subvolume: &str,
        mount_point: &Path,
    ) -> Result<MountGuard<'r>> {
        if mount_point.is_dir() {
            let command = unmount_command(mount_point);
            if let Err(error) = runner.run(&command).await {
                debug!(mount_point = %mount_point.display(), error = %error, "no stale mount to clean up");
            }
        } else {
            info!(mount_point = %mount_point.display(), "creating mount point");
            tokio::fs::create_dir_all(mount_point)
                .await
                .with_context(|| format!("failed to create {}", mount_point.display()))?;
        }

        let command = CommandLine::new("mount")
            .arg(device)
            .arg(mount_point.display().to_string())
            .arg("-o")
            .arg(format!("subvol={subvolume},noatime"));
        runner
            .run(&command)
            .await
            .with_context(|| format!("failed to mount snapshot {subvolume}"))?;

        Ok(MountGuard {
            runner,
            mount_point: mount_point.to_path_buf(),
        })
    }

    /// Unmount and remove the mount point.
    ///
    /// The settle delay gives the kernel time to stop considering the disk
    /// in use.
    pub async fn release(self, settle: Duration) -> Result<()> {
        tokio::time::sleep(settle).await;
        self.runner
            .run(&unmount_command(&self.mount_point))
            .await
            .with_context(|| format!("failed to unmount {}", self.mount_point.display()))?;
        info!(mount_point = %self.mount_point.display(), "removing mount point");
        tokio::fs::remove_dir(&self.mount_point)
            .await
            .with_context(|| format!("failed to remove {}", self.mount_point.display()))
    }
}

fn unmount_command(mount_point: &Path) -> CommandLine {
    CommandLine::new("umount").arg(mount_point.display().to_string())
}
