//! Borg-backed archive store.

use super::{ArchiveError, ArchiveStore};
use crate::config::{ArchiveConfig, RepositoryConfig};
use crate::exec::{CommandLine, CommandRunner};
use crate::pool::{Naming, Pool, parse_archive_listing};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Archive store invoking borg through the command runner.
///
/// Every invocation carries the global archive environment with the
/// repository's own overrides applied on top.
pub struct BorgArchives {
    runner: Arc<dyn CommandRunner>,
    naming: Naming,
    env: Vec<(String, String)>,
    extra: Vec<String>,
}

impl BorgArchives {
    pub fn new(runner: Arc<dyn CommandRunner>, config: &ArchiveConfig, naming: Naming) -> Self {
        let mut env: Vec<(String, String)> = config
            .env
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        env.sort();
        Self {
            runner,
            naming,
            env,
            extra: config.extra.clone(),
        }
    }

    fn repository_env(&self, repository: &RepositoryConfig) -> Vec<(String, String)> {
        let mut env = self.env.clone();
        let mut overrides: Vec<_> = repository
            .env
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        overrides.sort();
        env.extend(overrides);
        env
    }

    fn borg(&self, repository: &RepositoryConfig) -> CommandLine {
        CommandLine::new("borg").envs(self.repository_env(repository))
    }
}

#[async_trait]
impl ArchiveStore for BorgArchives {
    async fn probe(&self, repository: &RepositoryConfig) -> Result<(), ArchiveError> {
        let command = self.borg(repository).arg("info").arg(repository.url.as_str());
        self.runner.capture(&command).await?;
        Ok(())
    }

    async fn list(&self, repository: &RepositoryConfig) -> Result<Pool, ArchiveError> {
        info!(repository = %repository.url, "listing archives");
        let command = self.borg(repository).arg("list").arg(repository.url.as_str());
        let output = self.runner.capture(&command).await?;
        Ok(parse_archive_listing(&output, &self.naming)?)
    }

    async fn create(
        &self,
        repository: &RepositoryConfig,
        name: &str,
        instant: NaiveDateTime,
        paths: &[String],
        work_dir: &Path,
    ) -> Result<(), ArchiveError> {
        info!(repository = %repository.url, archive = %name, "creating archive");
        let command = self
            .borg(repository)
            .args(["create", "--verbose", "--stats", "--show-rc"])
            .arg("--timestamp")
            // Chronological metadata matches the snapshot, not the run time.
            .arg(instant.format("%Y-%m-%dT%H:%M:%S").to_string())
            .args(self.extra.iter().cloned())
            .arg(format!("{}::{}", repository.url, name))
            .args(paths.iter().cloned())
            .current_dir(work_dir);
        Ok(self.runner.run(&command).await?)
    }

    async fn delete(&self, repository: &RepositoryConfig, name: &str) -> Result<(), ArchiveError> {
        info!(repository = %repository.url, archive = %name, "deleting archive");
        let command = self
            .borg(repository)
            .arg("delete")
            .arg(format!("{}::{}", repository.url, name));
        Ok(self.runner.run(&command).await?)
    }

    async fn compact(&self, repository: &RepositoryConfig) -> Result<(), ArchiveError> {
        info!(repository = %repository.url, "compacting repository");
        let command = self.borg(repository).arg("compact").arg(repository.url.as_str());
        Ok(self.runner.run(&command).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_repository_env_overrides_global_env() {
        let config = ArchiveConfig {
            env: HashMap::from([
                ("BORG_PASSPHRASE".to_string(), "global".to_string()),
                ("BORG_RSH".to_string(), "ssh".to_string()),
            ]),
            ..Default::default()
        };
        let store = BorgArchives::new(
            Arc::new(crate::exec::DryRunRunner::new()),
            &config,
            Naming::new("backup.", "%Y_%m_%d__%H_%M_%S"),
        );
        let repository = RepositoryConfig {
            url: "ssh://host/./repo".to_string(),
            env: HashMap::from([("BORG_PASSPHRASE".to_string(), "specific".to_string())]),
        };

        let env = store.repository_env(&repository);

        // Later entries win when applied to the child process environment.
        let last_passphrase = env
            .iter()
            .rev()
            .find(|(k, _)| k == "BORG_PASSPHRASE")
            .map(|(_, v)| v.as_str());
        assert_eq!(last_passphrase, Some("specific"));
        assert!(env.iter().any(|(k, v)| k == "BORG_RSH" && v == "ssh"));
    }
}
