//! Typed configuration with figment loading and an explicit validation pass.
//!
//! Configuration merges three layers: serialized defaults, a TOML file and
//! `SNAPVAULT__`-prefixed environment variables. The resulting value is
//! immutable; orchestrators receive the pieces they need by reference.
//! [`Configuration::validate`] runs before any orchestration and turns every
//! malformed field into a typed error.

use crate::pool::Naming;
use crate::retention::RetentionRule;
use chrono::NaiveDateTime;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default configuration file next to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "snapvault.toml";

/// One retention rule as configured.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Bucket width on the time axis.
    ///
    /// Env: SNAPVAULT__RULES (humantime string, e.g. "10m", "1day")
    #[serde(with = "humantime_serde")]
    pub interval: Duration,

    /// Number of most recent buckets to keep.
    pub amount: usize,

    /// Whether snapshots kept by this rule are also archived.
    #[serde(default)]
    pub backup: bool,
}

impl From<&RuleConfig> for RetentionRule {
    fn from(config: &RuleConfig) -> Self {
        Self {
            interval: config.interval,
            amount: config.amount,
            backup_eligible: config.backup,
        }
    }
}

/// Snapshot-side configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// Path of the mounted Btrfs volume to snapshot.
    ///
    /// Env: SNAPVAULT__SNAPSHOTS__SOURCE_PATH
    #[serde(default)]
    pub source_path: String,

    /// Prefix for snapshot subvolume names; the formatted instant is appended.
    #[serde(default = "default_snapshot_prefix")]
    pub prefix: String,

    /// Directory where snapshot subvolumes are created and mounted.
    #[serde(default)]
    pub mount_dir: String,

    /// Absolute path of the btrfs binary. Invocations go through sudo, which
    /// does not consult PATH.
    #[serde(default = "default_btrfs_bin")]
    pub btrfs_bin: String,

    /// Commands to run before creating a snapshot, each as an argv list.
    #[serde(default)]
    pub pre: Vec<Vec<String>>,

    /// Commands to run after the snapshot attempt, each as an argv list.
    /// These run on every exit path, including a failed creation.
    #[serde(default)]
    pub post: Vec<Vec<String>>,
}

fn default_snapshot_prefix() -> String {
    "snapshot.".to_string()
}

fn default_btrfs_bin() -> String {
    "/usr/bin/btrfs".to_string()
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            source_path: String::new(),
            prefix: default_snapshot_prefix(),
            mount_dir: String::new(),
            btrfs_bin: default_btrfs_bin(),
            pre: Vec::new(),
            post: Vec::new(),
        }
    }
}

/// One archive repository endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Repository URL as understood by borg.
    pub url: String,

    /// Environment overrides for this repository (credentials, passphrases),
    /// applied on top of the global archive environment.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// Archive-side configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Prefix for archive names; the formatted instant is appended.
    #[serde(default = "default_archive_prefix")]
    pub prefix: String,

    /// Environment overrides for every borg invocation.
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Repositories to archive to, processed strictly in this order.
    #[serde(default)]
    pub repositories: Vec<RepositoryConfig>,

    /// Sub-paths of the mounted snapshot to include in each archive.
    #[serde(default)]
    pub paths: Vec<String>,

    /// Extra arguments appended to every `borg create` invocation.
    #[serde(default)]
    pub extra: Vec<String>,

    /// Settle delay between finishing an archive and unmounting the
    /// snapshot; the disk may be considered busy for a moment.
    ///
    /// Env: SNAPVAULT__ARCHIVE__SETTLE
    #[serde(with = "humantime_serde", default = "default_settle")]
    pub settle: Duration,
}

fn default_archive_prefix() -> String {
    "backup.".to_string()
}

fn default_settle() -> Duration {
    Duration::from_secs(1)
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            prefix: default_archive_prefix(),
            env: HashMap::new(),
            repositories: Vec::new(),
            paths: Vec::new(),
            extra: Vec::new(),
            settle: default_settle(),
        }
    }
}

/// Root configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Configuration {
    /// Retention rules; the keep set is their union, order is irrelevant.
    #[serde(default)]
    pub rules: Vec<RuleConfig>,

    /// Snapshot configuration.
    #[serde(default)]
    pub snapshots: SnapshotConfig,

    /// Archive configuration.
    #[serde(default)]
    pub archive: ArchiveConfig,

    /// Chrono pattern for the instant suffix in snapshot and archive names.
    #[serde(default = "default_instant_format")]
    pub instant_format: String,

    /// Origin of the time axis used to align retention buckets, written in
    /// `instant_format`.
    #[serde(default = "default_time_origin")]
    pub time_origin: String,
}

fn default_instant_format() -> String {
    "%Y_%m_%d__%H_%M_%S".to_string()
}

fn default_time_origin() -> String {
    "2024_01_01__03_55_00".to_string()
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            snapshots: SnapshotConfig::default(),
            archive: ArchiveConfig::default(),
            instant_format: default_instant_format(),
            time_origin: default_time_origin(),
        }
    }
}

impl Configuration {
    /// Load from the default file location plus environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path(Path::new(DEFAULT_CONFIG_FILE))
    }

    /// Load from an explicit TOML file plus environment overrides.
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let config = Figment::from(Serialized::defaults(Configuration::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("SNAPVAULT__").split("__"))
            .extract()
            .map_err(Box::new)?;
        Ok(config)
    }

    /// Validate every field that orchestration depends on.
    ///
    /// Runs before any action is taken; a malformed rule or pattern never
    /// reaches the providers.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rules.is_empty() {
            return Err(ConfigError::NoRules);
        }
        for (index, rule) in self.rules.iter().enumerate() {
            if rule.interval.is_zero() {
                return Err(ConfigError::ZeroInterval { index });
            }
            if rule.amount == 0 {
                return Err(ConfigError::ZeroAmount { index });
            }
        }

        for (field, value) in [
            ("snapshots.source_path", &self.snapshots.source_path),
            ("snapshots.prefix", &self.snapshots.prefix),
            ("snapshots.mount_dir", &self.snapshots.mount_dir),
            ("snapshots.btrfs_bin", &self.snapshots.btrfs_bin),
            ("archive.prefix", &self.archive.prefix),
            ("instant_format", &self.instant_format),
        ] {
            if value.is_empty() {
                return Err(ConfigError::MissingField { field });
            }
        }

        for (kind, hooks) in [("pre", &self.snapshots.pre), ("post", &self.snapshots.post)] {
            for (index, hook) in hooks.iter().enumerate() {
                if hook.is_empty() {
                    return Err(ConfigError::EmptyHook { kind, index });
                }
            }
        }

        for (index, repository) in self.archive.repositories.iter().enumerate() {
            if repository.url.is_empty() {
                return Err(ConfigError::EmptyRepositoryUrl { index });
            }
        }
        if !self.archive.repositories.is_empty() && self.archive.paths.is_empty() {
            return Err(ConfigError::NoArchivePaths);
        }

        // Also exercises the pattern itself; an unparseable pattern can
        // never produce a valid origin.
        self.origin()?;

        Ok(())
    }

    /// The origin instant, parsed with the configured pattern.
    pub fn origin(&self) -> Result<NaiveDateTime, ConfigError> {
        NaiveDateTime::parse_from_str(&self.time_origin, &self.instant_format).map_err(|source| {
            ConfigError::InvalidOrigin {
                value: self.time_origin.clone(),
                pattern: self.instant_format.clone(),
                source,
            }
        })
    }

    /// All retention rules.
    pub fn retention_rules(&self) -> Vec<RetentionRule> {
        self.rules.iter().map(RetentionRule::from).collect()
    }

    pub fn snapshot_naming(&self) -> Naming {
        Naming::new(&self.snapshots.prefix, &self.instant_format)
    }

    pub fn archive_naming(&self) -> Naming {
        Naming::new(&self.archive.prefix, &self.instant_format)
    }

    /// The single reusable mount point used while archiving snapshots.
    pub fn work_mount_point(&self) -> PathBuf {
        Path::new(&self.snapshots.mount_dir).join(format!("{}current", self.snapshots.prefix))
    }
}

/// Errors raised by configuration loading and validation.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("configuration could not be loaded: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("at least one retention rule is required")]
    NoRules,

    #[error("rules[{index}]: interval must be non-zero")]
    ZeroInterval { index: usize },

    #[error("rules[{index}]: amount must be positive")]
    ZeroAmount { index: usize },

    #[error("{field} must not be empty")]
    MissingField { field: &'static str },

    #[error("snapshots.{kind}[{index}]: hook command must not be empty")]
    EmptyHook { kind: &'static str, index: usize },

    #[error("archive.repositories[{index}]: url must not be empty")]
    EmptyRepositoryUrl { index: usize },

    #[error("archive.paths must not be empty when repositories are configured")]
    NoArchivePaths,

    #[error("time_origin '{value}' does not match instant_format '{pattern}': {source}")]
    InvalidOrigin {
        value: String,
        pattern: String,
        #[source]
        source: chrono::ParseError,
    },
}
