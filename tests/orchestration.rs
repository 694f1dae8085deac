//! End-to-end orchestration properties over in-memory fakes.
//!
//! The fakes stand in for btrfs and borg; the orchestrators, retention
//! decisions and reporting run unchanged.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use snapvault::archive::{ArchiveError, ArchiveOrchestrator, ArchiveStore};
use snapvault::config::{
    ArchiveConfig, Configuration, RepositoryConfig, RuleConfig, SnapshotConfig,
};
use snapvault::exec::{CommandError, CommandLine, CommandRunner};
use snapvault::pool::{NameError, Naming, Pool};
use snapvault::report::{ArchiveSkipReason, SnapshotSkipReason};
use snapvault::snapshot::{SnapshotError, SnapshotOrchestrator, SnapshotProvider};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const PATTERN: &str = "%Y_%m_%d__%H_%M_%S";

fn at(hour: u32, minute: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2022, 5, 5)
        .unwrap()
        .and_hms_opt(hour, minute, 0)
        .unwrap()
}

fn snapshot_naming() -> Naming {
    Naming::new("snapshot.", PATTERN)
}

fn archive_naming() -> Naming {
    Naming::new("backup.", PATTERN)
}

fn injected_failure(what: &str) -> CommandError {
    CommandError::Spawn {
        command: what.to_string(),
        source: std::io::Error::other("injected failure"),
    }
}

/// Runner that records every mutating command and succeeds.
#[derive(Default)]
struct RecordingRunner {
    commands: Mutex<Vec<String>>,
}

impl RecordingRunner {
    fn recorded(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, command: &CommandLine) -> Result<(), CommandError> {
        self.commands.lock().unwrap().push(command.to_string());
        Ok(())
    }

    async fn capture(&self, _command: &CommandLine) -> Result<String, CommandError> {
        Ok(String::new())
    }
}

/// In-memory snapshot provider.
struct FakeSnapshots {
    pool: Mutex<Pool>,
    naming: Naming,
    fail_create: bool,
    fail_delete: bool,
}

impl FakeSnapshots {
    fn with_instants(instants: &[NaiveDateTime]) -> Self {
        let naming = snapshot_naming();
        let mut pool = Pool::new();
        for &instant in instants {
            pool.insert(instant, naming.format(instant));
        }
        Self {
            pool: Mutex::new(pool),
            naming,
            fail_create: false,
            fail_delete: false,
        }
    }

    fn current(&self) -> Pool {
        self.pool.lock().unwrap().clone()
    }
}

#[async_trait]
impl SnapshotProvider for FakeSnapshots {
    async fn list(&self) -> Result<Pool, SnapshotError> {
        Ok(self.current())
    }

    async fn create(&self, name: &str) -> Result<(), SnapshotError> {
        if self.fail_create {
            return Err(SnapshotError::Command(injected_failure(name)));
        }
        let instant = self.naming.parse(name)?;
        self.pool.lock().unwrap().insert(instant, name.to_string());
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<(), SnapshotError> {
        if self.fail_delete {
            return Err(SnapshotError::Command(injected_failure(name)));
        }
        let instant = self.naming.parse(name)?;
        self.pool.lock().unwrap().remove(&instant);
        Ok(())
    }
}

/// In-memory archive store tracking one pool per repository URL.
#[derive(Default)]
struct StoreState {
    repositories: HashMap<String, Pool>,
    calls: Vec<String>,
}

struct FakeStore {
    state: Mutex<StoreState>,
    naming: Naming,
    unreachable: Vec<String>,
    unparseable: Vec<String>,
}

impl FakeStore {
    fn new() -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            naming: archive_naming(),
            unreachable: Vec::new(),
            unparseable: Vec::new(),
        }
    }

    fn seed(&self, url: &str, instants: &[NaiveDateTime]) {
        let mut pool = Pool::new();
        for &instant in instants {
            pool.insert(instant, self.naming.format(instant));
        }
        self.state
            .lock()
            .unwrap()
            .repositories
            .insert(url.to_string(), pool);
    }

    fn pool(&self, url: &str) -> Pool {
        self.state
            .lock()
            .unwrap()
            .repositories
            .get(url)
            .cloned()
            .unwrap_or_default()
    }

    fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    fn calls_for(&self, url: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|call| call.contains(url))
            .collect()
    }
}

#[async_trait]
impl ArchiveStore for FakeStore {
    async fn probe(&self, repository: &RepositoryConfig) -> Result<(), ArchiveError> {
        if self.unreachable.contains(&repository.url) {
            return Err(ArchiveError::Command(injected_failure(&repository.url)));
        }
        Ok(())
    }

    async fn list(&self, repository: &RepositoryConfig) -> Result<Pool, ArchiveError> {
        if self.unparseable.contains(&repository.url) {
            return Err(ArchiveError::Name(NameError::MissingPrefix {
                name: "legacy.2020_01_01__00_00_00".to_string(),
                prefix: "backup.".to_string(),
            }));
        }
        Ok(self.pool(&repository.url))
    }

    async fn create(
        &self,
        repository: &RepositoryConfig,
        name: &str,
        instant: NaiveDateTime,
        _paths: &[String],
        _work_dir: &Path,
    ) -> Result<(), ArchiveError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("create {} {}", repository.url, name));
        state
            .repositories
            .entry(repository.url.clone())
            .or_default()
            .insert(instant, name.to_string());
        Ok(())
    }

    async fn delete(&self, repository: &RepositoryConfig, name: &str) -> Result<(), ArchiveError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("delete {} {}", repository.url, name));
        let instant = self.naming.parse(name)?;
        if let Some(pool) = state.repositories.get_mut(&repository.url) {
            pool.remove(&instant);
        }
        Ok(())
    }

    async fn compact(&self, repository: &RepositoryConfig) -> Result<(), ArchiveError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("compact {}", repository.url));
        Ok(())
    }
}

fn repository(url: &str) -> RepositoryConfig {
    RepositoryConfig {
        url: url.to_string(),
        env: HashMap::new(),
    }
}

/// Ten-minute rule keeps 3 buckets, hourly backup rule keeps 4.
fn test_config(mount_dir: &Path, repositories: Vec<RepositoryConfig>) -> Configuration {
    Configuration {
        rules: vec![
            RuleConfig {
                interval: Duration::from_secs(600),
                amount: 3,
                backup: false,
            },
            RuleConfig {
                interval: Duration::from_secs(3600),
                amount: 4,
                backup: true,
            },
        ],
        snapshots: SnapshotConfig {
            source_path: "/home".to_string(),
            mount_dir: mount_dir.display().to_string(),
            ..Default::default()
        },
        archive: ArchiveConfig {
            repositories,
            settle: Duration::from_millis(1),
            ..Default::default()
        },
        time_origin: "2022_05_05__00_00_00".to_string(),
        ..Default::default()
    }
}

fn snapshot_orchestrator(
    provider: &Arc<FakeSnapshots>,
    runner: &Arc<RecordingRunner>,
    config: &Configuration,
) -> SnapshotOrchestrator {
    SnapshotOrchestrator::new(provider.clone(), runner.clone(), config).unwrap()
}

fn archive_orchestrator(
    store: &Arc<FakeStore>,
    runner: &Arc<RecordingRunner>,
    config: &Configuration,
) -> ArchiveOrchestrator {
    ArchiveOrchestrator::new(store.clone(), runner.clone(), config, "/dev/test".to_string(), false)
        .unwrap()
}

#[tokio::test]
async fn test_full_run_creates_prunes_and_compacts() {
    let workspace = tempfile::tempdir().unwrap();
    let config = test_config(workspace.path(), vec![repository("repo1")]);
    let runner = Arc::new(RecordingRunner::default());
    let provider = Arc::new(FakeSnapshots::with_instants(&[
        at(9, 0),
        at(10, 0),
        at(11, 0),
        at(12, 0),
        at(12, 50),
    ]));
    let store = Arc::new(FakeStore::new());
    store.seed("repo1", &[at(9, 0), at(10, 0)]);

    let (pool, snapshot_report) = snapshot_orchestrator(&provider, &runner, &config)
        .run(at(13, 5), false)
        .await
        .unwrap();

    // The candidate opens a fresh bucket under both rules and is created;
    // 09:00 has aged out of both rules and is pruned.
    assert_eq!(
        snapshot_report.created.as_deref(),
        Some("snapshot.2022_05_05__13_05_00")
    );
    assert_eq!(snapshot_report.pruned, vec!["snapshot.2022_05_05__09_00_00"]);
    assert_eq!(
        pool.instants(),
        vec![at(10, 0), at(11, 0), at(12, 0), at(12, 50), at(13, 5)]
    );
    assert_eq!(provider.current(), pool);

    let archive_report = archive_orchestrator(&store, &runner, &config)
        .run(&pool)
        .await;

    assert!(archive_report.skipped.is_none());
    let repo = &archive_report.repositories[0];
    assert!(!repo.unreachable);
    assert!(repo.error.is_none());
    // Backup-eligible keep = {10:00, 11:00, 12:00, 13:05}; 10:00 already
    // archived, 09:00 falls outside the keep set.
    assert_eq!(
        repo.created,
        vec![
            "backup.2022_05_05__11_00_00",
            "backup.2022_05_05__12_00_00",
            "backup.2022_05_05__13_05_00",
        ]
    );
    assert_eq!(repo.pruned, vec!["backup.2022_05_05__09_00_00"]);
    assert!(repo.compacted);
    assert_eq!(
        store.pool("repo1").instants(),
        vec![at(10, 0), at(11, 0), at(12, 0), at(13, 5)]
    );

    // Each created archive mounted and unmounted the snapshot exactly once.
    let recorded = runner.recorded();
    assert_eq!(recorded.iter().filter(|c| c.starts_with("mount ")).count(), 3);
    assert_eq!(recorded.iter().filter(|c| c.starts_with("umount ")).count(), 3);
    // The shared mount point is gone afterwards.
    assert!(!config.work_mount_point().exists());
}

#[tokio::test]
async fn test_second_run_is_idempotent() {
    let workspace = tempfile::tempdir().unwrap();
    let config = test_config(workspace.path(), vec![repository("repo1")]);
    let runner = Arc::new(RecordingRunner::default());
    let provider = Arc::new(FakeSnapshots::with_instants(&[
        at(9, 0),
        at(10, 0),
        at(11, 0),
        at(12, 0),
        at(12, 50),
    ]));
    let store = Arc::new(FakeStore::new());
    store.seed("repo1", &[at(9, 0), at(10, 0)]);

    let (pool, _) = snapshot_orchestrator(&provider, &runner, &config)
        .run(at(13, 5), false)
        .await
        .unwrap();
    archive_orchestrator(&store, &runner, &config).run(&pool).await;
    let settled_snapshots = provider.current();
    let settled_archives = store.pool("repo1");
    let calls_after_first = store.calls().len();

    // Two minutes later, in the same bucket: the candidate loses to the
    // older 13:05 snapshot and nothing may change.
    let (pool, report) = snapshot_orchestrator(&provider, &runner, &config)
        .run(at(13, 7), false)
        .await
        .unwrap();
    assert_eq!(report.created, None);
    assert_eq!(report.skipped, Some(SnapshotSkipReason::NotSelected));
    assert!(report.pruned.is_empty());
    assert_eq!(provider.current(), settled_snapshots);

    let archive_report = archive_orchestrator(&store, &runner, &config)
        .run(&pool)
        .await;
    let repo = &archive_report.repositories[0];
    assert!(repo.created.is_empty());
    assert!(repo.pruned.is_empty());
    assert!(!repo.compacted);
    assert_eq!(store.pool("repo1"), settled_archives);
    assert_eq!(store.calls().len(), calls_after_first);
}

#[tokio::test]
async fn test_stale_latest_snapshot_skips_archive_phase_entirely() {
    let workspace = tempfile::tempdir().unwrap();
    let config = test_config(workspace.path(), vec![repository("repo1")]);
    let runner = Arc::new(RecordingRunner::default());
    let store = Arc::new(FakeStore::new());
    store.seed("repo1", &[at(10, 0)]);

    // 12:00 and 12:50 share an hour bucket; the backup rule keeps the older
    // 12:00, leaving the latest snapshot unselected.
    let mut pool = Pool::new();
    pool.insert(at(12, 0), snapshot_naming().format(at(12, 0)));
    pool.insert(at(12, 50), snapshot_naming().format(at(12, 50)));

    let report = archive_orchestrator(&store, &runner, &config)
        .run(&pool)
        .await;

    assert!(matches!(
        report.skipped,
        Some(ArchiveSkipReason::LatestNotSelected { latest, .. }) if latest == at(12, 50)
    ));
    assert!(report.repositories.is_empty());
    assert!(store.calls().is_empty());
}

#[tokio::test]
async fn test_empty_eligible_keep_skips_archive_phase() {
    let workspace = tempfile::tempdir().unwrap();
    let mut config = test_config(workspace.path(), vec![repository("repo1")]);
    // No backup-eligible rules at all.
    config.rules[1].backup = false;
    let runner = Arc::new(RecordingRunner::default());
    let store = Arc::new(FakeStore::new());

    let mut pool = Pool::new();
    pool.insert(at(12, 0), snapshot_naming().format(at(12, 0)));

    let report = archive_orchestrator(&store, &runner, &config)
        .run(&pool)
        .await;

    assert_eq!(report.skipped, Some(ArchiveSkipReason::NothingSelected));
    assert!(store.calls().is_empty());
}

#[tokio::test]
async fn test_unreachable_repository_does_not_affect_the_others() {
    let workspace = tempfile::tempdir().unwrap();
    let config = test_config(
        workspace.path(),
        vec![repository("dead"), repository("alive")],
    );
    let runner = Arc::new(RecordingRunner::default());
    let mut store = FakeStore::new();
    store.unreachable.push("dead".to_string());
    let store = Arc::new(store);
    store.seed("alive", &[at(9, 0)]);

    let mut pool = Pool::new();
    for instant in [at(10, 0), at(11, 0), at(12, 0), at(13, 5)] {
        pool.insert(instant, snapshot_naming().format(instant));
    }

    let report = archive_orchestrator(&store, &runner, &config)
        .run(&pool)
        .await;

    assert!(report.repositories[0].unreachable);
    assert!(report.repositories[0].created.is_empty());
    assert!(store.calls_for("dead").is_empty());

    let alive = &report.repositories[1];
    assert!(!alive.unreachable);
    assert_eq!(alive.created.len(), 4);
    assert_eq!(alive.pruned, vec!["backup.2022_05_05__09_00_00"]);
    assert!(alive.compacted);

    // The reachable repository ends up exactly as it would without the dead
    // one configured.
    let workspace2 = tempfile::tempdir().unwrap();
    let config2 = test_config(workspace2.path(), vec![repository("alive")]);
    let store2 = Arc::new(FakeStore::new());
    store2.seed("alive", &[at(9, 0)]);
    let runner2 = Arc::new(RecordingRunner::default());
    archive_orchestrator(&store2, &runner2, &config2)
        .run(&pool)
        .await;
    assert_eq!(store.pool("alive"), store2.pool("alive"));
}

#[tokio::test]
async fn test_listing_parse_failure_is_fatal_for_that_repository_only() {
    let workspace = tempfile::tempdir().unwrap();
    let config = test_config(
        workspace.path(),
        vec![repository("tainted"), repository("clean")],
    );
    let runner = Arc::new(RecordingRunner::default());
    let mut store = FakeStore::new();
    store.unparseable.push("tainted".to_string());
    let store = Arc::new(store);

    let mut pool = Pool::new();
    pool.insert(at(13, 5), snapshot_naming().format(at(13, 5)));

    let report = archive_orchestrator(&store, &runner, &config)
        .run(&pool)
        .await;

    let tainted = &report.repositories[0];
    assert!(tainted.error.as_deref().unwrap().contains("legacy."));
    assert!(store.calls_for("tainted").is_empty());

    let clean = &report.repositories[1];
    assert!(clean.error.is_none());
    assert_eq!(clean.created, vec!["backup.2022_05_05__13_05_00"]);
}

#[tokio::test]
async fn test_snapshot_deletion_failure_aborts_the_phase() {
    let workspace = tempfile::tempdir().unwrap();
    let config = test_config(workspace.path(), vec![]);
    let runner = Arc::new(RecordingRunner::default());
    let mut provider = FakeSnapshots::with_instants(&[
        at(9, 0),
        at(10, 0),
        at(11, 0),
        at(12, 0),
        at(12, 50),
    ]);
    provider.fail_delete = true;
    let provider = Arc::new(provider);

    let result = snapshot_orchestrator(&provider, &runner, &config)
        .run(at(13, 5), false)
        .await;

    assert!(result.is_err());
    // The failed deletion left the pool untouched beyond the creation.
    assert!(provider.current().contains(&at(9, 0)));
}

#[tokio::test]
async fn test_post_hooks_run_after_a_failed_creation() {
    let workspace = tempfile::tempdir().unwrap();
    let mut config = test_config(workspace.path(), vec![]);
    config.snapshots.pre = vec![vec!["sync".to_string()]];
    config.snapshots.post = vec![vec!["echo".to_string(), "released".to_string()]];
    let runner = Arc::new(RecordingRunner::default());
    let mut provider = FakeSnapshots::with_instants(&[]);
    provider.fail_create = true;
    let provider = Arc::new(provider);

    let result = snapshot_orchestrator(&provider, &runner, &config)
        .run(at(13, 5), false)
        .await;

    assert!(result.is_err());
    assert_eq!(runner.recorded(), vec!["sync", "echo released"]);
}

#[tokio::test]
async fn test_skip_snapshot_only_lists_the_pool() {
    let workspace = tempfile::tempdir().unwrap();
    let config = test_config(workspace.path(), vec![]);
    let runner = Arc::new(RecordingRunner::default());
    let provider = Arc::new(FakeSnapshots::with_instants(&[at(9, 0), at(13, 5)]));

    let (pool, report) = snapshot_orchestrator(&provider, &runner, &config)
        .run(at(13, 7), true)
        .await
        .unwrap();

    assert_eq!(report.skipped, Some(SnapshotSkipReason::SkipRequested));
    assert!(report.pruned.is_empty());
    assert_eq!(pool.instants(), vec![at(9, 0), at(13, 5)]);
    assert_eq!(provider.current(), pool);
}

#[tokio::test]
async fn test_missing_source_path_under_mount_aborts_the_repository() {
    let workspace = tempfile::tempdir().unwrap();
    let mut config = test_config(workspace.path(), vec![repository("repo1")]);
    config.archive.paths = vec!["data".to_string()];
    let runner = Arc::new(RecordingRunner::default());
    let store = Arc::new(FakeStore::new());

    let mut pool = Pool::new();
    pool.insert(at(13, 5), snapshot_naming().format(at(13, 5)));

    let report = archive_orchestrator(&store, &runner, &config)
        .run(&pool)
        .await;

    let repo = &report.repositories[0];
    assert!(repo.error.as_deref().unwrap().contains("does not exist"));
    assert!(repo.created.is_empty());
    assert!(store.calls_for("repo1").is_empty());

    // Cleanup still ran: the snapshot was unmounted and the mount point
    // removed despite the verification failure.
    let recorded = runner.recorded();
    assert!(recorded.iter().any(|c| c.starts_with("umount ")));
    assert!(!config.work_mount_point().exists());
}
