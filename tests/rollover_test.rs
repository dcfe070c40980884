use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use s3_log_shipper::services::shutdown::{fire_lifecycle_shutdown, register_lifecycle_listener};
use s3_log_shipper::{
    ArchiveJob, CompressionMode, CustomTagStore, FixedIdentifier, RecordingStorage, RollingPolicy,
    RolloverCoordinator, RolloverError, ShipperConfig,
};
use tempfile::TempDir;

struct FakePolicy {
    active: PathBuf,
    elapsed: Option<PathBuf>,
    mode: CompressionMode,
    period_start: DateTime<Utc>,
    rollovers: Arc<AtomicUsize>,
    fail_rollover: bool,
    compression: Option<ArchiveJob>,
    cleanup: Option<ArchiveJob>,
}

impl FakePolicy {
    fn new(active: PathBuf, elapsed: Option<PathBuf>, mode: CompressionMode) -> Self {
        Self {
            active,
            elapsed,
            mode,
            period_start: Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap(),
            rollovers: Arc::new(AtomicUsize::new(0)),
            fail_rollover: false,
            compression: None,
            cleanup: None,
        }
    }
}

impl RollingPolicy for FakePolicy {
    fn active_file(&self) -> PathBuf {
        self.active.clone()
    }

    fn elapsed_file(&self) -> Option<PathBuf> {
        self.elapsed.clone()
    }

    fn compression_mode(&self) -> CompressionMode {
        self.mode
    }

    fn current_period_start(&self) -> DateTime<Utc> {
        self.period_start
    }

    fn rollover(&mut self) -> Result<(), RolloverError> {
        if self.fail_rollover {
            return Err(RolloverError::Failed("disk full".into()));
        }
        self.rollovers.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn take_compression_job(&mut self) -> Option<ArchiveJob> {
        self.compression.take()
    }

    fn take_cleanup_job(&mut self) -> Option<ArchiveJob> {
        self.cleanup.take()
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .try_init();
}

fn test_config() -> ShipperConfig {
    ShipperConfig {
        archive_wait: Duration::from_millis(500),
        drain_timeout: Duration::from_secs(10),
        ..ShipperConfig::default()
    }
}

fn coordinator(
    config: &ShipperConfig,
    policy: FakePolicy,
    storage: Arc<RecordingStorage>,
) -> RolloverCoordinator {
    init_tracing();
    RolloverCoordinator::with_parts(
        config,
        Box::new(policy),
        CustomTagStore::new(),
        storage,
        Arc::new(FixedIdentifier("i-abc123".into())),
    )
}

fn gzip_bytes(content: &[u8]) -> Vec<u8> {
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(content).unwrap();
    encoder.finish().unwrap()
}

#[tokio::test]
async fn test_deferred_upload_waits_for_compression() {
    let dir = TempDir::new().unwrap();
    let gz_path = dir.path().join("app.log.2024-03-14.gz");

    // The archive only exists once the compression job has run; skipping the
    // wait would make the upload find nothing to ship.
    let payload = gzip_bytes(b"rotated content");
    let target = gz_path.clone();
    let compression: ArchiveJob = Box::pin(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        tokio::fs::write(&target, &payload).await.unwrap();
    });

    let mut policy = FakePolicy::new(
        dir.path().join("missing-active.log"),
        Some(dir.path().join("app.log.2024-03-14")),
        CompressionMode::Gz,
    );
    policy.compression = Some(compression);
    let rollovers = policy.rollovers.clone();

    let storage = RecordingStorage::new();
    let coordinator = coordinator(&test_config(), policy, storage.clone());

    coordinator.on_rollover().unwrap();
    coordinator.shutdown().await;

    assert_eq!(rollovers.load(Ordering::SeqCst), 1);
    assert_eq!(storage.keys(), vec!["app.log.2024-03-14.gz"]);
    assert!(storage.uploads()[0].body.starts_with(&[0x1f, 0x8b]));
}

#[tokio::test]
async fn test_rotation_without_elapsed_file_ships_active_file() {
    let dir = TempDir::new().unwrap();
    let active = dir.path().join("app.log");
    std::fs::write(&active, "still being written").unwrap();

    let policy = FakePolicy::new(active, None, CompressionMode::None);
    let rollovers = policy.rollovers.clone();

    let storage = RecordingStorage::new();
    let coordinator = coordinator(&test_config(), policy, storage.clone());

    coordinator.on_rollover().unwrap();
    coordinator.shutdown().await;

    // The timestamp prefix is forced on even though the config leaves it
    // off; the shutdown itself ships the active file once more.
    assert_eq!(
        storage.keys(),
        vec!["20240315120000_app.log", "20240315120000_app.log"]
    );
    assert_eq!(rollovers.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_rollover_failure_passes_through_and_ships_nothing() {
    let dir = TempDir::new().unwrap();

    let mut policy = FakePolicy::new(
        dir.path().join("missing-active.log"),
        Some(dir.path().join("app.log.2024-03-14")),
        CompressionMode::None,
    );
    policy.fail_rollover = true;
    let rollovers = policy.rollovers.clone();

    let storage = RecordingStorage::new();
    let coordinator = coordinator(&test_config(), policy, storage.clone());

    let err = coordinator.on_rollover().unwrap_err();
    assert!(matches!(err, RolloverError::Failed(_)));

    coordinator.shutdown().await;
    assert!(storage.uploads().is_empty());
    assert_eq!(rollovers.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_shutdown_without_final_rollover_ships_active_with_timestamp() {
    let dir = TempDir::new().unwrap();
    let active = dir.path().join("app.log");
    std::fs::write(&active, "active content").unwrap();

    let policy = FakePolicy::new(
        active,
        Some(dir.path().join("app.log.2024-03-14")),
        CompressionMode::None,
    );
    let rollovers = policy.rollovers.clone();

    let storage = RecordingStorage::new();
    let coordinator = coordinator(&test_config(), policy, storage.clone());

    coordinator.shutdown().await;

    assert_eq!(storage.keys(), vec!["20240315120000_app.log"]);
    assert_eq!(rollovers.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_shutdown_with_final_rollover_rolls_exactly_once() {
    let dir = TempDir::new().unwrap();
    let elapsed = dir.path().join("app.log.1");
    std::fs::write(&elapsed, "rolled content").unwrap();

    let policy = FakePolicy::new(
        dir.path().join("missing-active.log"),
        Some(elapsed),
        CompressionMode::None,
    );
    let rollovers = policy.rollovers.clone();

    let storage = RecordingStorage::new();
    let config = ShipperConfig {
        rollover_on_exit: true,
        ..test_config()
    };
    let coordinator = coordinator(&config, policy, storage.clone());

    coordinator.shutdown().await;
    assert_eq!(rollovers.load(Ordering::SeqCst), 1);
    assert_eq!(storage.keys(), vec!["app.log.1"]);

    // A second invocation is a no-op.
    coordinator.shutdown().await;
    assert_eq!(rollovers.load(Ordering::SeqCst), 1);
    assert_eq!(storage.uploads().len(), 1);
}

#[tokio::test]
async fn test_archive_wait_timeout_continues_best_effort() {
    let dir = TempDir::new().unwrap();
    let gz_path = dir.path().join("app.log.2024-03-14.gz");
    std::fs::write(&gz_path, gzip_bytes(b"already archived")).unwrap();

    // A compression job that never finishes within the wait ceiling.
    let compression: ArchiveJob = Box::pin(async {
        tokio::time::sleep(Duration::from_secs(60)).await;
    });

    let mut policy = FakePolicy::new(
        dir.path().join("missing-active.log"),
        Some(dir.path().join("app.log.2024-03-14")),
        CompressionMode::Gz,
    );
    policy.compression = Some(compression);

    let storage = RecordingStorage::new();
    let config = ShipperConfig {
        archive_wait: Duration::from_millis(100),
        ..test_config()
    };
    let coordinator = coordinator(&config, policy, storage.clone());

    let started = tokio::time::Instant::now();
    coordinator.on_rollover().unwrap();
    coordinator.shutdown().await;

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(storage.keys(), vec!["app.log.2024-03-14.gz"]);
}

#[tokio::test]
async fn test_lifecycle_event_drains_the_queue() {
    let dir = TempDir::new().unwrap();
    let active = dir.path().join("app.log");
    std::fs::write(&active, "active content").unwrap();

    let policy = FakePolicy::new(active, None, CompressionMode::None);

    let storage = RecordingStorage::new();
    let coordinator = coordinator(&test_config(), policy, storage.clone());
    register_lifecycle_listener(coordinator.as_listener());

    fire_lifecycle_shutdown().await;

    assert_eq!(storage.keys(), vec!["20240315120000_app.log"]);
}
