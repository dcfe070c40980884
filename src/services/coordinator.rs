use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;

use crate::config::ShipperConfig;
use crate::error::RolloverError;
use crate::services::identity::{IdentifierProvider, InstanceIdentifier};
use crate::services::keys::{CustomTagStore, ObjectKeyFormatter};
use crate::services::shutdown::{self, ShutdownListener};
use crate::services::storage::{ObjectStorage, S3Storage};
use crate::services::uploader::{UploadJob, UploadWorker};

/// How the rotation host archives a file that finished its period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMode {
    None,
    Gz,
    Zip,
}

impl CompressionMode {
    /// Suffix the archived file carries on disk.
    pub fn suffix(self) -> &'static str {
        match self {
            CompressionMode::None => "",
            CompressionMode::Gz => ".gz",
            CompressionMode::Zip => ".zip",
        }
    }
}

/// Background archival work the host may still be running after a rotation.
pub type ArchiveJob = BoxFuture<'static, ()>;

/// Narrow interface to the rotation host. The host keeps rotating files the
/// way it always did; the coordinator only observes it and ships the results.
pub trait RollingPolicy: Send {
    /// File currently being written.
    fn active_file(&self) -> PathBuf;

    /// File that just finished its period, without any compression suffix.
    /// `None` when the host cannot name one (e.g. fixed-window rotation that
    /// bakes the index into the archive name reports that name here instead,
    /// or returns `None` to ship the active file).
    fn elapsed_file(&self) -> Option<PathBuf>;

    fn compression_mode(&self) -> CompressionMode;

    /// The host's own notion of where the current period started.
    fn current_period_start(&self) -> DateTime<Utc>;

    /// On-disk path whose modification time tracks the last write, when the
    /// host knows it. Preferred over `current_period_start` for timestamps.
    fn raw_file(&self) -> Option<PathBuf> {
        None
    }

    /// Performs the underlying rotation.
    fn rollover(&mut self) -> Result<(), RolloverError>;

    /// Outstanding compression work, handed over at most once per rotation.
    fn take_compression_job(&mut self) -> Option<ArchiveJob> {
        None
    }

    /// Outstanding cleanup/retention work, handed over at most once per
    /// rotation.
    fn take_cleanup_job(&mut self) -> Option<ArchiveJob> {
        None
    }
}

/// Drives S3 shipping for one rotation host.
///
/// Every rotation event either defers the archived file behind the host's
/// compression/cleanup work or ships the active file directly; the shutdown
/// handler runs an optional final rollover and drains the upload queue before
/// the process may exit. Cheap to clone; clones share one state.
#[derive(Clone)]
pub struct RolloverCoordinator {
    inner: Arc<CoordinatorInner>,
}

struct CoordinatorInner {
    policy: Arc<Mutex<Box<dyn RollingPolicy>>>,
    last_period: Arc<Mutex<DateTime<Utc>>>,
    worker: UploadWorker,
    rollover_on_exit: bool,
    archive_wait: Duration,
    drain_timeout: Duration,
    shutting_down: AtomicBool,
}

impl RolloverCoordinator {
    /// Wires the coordinator to S3 per `config` and registers it for the
    /// configured shutdown mode. Must be called from within a tokio runtime.
    pub fn start(
        config: &ShipperConfig,
        policy: Box<dyn RollingPolicy>,
        custom_tag: CustomTagStore,
    ) -> Self {
        let storage: Arc<dyn ObjectStorage> = Arc::new(S3Storage::new(config));
        let identity: Arc<dyn IdentifierProvider> = Arc::new(InstanceIdentifier);
        let coordinator = Self::with_parts(config, policy, custom_tag, storage, identity);
        shutdown::register(coordinator.as_listener(), config.shutdown_mode);
        coordinator
    }

    /// Same wiring with the storage and identity seams supplied by the
    /// caller.
    pub fn with_parts(
        config: &ShipperConfig,
        policy: Box<dyn RollingPolicy>,
        custom_tag: CustomTagStore,
        storage: Arc<dyn ObjectStorage>,
        identity: Arc<dyn IdentifierProvider>,
    ) -> Self {
        let formatter = ObjectKeyFormatter::new(config, custom_tag, identity);
        let worker = UploadWorker::spawn(storage, formatter);
        let last_period = effective_last_period(policy.as_ref());

        Self {
            inner: Arc::new(CoordinatorInner {
                policy: Arc::new(Mutex::new(policy)),
                last_period: Arc::new(Mutex::new(last_period)),
                worker,
                rollover_on_exit: config.rollover_on_exit,
                archive_wait: config.archive_wait,
                drain_timeout: config.drain_timeout,
                shutting_down: AtomicBool::new(false),
            }),
        }
    }

    /// Handle for shutdown registration. Stable across clones, so the
    /// process-wide registry can deduplicate by identity.
    pub fn as_listener(&self) -> Arc<dyn ShutdownListener> {
        self.inner.clone()
    }

    /// Entry point for the host's rotation callback. A failure of the
    /// underlying rotation is passed through unmodified; everything the
    /// coordinator adds degrades to a logged, skipped upload instead.
    pub fn on_rollover(&self) -> Result<(), RolloverError> {
        if self.inner.shutting_down.load(Ordering::SeqCst) {
            tracing::warn!("Rotation event after shutdown started, ignoring");
            return Ok(());
        }
        self.inner.rollover_and_queue()
    }

    /// Runs the shutdown sequence explicitly: optional final rollover, drain
    /// the queue, release the storage client. For hosts wired with
    /// [`crate::services::shutdown::ShutdownMode::None`].
    pub async fn shutdown(&self) {
        self.inner.do_shutdown().await;
    }
}

impl CoordinatorInner {
    fn rollover_and_queue(&self) -> Result<(), RolloverError> {
        let mut policy = self.policy.lock().unwrap();

        let Some(elapsed) = policy.elapsed_file() else {
            // No distinguishable elapsed file: ship the active file as-is,
            // with the timestamp forced on so successive keys stay distinct.
            // The underlying rotation is not invoked on this path.
            let job = UploadJob {
                source: policy.active_file(),
                event_time: *self.last_period.lock().unwrap(),
                force_timestamp_prefix: true,
            };
            self.worker.submit(job);
            return Ok(());
        };

        let mut source = elapsed.into_os_string();
        source.push(policy.compression_mode().suffix());
        let source = PathBuf::from(source);

        policy.rollover()?;

        // Compression and cleanup may still be renaming or writing the very
        // file we are about to ship; the waits run on the worker, in queue
        // position, so the rotation caller never blocks on them.
        let compression = policy.take_compression_job();
        let cleanup = policy.take_cleanup_job();
        let event_time = *self.last_period.lock().unwrap();
        let policy_handle = Arc::clone(&self.policy);
        let last_period = Arc::clone(&self.last_period);
        let archive_wait = self.archive_wait;

        self.worker.submit_deferred(Box::pin(async move {
            wait_for_archive_job("compression", compression, archive_wait).await;
            refresh_last_period(&policy_handle, &last_period);
            wait_for_archive_job("clean-up", cleanup, archive_wait).await;
            refresh_last_period(&policy_handle, &last_period);

            UploadJob {
                source,
                event_time,
                force_timestamp_prefix: false,
            }
        }));

        Ok(())
    }

    async fn do_shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            tracing::warn!("Shutdown handler invoked twice, ignoring");
            return;
        }

        tracing::info!("🛑 Shutting down log shipping");

        if self.rollover_on_exit {
            if let Err(e) = self.rollover_and_queue() {
                tracing::error!("Final rollover failed: {}", e);
            }
        } else {
            let job = {
                let policy = self.policy.lock().unwrap();
                UploadJob {
                    source: policy.active_file(),
                    event_time: *self.last_period.lock().unwrap(),
                    force_timestamp_prefix: true,
                }
            };
            self.worker.submit(job);
        }

        self.worker.drain(self.drain_timeout).await;
        tracing::info!("✅ Upload queue drained, storage client released");
    }
}

#[async_trait::async_trait]
impl ShutdownListener for CoordinatorInner {
    async fn on_shutdown(&self) {
        self.do_shutdown().await;
    }
}

async fn wait_for_archive_job(kind: &str, job: Option<ArchiveJob>, wait: Duration) {
    let Some(job) = job else { return };
    if tokio::time::timeout(wait, job).await.is_err() {
        tracing::error!("Timeout while waiting for the {} job to finish", kind);
    }
}

/// Refreshed after every archive wait, even when the wait timed out or there
/// was nothing to wait for; later events and the shutdown upload read it.
fn refresh_last_period(
    policy: &Mutex<Box<dyn RollingPolicy>>,
    last_period: &Mutex<DateTime<Utc>>,
) {
    let refreshed = effective_last_period(policy.lock().unwrap().as_ref());
    *last_period.lock().unwrap() = refreshed;
}

/// The raw file's modification time when the host names a readable raw path,
/// otherwise the host's current period start.
fn effective_last_period(policy: &dyn RollingPolicy) -> DateTime<Utc> {
    if let Some(raw) = policy.raw_file() {
        if let Ok(meta) = std::fs::metadata(&raw) {
            if let Ok(modified) = meta.modified() {
                return DateTime::<Utc>::from(modified);
            }
        }
    }
    policy.current_period_start()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    struct StubPolicy {
        raw: Option<PathBuf>,
        period_start: DateTime<Utc>,
    }

    impl RollingPolicy for StubPolicy {
        fn active_file(&self) -> PathBuf {
            PathBuf::from("app.log")
        }

        fn elapsed_file(&self) -> Option<PathBuf> {
            None
        }

        fn compression_mode(&self) -> CompressionMode {
            CompressionMode::None
        }

        fn current_period_start(&self) -> DateTime<Utc> {
            self.period_start
        }

        fn raw_file(&self) -> Option<PathBuf> {
            self.raw.clone()
        }

        fn rollover(&mut self) -> Result<(), RolloverError> {
            Ok(())
        }
    }

    #[test]
    fn test_compression_suffixes() {
        assert_eq!(CompressionMode::None.suffix(), "");
        assert_eq!(CompressionMode::Gz.suffix(), ".gz");
        assert_eq!(CompressionMode::Zip.suffix(), ".zip");
    }

    #[test]
    fn test_last_period_prefers_readable_raw_file() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("app.log");
        std::fs::write(&raw, "x").unwrap();

        let period_start = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let policy = StubPolicy {
            raw: Some(raw),
            period_start,
        };

        let got = effective_last_period(&policy);
        assert!(got > period_start);
        assert!(Utc::now() - got < chrono::Duration::minutes(5));
    }

    #[test]
    fn test_last_period_falls_back_to_period_start() {
        let period_start = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();

        let unreadable = StubPolicy {
            raw: Some(PathBuf::from("/nonexistent/app.log")),
            period_start,
        };
        assert_eq!(effective_last_period(&unreadable), period_start);

        let unnamed = StubPolicy {
            raw: None,
            period_start,
        };
        assert_eq!(effective_last_period(&unnamed), period_start);
    }
}
