use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::services::keys::ObjectKeyFormatter;
use crate::services::storage::ObjectStorage;

/// One rotated (or still-active) file to ship. Consumed exactly once.
#[derive(Debug, Clone)]
pub struct UploadJob {
    pub source: PathBuf,
    pub event_time: DateTime<Utc>,
    pub force_timestamp_prefix: bool,
}

enum WorkerTask {
    Direct(UploadJob),
    /// Preparation future built by the coordinator. Awaited in queue
    /// position, so archive waits block the worker, never the rotation
    /// caller, and direct jobs cannot overtake.
    Deferred(BoxFuture<'static, UploadJob>),
}

/// Single-concurrency upload queue. Jobs run strictly in submission order on
/// one background task; [`UploadWorker::drain`] flushes the queue with a
/// deadline instead of killing it.
pub struct UploadWorker {
    tx: Mutex<Option<mpsc::UnboundedSender<WorkerTask>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl UploadWorker {
    /// Must be called from within a tokio runtime.
    pub fn spawn(storage: Arc<dyn ObjectStorage>, formatter: ObjectKeyFormatter) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Self::run(rx, storage, formatter, cancel.clone()));

        Self {
            tx: Mutex::new(Some(tx)),
            handle: Mutex::new(Some(handle)),
            cancel,
        }
    }

    /// Queues a job without blocking. Jobs submitted after `drain` started
    /// are dropped with a warning.
    pub fn submit(&self, job: UploadJob) {
        self.send(WorkerTask::Direct(job));
    }

    /// Queues a preparation future whose resulting job uploads in this
    /// queue position.
    pub fn submit_deferred(&self, prepare: BoxFuture<'static, UploadJob>) {
        self.send(WorkerTask::Deferred(prepare));
    }

    fn send(&self, task: WorkerTask) {
        let guard = self.tx.lock().unwrap();
        match guard.as_ref() {
            Some(tx) => {
                if tx.send(task).is_err() {
                    tracing::warn!("Upload worker is gone, dropping job");
                }
            }
            None => tracing::warn!("Upload worker is draining, dropping job"),
        }
    }

    /// Stops accepting new work and waits up to `timeout` for queued and
    /// in-flight jobs to finish. On timeout the remaining work is cancelled.
    /// Best-effort flush, not a transactional guarantee.
    pub async fn drain(&self, timeout: Duration) {
        drop(self.tx.lock().unwrap().take());

        let handle = self.handle.lock().unwrap().take();
        let Some(mut handle) = handle else {
            return;
        };

        tokio::select! {
            _ = &mut handle => {}
            _ = tokio::time::sleep(timeout) => {
                tracing::warn!(
                    "Upload queue still busy after {:?}, cancelling remaining jobs",
                    timeout
                );
                self.cancel.cancel();
                let _ = handle.await;
            }
        }
    }

    async fn run(
        mut rx: mpsc::UnboundedReceiver<WorkerTask>,
        storage: Arc<dyn ObjectStorage>,
        formatter: ObjectKeyFormatter,
        cancel: CancellationToken,
    ) {
        tracing::info!("🚀 Upload worker started");

        loop {
            let task = tokio::select! {
                biased;

                _ = cancel.cancelled() => break,
                task = rx.recv() => match task {
                    Some(task) => task,
                    None => break,
                },
            };

            let job = match task {
                WorkerTask::Direct(job) => job,
                WorkerTask::Deferred(prepare) => {
                    tokio::select! {
                        biased;

                        _ = cancel.cancelled() => break,
                        job = prepare => job,
                    }
                }
            };

            if let Err(e) = Self::execute(&storage, &formatter, &job, &cancel).await {
                tracing::error!("Failed to upload {}: {:#}", job.source.display(), e);
            }
        }

        // Make the loss visible when we were cancelled with work still queued.
        rx.close();
        let mut dropped = 0usize;
        while rx.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            tracing::warn!("🛑 Upload worker stopped, {} queued job(s) dropped", dropped);
        } else {
            tracing::info!("✅ Upload worker stopped");
        }
    }

    async fn execute(
        storage: &Arc<dyn ObjectStorage>,
        formatter: &ObjectKeyFormatter,
        job: &UploadJob,
        cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        // Rotation may have renamed or removed the file since the job was
        // queued; that is not an error.
        match tokio::fs::metadata(&job.source).await {
            Ok(meta) if meta.len() > 0 => {}
            Ok(_) => {
                tracing::debug!("Skipping empty file {}", job.source.display());
                return Ok(());
            }
            Err(_) => {
                tracing::debug!("Skipping missing file {}", job.source.display());
                return Ok(());
            }
        }

        let key = formatter
            .format(&job.source, job.event_time, job.force_timestamp_prefix)
            .await;

        tracing::info!("📤 Uploading {} as {}", job.source.display(), key);

        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                tracing::warn!("Upload of {} cancelled", key);
                Ok(())
            }
            result = storage.put_file(&key, &job.source) => result,
        }
    }
}
