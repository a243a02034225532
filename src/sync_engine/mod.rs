//! SyncEngine - Background Upload of Pending Images
//!
//! ## Responsibilities
//!
//! - Periodic connectivity check
//! - Drain pending images in small batches, oldest first
//! - Stop a batch on the first upload failure (retried next cycle)
//! - Upload counters for the status surface
//!
//! ## Design
//!
//! Uploaded images are only recorded in the ledger, never removed from the
//! queue. Eviction is the only way an image leaves local storage.

use crate::error::{Error, Result};
use crate::local_queue::LocalQueue;
use crate::uploader::{ConnectivityProbe, Uploader};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;

/// Max uploads per drain
pub const BATCH_SIZE: usize = 5;

/// Default cycle interval
const DEFAULT_INTERVAL_SEC: u64 = 10;

/// Default wait after a failed cycle
const DEFAULT_BACKOFF_SEC: u64 = 30;

/// Bounded wait for the loop to exit on stop
const DEFAULT_STOP_TIMEOUT_SEC: u64 = 5;

/// Upload counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncCounters {
    pub pending_uploads: usize,
    pub successful_uploads: u64,
    pub failed_uploads: u64,
    pub online: bool,
    pub last_checked_at: Option<DateTime<Utc>>,
}

/// Result of one drain
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub attempted: usize,
    pub uploaded: usize,
    pub failed: usize,
    /// True when a failure stopped the batch early
    pub aborted: bool,
}

/// Outcome of one cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Offline,
    Drained(DrainReport),
}

struct CycleTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// SyncEngine instance
pub struct SyncEngine {
    queue: Arc<LocalQueue>,
    uploader: Arc<dyn Uploader>,
    probe: Arc<dyn ConnectivityProbe>,
    counters: RwLock<SyncCounters>,
    /// Serializes drains (background cycle vs force upload)
    drain_lock: Mutex<()>,
    interval: Duration,
    backoff: Duration,
    stop_timeout: Duration,
    task: Mutex<Option<CycleTask>>,
}

impl SyncEngine {
    /// Create new SyncEngine
    pub fn new(
        queue: Arc<LocalQueue>,
        uploader: Arc<dyn Uploader>,
        probe: Arc<dyn ConnectivityProbe>,
    ) -> Self {
        Self {
            queue,
            uploader,
            probe,
            counters: RwLock::new(SyncCounters::default()),
            drain_lock: Mutex::new(()),
            interval: Duration::from_secs(DEFAULT_INTERVAL_SEC),
            backoff: Duration::from_secs(DEFAULT_BACKOFF_SEC),
            stop_timeout: Duration::from_secs(DEFAULT_STOP_TIMEOUT_SEC),
            task: Mutex::new(None),
        }
    }

    pub fn with_interval(mut self, interval: Duration, backoff: Duration) -> Self {
        self.interval = interval;
        self.backoff = backoff;
        self
    }

    /// Override how long `stop` waits for an in-flight cycle
    pub fn with_stop_timeout(mut self, stop_timeout: Duration) -> Self {
        self.stop_timeout = stop_timeout;
        self
    }

    /// Snapshot of the counters
    pub async fn counters(&self) -> SyncCounters {
        self.counters.read().await.clone()
    }

    /// One cycle: probe, then drain one batch when online
    pub async fn run_cycle(&self) -> Result<CycleOutcome> {
        let online = self.probe.is_online().await;

        {
            let mut counters = self.counters.write().await;
            counters.online = online;
            counters.last_checked_at = Some(Utc::now());
        }

        if !online {
            tracing::debug!("Offline, skipping upload cycle");
            return Ok(CycleOutcome::Offline);
        }

        let report = self.drain_batch().await?;
        Ok(CycleOutcome::Drained(report))
    }

    /// Probe, then drain one batch now. Offline is an error.
    pub async fn force_drain(&self) -> Result<DrainReport> {
        match self.run_cycle().await? {
            CycleOutcome::Offline => Err(Error::Network("No internet connection".to_string())),
            CycleOutcome::Drained(report) => Ok(report),
        }
    }

    /// Upload up to BATCH_SIZE pending images, oldest first.
    ///
    /// The first failure stops the batch. Errors are returned only for local
    /// failures (ledger persistence), never for upload failures.
    pub async fn drain_batch(&self) -> Result<DrainReport> {
        let _drain = self.drain_lock.lock().await;

        let mut pending = self.queue.pending_uploads().await;
        // pending_uploads is newest-first
        pending.reverse();

        let mut report = DrainReport::default();

        for entry in pending.into_iter().take(BATCH_SIZE) {
            report.attempted += 1;

            match self.uploader.upload(&entry.filepath).await {
                Ok(location) => {
                    // Counted even if persisting the ledger fails
                    let marked = self.queue.mark_uploaded(&entry.filename).await;
                    self.counters.write().await.successful_uploads += 1;
                    report.uploaded += 1;
                    tracing::info!(
                        filename = %entry.filename,
                        location = %location,
                        "Successfully uploaded"
                    );
                    marked?;
                }
                Err(e) => {
                    self.counters.write().await.failed_uploads += 1;
                    report.failed += 1;
                    report.aborted = true;
                    tracing::warn!(
                        filename = %entry.filename,
                        error = %e,
                        "Upload failed, stopping batch"
                    );
                    break;
                }
            }
        }

        let pending_now = self.queue.pending_uploads().await.len();
        self.counters.write().await.pending_uploads = pending_now;

        if report.attempted > 0 {
            tracing::info!(
                attempted = report.attempted,
                uploaded = report.uploaded,
                failed = report.failed,
                pending = pending_now,
                "Upload batch finished"
            );
        }

        Ok(report)
    }

    /// Start the background cycle
    pub async fn start(self: &Arc<Self>) {
        let mut task = self.task.lock().await;
        if let Some(existing) = task.as_ref() {
            if !existing.handle.is_finished() {
                tracing::warn!("Sync engine already running");
                return;
            }
        }

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let engine = self.clone();

        let handle = tokio::spawn(async move {
            loop {
                let wait = match engine.run_cycle().await {
                    Ok(_) => engine.interval,
                    Err(e) => {
                        tracing::error!(
                            error = %e,
                            backoff_sec = engine.backoff.as_secs(),
                            "Upload cycle error"
                        );
                        engine.backoff
                    }
                };

                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(wait) => {}
                }
            }
            tracing::debug!("Sync loop exited");
        });

        *task = Some(CycleTask {
            shutdown: shutdown_tx,
            handle,
        });

        tracing::info!(
            interval_sec = self.interval.as_secs(),
            batch_size = BATCH_SIZE,
            "Sync engine started"
        );
    }

    /// Stop the background cycle, waiting a bounded time for an in-flight cycle
    pub async fn stop(&self) {
        let Some(task) = self.task.lock().await.take() else {
            return;
        };

        let _ = task.shutdown.send(true);
        let mut handle = task.handle;

        match tokio::time::timeout(self.stop_timeout, &mut handle).await {
            Ok(Ok(())) => tracing::info!("Sync engine stopped"),
            Ok(Err(e)) => tracing::warn!(error = %e, "Sync loop ended abnormally"),
            Err(_) => {
                tracing::warn!(
                    timeout_sec = self.stop_timeout.as_secs(),
                    "Sync loop did not stop in time, aborting"
                );
                handle.abort();
            }
        }
    }

    pub async fn is_running(&self) -> bool {
        self.task
            .lock()
            .await
            .as_ref()
            .map(|t| !t.handle.is_finished())
            .unwrap_or(false)
    }
}
