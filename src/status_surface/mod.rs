//! StatusSurface - Read and control surface over the running services
//!
//! Backs the HTTP API. Every read is a snapshot; no call here blocks on a
//! capture or an upload except the explicit force/capture operations.

use crate::capture_dispatcher::{CaptureDispatcher, CaptureStats};
use crate::edge_detector::{EdgeDetector, MonitoringStatus};
use crate::error::{Error, Result};
use crate::local_queue::{LocalQueue, QueueEntry, QueueStats};
use crate::sync_engine::{DrainReport, SyncCounters, SyncEngine};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

/// Upload state of an image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadState {
    Uploaded,
    Pending,
}

/// Queue entry with its upload state
#[derive(Debug, Clone, Serialize)]
pub struct ImageInfo {
    #[serde(flatten)]
    pub entry: QueueEntry,
    pub status: UploadState,
}

/// Full system status
#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    pub uptime_sec: u64,
    pub storage: QueueStats,
    pub local_images: usize,
    pub queued_uploads: usize,
    /// Ledger size (includes images already evicted)
    pub uploaded_images: usize,
    pub sync: SyncCounters,
    pub captures: CaptureStats,
    pub monitoring: MonitoringStatus,
}

/// Result of a manual rescan
#[derive(Debug, Clone, Serialize)]
pub struct RescanResult {
    pub images_found: usize,
    pub pending_uploads: usize,
}

/// StatusSurface instance
pub struct StatusSurface {
    queue: Arc<LocalQueue>,
    dispatcher: Arc<CaptureDispatcher>,
    detector: Arc<EdgeDetector>,
    sync: Arc<SyncEngine>,
    started_at: Instant,
}

impl StatusSurface {
    pub fn new(
        queue: Arc<LocalQueue>,
        dispatcher: Arc<CaptureDispatcher>,
        detector: Arc<EdgeDetector>,
        sync: Arc<SyncEngine>,
    ) -> Self {
        Self {
            queue,
            dispatcher,
            detector,
            sync,
            started_at: Instant::now(),
        }
    }

    pub fn uptime_sec(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub async fn status(&self) -> SystemStatus {
        let storage = self.queue.stats().await;
        let queued_uploads = self.queue.pending_uploads().await.len();
        let mut sync = self.sync.counters().await;
        sync.pending_uploads = queued_uploads;

        SystemStatus {
            uptime_sec: self.uptime_sec(),
            local_images: storage.count,
            storage,
            queued_uploads,
            uploaded_images: self.queue.uploaded_count().await,
            sync,
            captures: self.dispatcher.stats(),
            monitoring: self.detector.status().await,
        }
    }

    /// Last known connectivity
    pub async fn online(&self) -> bool {
        self.sync.counters().await.online
    }

    pub fn gpio_available(&self) -> bool {
        self.detector.is_available()
    }

    /// All queued images, newest first, with upload state
    pub async fn images(&self) -> Vec<ImageInfo> {
        let entries = self.queue.entries().await;
        let mut images = Vec::with_capacity(entries.len());
        for entry in entries {
            let status = if self.queue.is_uploaded(&entry.filename).await {
                UploadState::Uploaded
            } else {
                UploadState::Pending
            };
            images.push(ImageInfo { entry, status });
        }
        images
    }

    /// Look up one queued image
    pub async fn image(&self, filename: &str) -> Result<QueueEntry> {
        self.queue
            .entries()
            .await
            .into_iter()
            .find(|e| e.filename == filename)
            .ok_or_else(|| Error::NotFound(format!("Image {}", filename)))
    }

    pub async fn upload_queue(&self) -> Vec<QueueEntry> {
        self.queue.pending_uploads().await
    }

    pub async fn force_upload(&self) -> Result<DrainReport> {
        tracing::info!("Force upload requested");
        self.sync.force_drain().await
    }

    pub async fn rescan(&self) -> Result<RescanResult> {
        let images_found = self.queue.rescan().await?;
        let pending_uploads = self.queue.pending_uploads().await.len();
        Ok(RescanResult {
            images_found,
            pending_uploads,
        })
    }

    pub async fn monitoring(&self) -> MonitoringStatus {
        self.detector.status().await
    }

    /// Enable or disable trigger dispatch for a channel.
    ///
    /// Unavailable hardware is not an error; the returned status reports it.
    pub async fn toggle_monitoring(&self, channel_id: &str, enabled: bool) -> Result<MonitoringStatus> {
        self.detector.set_channel_enabled(channel_id, enabled).await?;
        Ok(self.detector.status().await)
    }

    /// Manual capture on a channel
    pub async fn capture_now(&self, channel_id: &str) -> Result<QueueEntry> {
        tracing::info!(channel_id = %channel_id, "Manual capture requested");
        self.dispatcher.capture(channel_id).await
    }
}
