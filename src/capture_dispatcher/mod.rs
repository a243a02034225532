//! CaptureDispatcher - Per-channel serialized capture
//!
//! ## Responsibilities
//!
//! - Single entry point for edge, command and manual triggers
//! - One in-flight capture per channel (channels run concurrently)
//! - Hand successful artifacts to the LocalQueue before returning

use crate::error::{Error, Result};
use crate::local_queue::{LocalQueue, QueueEntry};
use crate::models::{TriggerEvent, TriggerHandler, TriggerSource};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::timeout;

/// Default wait for a busy channel (30s)
const DEFAULT_WAIT_TIMEOUT_MS: u64 = 30_000;

/// Image acquisition collaborator.
///
/// Must be safe to call concurrently for distinct channels.
#[async_trait]
pub trait CaptureBackend: Send + Sync {
    /// Capture one image and return the path of the written file
    async fn capture(&self, channel_id: &str) -> Result<PathBuf>;
}

/// Capture counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct CaptureStats {
    pub total_captures: u64,
    pub failed_captures: u64,
}

/// CaptureDispatcher instance
pub struct CaptureDispatcher {
    backend: Arc<dyn CaptureBackend>,
    queue: Arc<LocalQueue>,
    channels: Vec<String>,
    /// Per-channel locks
    locks: RwLock<HashMap<String, Arc<Mutex<()>>>>,
    wait_timeout: Duration,
    total_captures: AtomicU64,
    failed_captures: AtomicU64,
}

impl CaptureDispatcher {
    /// Create new CaptureDispatcher
    pub fn new(
        backend: Arc<dyn CaptureBackend>,
        queue: Arc<LocalQueue>,
        channels: Vec<String>,
    ) -> Self {
        Self {
            backend,
            queue,
            channels,
            locks: RwLock::new(HashMap::new()),
            wait_timeout: Duration::from_millis(DEFAULT_WAIT_TIMEOUT_MS),
            total_captures: AtomicU64::new(0),
            failed_captures: AtomicU64::new(0),
        }
    }

    /// Override how long a capture waits for a busy channel
    pub fn with_wait_timeout(mut self, wait_timeout: Duration) -> Self {
        self.wait_timeout = wait_timeout;
        self
    }

    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    pub fn has_channel(&self, channel_id: &str) -> bool {
        self.channels.iter().any(|c| c == channel_id)
    }

    /// Manual capture on a channel, queueing the result
    pub async fn capture(&self, channel_id: &str) -> Result<QueueEntry> {
        self.capture_event(&TriggerEvent::new(channel_id, TriggerSource::Manual))
            .await
    }

    /// Capture for a trigger event and queue the result
    pub async fn capture_event(&self, event: &TriggerEvent) -> Result<QueueEntry> {
        let channel_id = event.channel_id.as_str();
        if !self.has_channel(channel_id) {
            return Err(Error::Validation(format!("Invalid camera ID: {}", channel_id)));
        }

        let result = async {
            let _lease = self.acquire(channel_id).await?;
            let path = self.backend.capture(channel_id).await?;
            self.queue.insert(&path).await
            // _lease dropped here, channel released
        }
        .await;

        match &result {
            Ok(entry) => {
                self.total_captures.fetch_add(1, Ordering::Relaxed);
                tracing::info!(
                    channel_id = %channel_id,
                    source = event.source.as_str(),
                    filename = %entry.filename,
                    size = entry.size_bytes,
                    "Capture queued"
                );
            }
            Err(e) => {
                self.failed_captures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    channel_id = %channel_id,
                    source = event.source.as_str(),
                    error = %e,
                    "Capture failed"
                );
            }
        }

        result
    }

    /// Handle a trigger event, logging failures
    pub async fn dispatch(&self, event: TriggerEvent) {
        tracing::info!(
            channel_id = %event.channel_id,
            source = event.source.as_str(),
            triggered_at = %event.timestamp,
            "Trigger received"
        );

        if let Err(e) = self.capture_event(&event).await {
            tracing::error!(
                channel_id = %event.channel_id,
                source = event.source.as_str(),
                error = %e,
                "Triggered capture failed"
            );
        }
    }

    /// Build a trigger handler that dispatches on the current runtime
    ///
    /// The handler returns immediately; captures run as spawned tasks.
    pub fn handler(self: &Arc<Self>) -> TriggerHandler {
        let dispatcher = self.clone();
        let runtime = tokio::runtime::Handle::current();

        Arc::new(move |event: TriggerEvent| {
            let dispatcher = dispatcher.clone();
            runtime.spawn(async move {
                dispatcher.dispatch(event).await;
            });
        })
    }

    pub fn stats(&self) -> CaptureStats {
        CaptureStats {
            total_captures: self.total_captures.load(Ordering::Relaxed),
            failed_captures: self.failed_captures.load(Ordering::Relaxed),
        }
    }

    /// Wait for exclusive access to a channel
    async fn acquire(&self, channel_id: &str) -> Result<CaptureLease> {
        let lock = self.get_or_create_lock(channel_id).await;

        match timeout(self.wait_timeout, lock.lock_owned()).await {
            Ok(guard) => {
                tracing::debug!(channel_id = %channel_id, "Capture access acquired");
                Ok(CaptureLease {
                    channel_id: channel_id.to_string(),
                    _guard: guard,
                })
            }
            Err(_) => {
                tracing::warn!(
                    channel_id = %channel_id,
                    timeout_ms = self.wait_timeout.as_millis(),
                    "Capture access timeout - camera busy"
                );
                Err(Error::capture(channel_id, "camera busy (timeout)"))
            }
        }
    }

    async fn get_or_create_lock(&self, channel_id: &str) -> Arc<Mutex<()>> {
        {
            let locks = self.locks.read().await;
            if let Some(lock) = locks.get(channel_id) {
                return lock.clone();
            }
        }

        let mut locks = self.locks.write().await;
        locks
            .entry(channel_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// Exclusive capture access to one channel, released on drop
struct CaptureLease {
    channel_id: String,
    _guard: tokio::sync::OwnedMutexGuard<()>,
}

impl Drop for CaptureLease {
    fn drop(&mut self) {
        tracing::debug!(channel_id = %self.channel_id, "Capture access released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TriggerSource;
    use std::path::Path;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Barrier;

    /// Writes a small file per capture and tracks per-channel concurrency
    struct FakeCamera {
        dir: PathBuf,
        seq: AtomicUsize,
        delay: Duration,
        active: std::sync::Mutex<HashMap<String, usize>>,
        max_active: std::sync::Mutex<HashMap<String, usize>>,
        barrier: Option<Barrier>,
    }

    impl FakeCamera {
        fn new(dir: &Path, delay: Duration) -> Self {
            Self {
                dir: dir.to_path_buf(),
                seq: AtomicUsize::new(0),
                delay,
                active: std::sync::Mutex::new(HashMap::new()),
                max_active: std::sync::Mutex::new(HashMap::new()),
                barrier: None,
            }
        }

        fn max_active(&self, channel_id: &str) -> usize {
            *self.max_active.lock().unwrap().get(channel_id).unwrap_or(&0)
        }
    }

    #[async_trait]
    impl CaptureBackend for FakeCamera {
        async fn capture(&self, channel_id: &str) -> Result<PathBuf> {
            {
                let mut active = self.active.lock().unwrap();
                let n = active.entry(channel_id.to_string()).or_insert(0);
                *n += 1;
                let mut max = self.max_active.lock().unwrap();
                let m = max.entry(channel_id.to_string()).or_insert(0);
                *m = (*m).max(*n);
            }

            if let Some(barrier) = &self.barrier {
                barrier.wait().await;
            }
            tokio::time::sleep(self.delay).await;

            *self.active.lock().unwrap().get_mut(channel_id).unwrap() -= 1;

            let n = self.seq.fetch_add(1, Ordering::SeqCst);
            let path = self.dir.join(format!("{channel_id}_{n:04}.jpg"));
            tokio::fs::write(&path, b"jpeg").await?;
            Ok(path)
        }
    }

    struct BrokenCamera;

    #[async_trait]
    impl CaptureBackend for BrokenCamera {
        async fn capture(&self, channel_id: &str) -> Result<PathBuf> {
            Err(Error::capture(channel_id, "ffmpeg failed"))
        }
    }

    fn channels() -> Vec<String> {
        vec!["camera_1".to_string(), "camera_2".to_string()]
    }

    #[tokio::test]
    async fn test_capture_inserts_into_queue() {
        let dir = tempfile::tempdir().unwrap();
        let queue = Arc::new(LocalQueue::open(dir.path(), 10).await.unwrap());
        let camera = Arc::new(FakeCamera::new(dir.path(), Duration::ZERO));
        let dispatcher = CaptureDispatcher::new(camera, queue.clone(), channels());

        let entry = dispatcher.capture("camera_2").await.unwrap();
        assert!(entry.filename.starts_with("camera_2_"));
        assert_eq!(queue.len().await, 1);
        assert_eq!(dispatcher.stats().total_captures, 1);
    }

    #[tokio::test]
    async fn test_unknown_channel_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let queue = Arc::new(LocalQueue::open(dir.path(), 10).await.unwrap());
        let camera = Arc::new(FakeCamera::new(dir.path(), Duration::ZERO));
        let dispatcher = CaptureDispatcher::new(camera, queue, channels());

        let result = dispatcher.capture("camera_9").await;
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn test_backend_failure_is_returned() {
        let dir = tempfile::tempdir().unwrap();
        let queue = Arc::new(LocalQueue::open(dir.path(), 10).await.unwrap());
        let dispatcher = CaptureDispatcher::new(Arc::new(BrokenCamera), queue.clone(), channels());

        let result = dispatcher.capture("camera_1").await;
        assert!(matches!(result, Err(Error::Capture { .. })));
        assert!(queue.is_empty().await);
        assert_eq!(dispatcher.stats().failed_captures, 1);

        // dispatch swallows the error
        dispatcher
            .dispatch(TriggerEvent::new("camera_1", TriggerSource::Edge))
            .await;
        assert_eq!(dispatcher.stats().failed_captures, 2);
    }

    #[tokio::test]
    async fn test_same_channel_never_overlaps() {
        let dir = tempfile::tempdir().unwrap();
        let queue = Arc::new(LocalQueue::open(dir.path(), 20).await.unwrap());
        let camera = Arc::new(FakeCamera::new(dir.path(), Duration::from_millis(20)));
        let dispatcher = Arc::new(CaptureDispatcher::new(camera.clone(), queue.clone(), channels()));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let dispatcher = dispatcher.clone();
            handles.push(tokio::spawn(async move { dispatcher.capture("camera_1").await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(camera.max_active("camera_1"), 1);
        assert_eq!(queue.len().await, 4);
    }

    #[tokio::test]
    async fn test_distinct_channels_run_concurrently() {
        let dir = tempfile::tempdir().unwrap();
        let queue = Arc::new(LocalQueue::open(dir.path(), 20).await.unwrap());
        let mut camera = FakeCamera::new(dir.path(), Duration::ZERO);
        // Both captures must be inside the backend at the same time to pass the barrier
        camera.barrier = Some(Barrier::new(2));
        let dispatcher = Arc::new(CaptureDispatcher::new(Arc::new(camera), queue.clone(), channels()));

        let d1 = dispatcher.clone();
        let d2 = dispatcher.clone();
        let both = async move {
            tokio::join!(d1.capture("camera_1"), d2.capture("camera_2"))
        };

        let (r1, r2) = tokio::time::timeout(Duration::from_secs(2), both)
            .await
            .expect("captures on distinct channels should not block each other");
        r1.unwrap();
        r2.unwrap();
        assert_eq!(queue.len().await, 2);
    }

    #[tokio::test]
    async fn test_busy_channel_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let queue = Arc::new(LocalQueue::open(dir.path(), 20).await.unwrap());
        let camera = Arc::new(FakeCamera::new(dir.path(), Duration::from_millis(300)));
        let dispatcher = Arc::new(
            CaptureDispatcher::new(camera, queue, channels())
                .with_wait_timeout(Duration::from_millis(50)),
        );

        let slow = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move { dispatcher.capture("camera_1").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let result = dispatcher.capture("camera_1").await;
        assert!(matches!(result, Err(Error::Capture { .. })));
        slow.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_handler_spawns_dispatch() {
        let dir = tempfile::tempdir().unwrap();
        let queue = Arc::new(LocalQueue::open(dir.path(), 20).await.unwrap());
        let camera = Arc::new(FakeCamera::new(dir.path(), Duration::ZERO));
        let dispatcher = Arc::new(CaptureDispatcher::new(camera, queue.clone(), channels()));

        let handler = dispatcher.handler();
        handler(TriggerEvent::new("camera_1", TriggerSource::Command));

        for _ in 0..50 {
            if queue.len().await == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(queue.len().await, 1);
    }
}
