//! Offline buffering -> reconnect -> drain -> restart

use async_trait::async_trait;
use edgecam::capture_dispatcher::{CaptureBackend, CaptureDispatcher};
use edgecam::local_queue::{LocalQueue, LEDGER_FILENAME};
use edgecam::models::{TriggerEvent, TriggerSource};
use edgecam::sync_engine::{CycleOutcome, SyncEngine};
use edgecam::uploader::{ConnectivityProbe, Uploader};
use edgecam::{Error, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

struct SequenceCamera {
    dir: PathBuf,
    seq: AtomicUsize,
}

#[async_trait]
impl CaptureBackend for SequenceCamera {
    async fn capture(&self, channel_id: &str) -> Result<PathBuf> {
        let n = self.seq.fetch_add(1, Ordering::SeqCst);
        let path = self.dir.join(format!("{}_{:04}.jpg", channel_id, n));
        tokio::fs::write(&path, b"jpeg").await?;
        Ok(path)
    }
}

#[derive(Default)]
struct RecordingUploader {
    uploaded: Mutex<Vec<String>>,
}

#[async_trait]
impl Uploader for RecordingUploader {
    async fn upload(&self, path: &Path) -> Result<String> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| Error::Validation("no filename".to_string()))?;
        self.uploaded.lock().unwrap().push(name.clone());
        Ok(format!("s3://bucket/{}", name))
    }
}

struct SwitchProbe(AtomicBool);

#[async_trait]
impl ConnectivityProbe for SwitchProbe {
    async fn is_online(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[tokio::test]
async fn test_offline_buffering_then_drain_then_restart() {
    let dir = tempfile::tempdir().unwrap();
    let channels = vec!["camera_1".to_string(), "camera_2".to_string()];

    let queue = Arc::new(LocalQueue::open(dir.path(), 5).await.unwrap());
    let camera = Arc::new(SequenceCamera {
        dir: dir.path().to_path_buf(),
        seq: AtomicUsize::new(0),
    });
    let dispatcher = Arc::new(CaptureDispatcher::new(camera, queue.clone(), channels));
    let uploader = Arc::new(RecordingUploader::default());
    let probe = Arc::new(SwitchProbe(AtomicBool::new(false)));
    let sync = SyncEngine::new(queue.clone(), uploader.clone(), probe.clone());

    // 7 triggers while offline; capacity 5 keeps the newest 5
    for i in 0..7 {
        let channel = if i % 2 == 0 { "camera_1" } else { "camera_2" };
        dispatcher
            .dispatch(TriggerEvent::new(channel, TriggerSource::Edge))
            .await;
        assert_eq!(sync.run_cycle().await.unwrap(), CycleOutcome::Offline);
    }

    assert_eq!(queue.len().await, 5);
    assert_eq!(queue.pending_uploads().await.len(), 5);
    assert!(uploader.uploaded.lock().unwrap().is_empty());
    let backups = std::fs::read_dir(queue.backup_dir()).unwrap().count();
    assert_eq!(backups, 2);

    // reconnect: one batch of 5 drains everything, oldest first
    probe.0.store(true, Ordering::SeqCst);
    let outcome = sync.run_cycle().await.unwrap();
    assert!(matches!(outcome, CycleOutcome::Drained(ref r) if r.uploaded == 5 && !r.aborted));
    assert_eq!(
        *uploader.uploaded.lock().unwrap(),
        vec![
            "camera_1_0002.jpg",
            "camera_2_0003.jpg",
            "camera_1_0004.jpg",
            "camera_2_0005.jpg",
            "camera_1_0006.jpg",
        ]
    );
    assert!(queue.pending_uploads().await.is_empty());
    assert!(dir.path().join(LEDGER_FILENAME).exists());

    let counters = sync.counters().await;
    assert!(counters.online);
    assert_eq!(counters.successful_uploads, 5);
    assert_eq!(counters.pending_uploads, 0);

    // restart: a fresh queue over the same directory sees nothing pending
    drop(sync);
    drop(dispatcher);
    drop(queue);

    let reopened = LocalQueue::open(dir.path(), 5).await.unwrap();
    assert_eq!(reopened.len().await, 5);
    assert_eq!(reopened.uploaded_count().await, 5);
    assert!(reopened.pending_uploads().await.is_empty());
    assert!(reopened.is_uploaded("camera_1_0006.jpg").await);

    // a new capture after restart is the only pending image
    let path = dir.path().join("camera_2_0007.jpg");
    tokio::fs::write(&path, b"jpeg").await.unwrap();
    reopened.insert(&path).await.unwrap();

    let pending = reopened.pending_uploads().await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].filename, "camera_2_0007.jpg");
}
