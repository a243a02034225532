//! LocalQueue - Bounded Durable Image Queue
//!
//! ## Responsibilities
//!
//! - Insertion-ordered sequence of captured images (newest first)
//! - Capacity enforcement with eviction into `backup/`
//! - Persisted upload ledger (`upload_status.json`)
//! - Rebuild from the storage directory on start and on rescan
//!
//! ## Storage Layout
//!
//! ```text
//! <storage_dir>/
//!   camera_1_20250101_120000_000000.jpg
//!   ...
//!   upload_status.json
//!   backup/
//! ```
//!
//! All mutations take the write lock; readers get cloned snapshots.

mod ledger;
mod types;

pub use ledger::UploadLedger;
pub use types::*;

use crate::error::{Error, Result};
use chrono::Utc;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::sync::RwLock;

/// Ledger filename inside the storage directory
pub const LEDGER_FILENAME: &str = "upload_status.json";

/// Subdirectory receiving evicted images
pub const BACKUP_DIRNAME: &str = "backup";

/// Default number of images kept locally
pub const DEFAULT_CAPACITY: usize = 50;

struct QueueState {
    /// Newest first
    entries: VecDeque<QueueEntry>,
    ledger: UploadLedger,
}

/// LocalQueue instance
pub struct LocalQueue {
    storage_dir: PathBuf,
    backup_dir: PathBuf,
    capacity: usize,
    state: RwLock<QueueState>,
}

impl LocalQueue {
    /// Open the queue over `storage_dir`, rebuilding state from disk
    pub async fn open(storage_dir: impl Into<PathBuf>, capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::Config(
                "local queue capacity must be at least 1".to_string(),
            ));
        }

        let storage_dir = storage_dir.into();
        if let Err(e) = fs::create_dir_all(&storage_dir).await {
            tracing::warn!(
                storage_dir = %storage_dir.display(),
                error = %e,
                "Failed to create storage directory"
            );
        }

        let ledger = UploadLedger::load(storage_dir.join(LEDGER_FILENAME)).await;
        let entries = scan_storage_dir(&storage_dir).await;

        let queue = Self {
            backup_dir: storage_dir.join(BACKUP_DIRNAME),
            storage_dir,
            capacity,
            state: RwLock::new(QueueState { entries, ledger }),
        };

        let (count, uploaded) = {
            let mut state = queue.state.write().await;
            queue.enforce_capacity(&mut state).await;
            (state.entries.len(), state.ledger.len())
        };

        tracing::info!(
            storage_dir = %queue.storage_dir.display(),
            capacity = capacity,
            images = count,
            uploaded = uploaded,
            "LocalQueue opened"
        );

        Ok(queue)
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Record a captured artifact at the head of the queue
    ///
    /// Evicts the oldest entries while the queue is over capacity.
    pub async fn insert(&self, filepath: impl AsRef<Path>) -> Result<QueueEntry> {
        let filepath = filepath.as_ref();

        let entry = match QueueEntry::from_path(filepath).await {
            Ok(entry) => entry,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::error!(path = %filepath.display(), "File does not exist");
                return Err(Error::NotFound(format!(
                    "artifact does not exist: {}",
                    filepath.display()
                )));
            }
            Err(e) => return Err(e.into()),
        };

        let mut state = self.state.write().await;

        if state.entries.iter().any(|e| e.filename == entry.filename) {
            return Err(Error::Conflict(format!(
                "image already queued: {}",
                entry.filename
            )));
        }

        state.entries.push_front(entry.clone());
        self.enforce_capacity(&mut state).await;

        tracing::info!(
            filename = %entry.filename,
            size = entry.size_bytes,
            count = state.entries.len(),
            "Added image to local storage"
        );

        Ok(entry)
    }

    /// Mark a filename as uploaded. Returns false if it already was.
    ///
    /// The in-memory ledger keeps the record even if persisting fails.
    pub async fn mark_uploaded(&self, filename: &str) -> Result<bool> {
        let mut state = self.state.write().await;

        if !state.ledger.insert(filename) {
            return Ok(false);
        }

        state.ledger.persist().await?;
        tracing::info!(filename = %filename, "Marked as uploaded");

        Ok(true)
    }

    pub async fn is_uploaded(&self, filename: &str) -> bool {
        self.state.read().await.ledger.contains(filename)
    }

    pub async fn uploaded_count(&self) -> usize {
        self.state.read().await.ledger.len()
    }

    /// Entries not yet in the ledger, newest first
    pub async fn pending_uploads(&self) -> Vec<QueueEntry> {
        let state = self.state.read().await;
        state
            .entries
            .iter()
            .filter(|e| !state.ledger.contains(&e.filename))
            .cloned()
            .collect()
    }

    /// Snapshot of all entries, newest first
    pub async fn entries(&self) -> Vec<QueueEntry> {
        self.state.read().await.entries.iter().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.entries.is_empty()
    }

    /// Delete an entry and its file. Returns false if no such entry.
    pub async fn remove(&self, filename: &str) -> Result<bool> {
        let mut state = self.state.write().await;

        let Some(index) = state.entries.iter().position(|e| e.filename == filename) else {
            tracing::warn!(filename = %filename, "Image not found in storage");
            return Ok(false);
        };

        match fs::remove_file(&state.entries[index].filepath).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        state.entries.remove(index);
        tracing::info!(filename = %filename, "Removed image from storage");

        Ok(true)
    }

    pub async fn stats(&self) -> QueueStats {
        let state = self.state.read().await;
        let total_bytes: u64 = state.entries.iter().map(|e| e.size_bytes).sum();

        QueueStats {
            count: state.entries.len(),
            capacity: self.capacity,
            total_bytes,
            total_size_mb: (total_bytes as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0,
            storage_dir: self.storage_dir.clone(),
            oldest: state.entries.back().map(|e| e.created_at),
            newest: state.entries.front().map(|e| e.created_at),
        }
    }

    /// Re-derive the sequence from the storage directory
    pub async fn rescan(&self) -> Result<usize> {
        let entries = scan_storage_dir(&self.storage_dir).await;

        let mut state = self.state.write().await;
        state.entries = entries;
        self.enforce_capacity(&mut state).await;

        tracing::info!(count = state.entries.len(), "Rescanned storage directory");
        Ok(state.entries.len())
    }

    /// Delete backup files older than `max_age`. Returns the number removed.
    pub async fn cleanup_backup(&self, max_age: Duration) -> Result<usize> {
        let mut dir = match fs::read_dir(&self.backup_dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let cutoff = std::time::SystemTime::now()
            .checked_sub(max_age)
            .unwrap_or(std::time::UNIX_EPOCH);
        let mut removed = 0;

        while let Some(item) = dir.next_entry().await? {
            let meta = match item.metadata().await {
                Ok(m) if m.is_file() => m,
                _ => continue,
            };
            let Ok(modified) = meta.modified() else {
                continue;
            };
            if modified < cutoff {
                match fs::remove_file(item.path()).await {
                    Ok(()) => {
                        removed += 1;
                        tracing::info!(
                            filename = %item.file_name().to_string_lossy(),
                            "Cleaned up old backup file"
                        );
                    }
                    Err(e) => tracing::error!(
                        path = %item.path().display(),
                        error = %e,
                        "Failed to remove backup file"
                    ),
                }
            }
        }

        Ok(removed)
    }

    // ========================================
    // Internal Methods
    // ========================================

    async fn enforce_capacity(&self, state: &mut QueueState) {
        while state.entries.len() > self.capacity {
            if let Some(oldest) = state.entries.pop_back() {
                self.evict(oldest).await;
            }
        }
    }

    /// Move an evicted image into backup, deleting it if the move fails
    async fn evict(&self, entry: QueueEntry) {
        let moved = async {
            fs::create_dir_all(&self.backup_dir).await?;
            fs::rename(&entry.filepath, self.backup_dir.join(&entry.filename)).await
        }
        .await;

        match moved {
            Ok(()) => {
                tracing::info!(filename = %entry.filename, "Moved old image to backup");
            }
            Err(e) => {
                tracing::warn!(
                    filename = %entry.filename,
                    error = %e,
                    "Backup move failed, deleting old image"
                );
                match fs::remove_file(&entry.filepath).await {
                    Ok(()) => tracing::info!(filename = %entry.filename, "Deleted old image"),
                    Err(e) => tracing::error!(
                        filename = %entry.filename,
                        error = %e,
                        "Failed to delete old image"
                    ),
                }
            }
        }
    }
}

/// Scan the top level of `dir` for images, newest first.
///
/// Unreadable directories or files are logged and skipped.
async fn scan_storage_dir(dir: &Path) -> VecDeque<QueueEntry> {
    let mut entries = Vec::new();

    let mut read_dir = match fs::read_dir(dir).await {
        Ok(rd) => rd,
        Err(e) => {
            tracing::warn!(
                storage_dir = %dir.display(),
                error = %e,
                "Storage directory not readable, starting empty"
            );
            return VecDeque::new();
        }
    };

    loop {
        let item = match read_dir.next_entry().await {
            Ok(Some(item)) => item,
            Ok(None) => break,
            Err(e) => {
                tracing::error!(error = %e, "Error reading storage directory");
                break;
            }
        };

        let path = item.path();
        if !is_image_file(&path) {
            continue;
        }

        match QueueEntry::from_path(&path).await {
            Ok(entry) => entries.push(entry),
            Err(e) => tracing::error!(
                path = %path.display(),
                error = %e,
                "Error reading file"
            ),
        }
    }

    entries.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.filename.cmp(&a.filename))
    });

    tracing::debug!(
        storage_dir = %dir.display(),
        count = entries.len(),
        scanned_at = %Utc::now(),
        "Scanned storage directory"
    );

    entries.into()
}
