//! Local queue types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;

/// Image extensions recognized in the storage directory
pub const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Check whether a path has a recognized image extension (case-insensitive)
pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            IMAGE_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// One captured artifact held in the queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Unique key within the queue
    pub filename: String,
    pub filepath: PathBuf,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl QueueEntry {
    /// Build an entry from file metadata.
    ///
    /// Creation time falls back to modification time on filesystems without birth time.
    pub async fn from_path(path: &Path) -> std::io::Result<Self> {
        let meta = fs::metadata(path).await?;
        if !meta.is_file() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("not a regular file: {}", path.display()),
            ));
        }

        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("path has no filename: {}", path.display()),
                )
            })?;

        let modified = meta.modified().unwrap_or_else(|_| SystemTime::now());
        let created = meta.created().unwrap_or(modified);

        Ok(Self {
            filename,
            filepath: path.to_path_buf(),
            size_bytes: meta.len(),
            created_at: DateTime::<Utc>::from(created),
            modified_at: DateTime::<Utc>::from(modified),
        })
    }
}

/// Queue statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStats {
    pub count: usize,
    pub capacity: usize,
    pub total_bytes: u64,
    pub total_size_mb: f64,
    pub storage_dir: PathBuf,
    /// Creation time of the oldest entry
    pub oldest: Option<DateTime<Utc>>,
    /// Creation time of the newest entry
    pub newest: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_image_file() {
        assert!(is_image_file(Path::new("a.jpg")));
        assert!(is_image_file(Path::new("b.JPEG")));
        assert!(is_image_file(Path::new("dir/c.Png")));
        assert!(!is_image_file(Path::new("upload_status.json")));
        assert!(!is_image_file(Path::new("noext")));
        assert!(!is_image_file(Path::new("x.gif")));
    }

    #[tokio::test]
    async fn test_from_path_reads_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("camera_1_x.jpg");
        std::fs::write(&path, vec![0u8; 42]).unwrap();

        let entry = QueueEntry::from_path(&path).await.unwrap();
        assert_eq!(entry.filename, "camera_1_x.jpg");
        assert_eq!(entry.size_bytes, 42);
        assert_eq!(entry.filepath, path);
    }

    #[tokio::test]
    async fn test_from_path_rejects_directory() {
        let dir = tempfile::tempdir().unwrap();
        let err = QueueEntry::from_path(dir.path()).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
    }
}
