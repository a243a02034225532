//! Upload ledger - persisted set of filenames confirmed uploaded

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tokio::fs;

/// On-disk document, rewritten in full on every change
#[derive(Debug, Serialize, Deserialize)]
struct LedgerFile {
    uploaded_images: Vec<String>,
    #[serde(default)]
    last_updated: Option<DateTime<Utc>>,
}

/// Monotonic set of uploaded filenames
#[derive(Debug)]
pub struct UploadLedger {
    path: PathBuf,
    uploaded: BTreeSet<String>,
}

impl UploadLedger {
    /// Load from `path`; absent or unreadable files yield an empty ledger
    pub async fn load(path: PathBuf) -> Self {
        let uploaded = match fs::read_to_string(&path).await {
            Ok(raw) => match serde_json::from_str::<LedgerFile>(&raw) {
                Ok(doc) => {
                    let set: BTreeSet<String> = doc.uploaded_images.into_iter().collect();
                    tracing::info!(
                        path = %path.display(),
                        uploaded = set.len(),
                        "Loaded upload status"
                    );
                    set
                }
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Upload status file is corrupt, starting with empty ledger"
                    );
                    BTreeSet::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeSet::new(),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Failed to read upload status, starting with empty ledger"
                );
                BTreeSet::new()
            }
        };

        Self { path, uploaded }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, filename: &str) -> bool {
        self.uploaded.contains(filename)
    }

    pub fn len(&self) -> usize {
        self.uploaded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.uploaded.is_empty()
    }

    /// Add a filename. Returns false if it was already recorded.
    pub fn insert(&mut self, filename: &str) -> bool {
        self.uploaded.insert(filename.to_string())
    }

    /// Write the full set to a temp file and rename it over the ledger
    pub async fn persist(&self) -> Result<()> {
        let doc = LedgerFile {
            uploaded_images: self.uploaded.iter().cloned().collect(),
            last_updated: Some(Utc::now()),
        };
        let json = serde_json::to_vec_pretty(&doc)?;

        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, &json).await?;
        fs::rename(&tmp_path, &self.path).await?;

        tracing::trace!(
            path = %self.path.display(),
            uploaded = self.uploaded.len(),
            "Upload status persisted"
        );

        Ok(())
    }
}
