//! SnapshotService - Image Capture from Cameras via RTSP
//!
//! ## Responsibilities
//!
//! - Single-frame RTSP capture using ffmpeg
//! - Write the frame into the storage directory with a per-channel timestamped name
//! - Kill hung ffmpeg processes on timeout

use crate::capture_dispatcher::CaptureBackend;
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::fs;
use tokio::process::Command;

/// ffmpeg-backed capture for configured RTSP channels
pub struct SnapshotService {
    /// channel_id -> RTSP URL
    streams: HashMap<String, String>,
    /// Where captured frames are written
    output_dir: PathBuf,
    /// ffmpeg timeout in seconds
    timeout_sec: u64,
    ffmpeg_bin: String,
}

impl SnapshotService {
    /// Create new SnapshotService
    ///
    /// # Arguments
    /// * `output_dir` - Storage directory of the local queue
    /// * `streams` - channel_id -> RTSP URL; channels without a URL fail to capture
    /// * `timeout_sec` - Timeout for one ffmpeg run
    pub fn new(output_dir: PathBuf, streams: HashMap<String, String>, timeout_sec: u64) -> Self {
        for (channel_id, url) in &streams {
            tracing::info!(channel_id = %channel_id, rtsp_url = %url, "RTSP stream configured");
        }

        Self {
            streams,
            output_dir,
            timeout_sec,
            ffmpeg_bin: "ffmpeg".to_string(),
        }
    }

    /// Override the ffmpeg executable
    pub fn with_ffmpeg_bin(mut self, bin: impl Into<String>) -> Self {
        self.ffmpeg_bin = bin.into();
        self
    }

    /// Output filename for a capture: `{channel}_{YYYYmmdd_HHMMSS_micros}.jpg`
    pub fn frame_filename(channel_id: &str) -> String {
        format!("{}_{}.jpg", channel_id, Utc::now().format("%Y%m%d_%H%M%S_%6f"))
    }

    /// Capture one frame from RTSP into `output`
    ///
    /// kill_on_drop(true) makes the timeout drop the Child, which SIGKILLs ffmpeg.
    async fn capture_rtsp(&self, rtsp_url: &str, output: &std::path::Path) -> Result<()> {
        let child = Command::new(&self.ffmpeg_bin)
            .args(["-rtsp_transport", "tcp", "-i", rtsp_url, "-frames:v", "1", "-q:v", "2"])
            .args(["-loglevel", "error", "-y"])
            .arg(output)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Internal(format!("ffmpeg spawn failed: {}", e)))?;

        let timeout_duration = Duration::from_secs(self.timeout_sec);

        match tokio::time::timeout(timeout_duration, child.wait_with_output()).await {
            Ok(Ok(output_status)) => {
                if !output_status.status.success() {
                    let stderr = String::from_utf8_lossy(&output_status.stderr);
                    return Err(Error::Internal(format!("ffmpeg failed: {}", stderr.trim())));
                }
                Ok(())
            }
            Ok(Err(e)) => Err(Error::Internal(format!("ffmpeg execution failed: {}", e))),
            Err(_) => {
                tracing::warn!(
                    timeout_sec = self.timeout_sec,
                    rtsp_url = %rtsp_url,
                    "ffmpeg timeout, process killed via kill_on_drop"
                );
                Err(Error::Internal(format!("ffmpeg timeout ({}s)", self.timeout_sec)))
            }
        }
    }
}

#[async_trait]
impl CaptureBackend for SnapshotService {
    async fn capture(&self, channel_id: &str) -> Result<PathBuf> {
        let url = self
            .streams
            .get(channel_id)
            .ok_or_else(|| {
                Error::Unavailable(format!("No RTSP URL configured for {}", channel_id))
            })?;

        fs::create_dir_all(&self.output_dir).await?;
        let output = self.output_dir.join(Self::frame_filename(channel_id));

        if let Err(e) = self.capture_rtsp(url, &output).await {
            // ffmpeg may leave a partial file behind
            let _ = fs::remove_file(&output).await;
            return Err(Error::capture(channel_id, e.to_string()));
        }

        match fs::metadata(&output).await {
            Ok(meta) if meta.len() > 0 => {
                tracing::debug!(
                    channel_id = %channel_id,
                    size = meta.len(),
                    path = %output.display(),
                    "Snapshot captured via ffmpeg RTSP"
                );
                Ok(output)
            }
            _ => {
                let _ = fs::remove_file(&output).await;
                Err(Error::capture(channel_id, "ffmpeg produced no image"))
            }
        }
    }
}
