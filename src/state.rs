//! Application state
//!
//! Configuration from the environment and the state shared by handlers

use crate::error::{Error, Result};
use crate::status_surface::StatusSurface;
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// HTTP server host
    pub host: String,
    /// HTTP server port
    pub port: u16,
    /// Trigger listener bind address
    pub trigger_bind: String,
    /// Trigger listener port
    pub trigger_port: u16,
    /// Local image storage (queue directory)
    pub storage_dir: PathBuf,
    /// Queue capacity
    pub max_images: usize,
    /// Try to open GPIO lines
    pub gpio_enabled: bool,
    pub gpio_camera_1_pin: u32,
    pub gpio_camera_2_pin: u32,
    pub gpio_debounce_ms: u64,
    pub rtsp_camera_1: Option<String>,
    pub rtsp_camera_2: Option<String>,
    /// ffmpeg timeout per capture
    pub capture_timeout_sec: u64,
    /// Upload endpoint; unset means uploads fail and images stay pending
    pub s3_api_url: Option<String>,
    pub max_retries: u32,
    pub retry_delay_sec: u64,
    /// Connectivity probe target
    pub connectivity_url: String,
    pub sync_interval_sec: u64,
    pub sync_backoff_sec: u64,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_flag(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env_or("PORT", 5000),
            trigger_bind: std::env::var("TRIGGER_BIND").unwrap_or_else(|_| "0.0.0.0".to_string()),
            trigger_port: env_or("TRIGGER_PORT", 9999),
            storage_dir: std::env::var("STORAGE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("images")),
            max_images: env_or("MAX_IMAGES", crate::local_queue::DEFAULT_CAPACITY),
            gpio_enabled: env_flag("GPIO_ENABLED", true),
            gpio_camera_1_pin: env_or("GPIO_CAMERA_1_PIN", 17),
            gpio_camera_2_pin: env_or("GPIO_CAMERA_2_PIN", 27),
            gpio_debounce_ms: env_or("GPIO_DEBOUNCE_MS", 200),
            rtsp_camera_1: env_opt("RTSP_CAMERA_1"),
            rtsp_camera_2: env_opt("RTSP_CAMERA_2"),
            capture_timeout_sec: env_or("CAPTURE_TIMEOUT_SEC", 15),
            s3_api_url: env_opt("S3_API_URL"),
            max_retries: env_or("MAX_RETRIES", 3),
            retry_delay_sec: env_or("RETRY_DELAY_SEC", 2),
            connectivity_url: std::env::var("CONNECTIVITY_URL")
                .unwrap_or_else(|_| "https://www.google.com".to_string()),
            sync_interval_sec: env_or("SYNC_INTERVAL_SEC", 10),
            sync_backoff_sec: env_or("SYNC_BACKOFF_SEC", 30),
        }
    }
}

impl AppConfig {
    /// Fail fast on settings the services cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.max_images == 0 {
            return Err(Error::Config("MAX_IMAGES must be at least 1".to_string()));
        }
        if self.channels().is_empty() {
            return Err(Error::Config("No camera channels configured".to_string()));
        }
        Ok(())
    }

    /// Channel ids in trigger order
    pub fn channels(&self) -> Vec<String> {
        self.gpio_pins().into_iter().map(|(c, _)| c).collect()
    }

    /// channel_id -> GPIO pin
    pub fn gpio_pins(&self) -> Vec<(String, u32)> {
        vec![
            ("camera_1".to_string(), self.gpio_camera_1_pin),
            ("camera_2".to_string(), self.gpio_camera_2_pin),
        ]
    }

    /// channel_id -> RTSP URL for configured cameras
    pub fn rtsp_streams(&self) -> HashMap<String, String> {
        [
            ("camera_1", &self.rtsp_camera_1),
            ("camera_2", &self.rtsp_camera_2),
        ]
        .into_iter()
        .filter_map(|(c, url)| url.clone().map(|u| (c.to_string(), u)))
        .collect()
    }

    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn trigger_addr(&self) -> String {
        format!("{}:{}", self.trigger_bind, self.trigger_port)
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub status: Arc<StatusSurface>,
}
