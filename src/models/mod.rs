//! Shared data models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
        }
    }
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_sec: u64,
    pub gpio_available: bool,
    pub online: bool,
}

/// Where a trigger came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    /// Falling edge on a monitored line
    Edge,
    /// Remote command over the trigger listener
    Command,
    /// Manual capture from the dashboard
    Manual,
}

impl TriggerSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerSource::Edge => "edge",
            TriggerSource::Command => "command",
            TriggerSource::Manual => "manual",
        }
    }
}

/// A logical trigger for one channel. Consumed once by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub channel_id: String,
    pub source: TriggerSource,
    pub timestamp: DateTime<Utc>,
}

impl TriggerEvent {
    pub fn new(channel_id: impl Into<String>, source: TriggerSource) -> Self {
        Self {
            channel_id: channel_id.into(),
            source,
            timestamp: Utc::now(),
        }
    }
}

/// Callback invoked for every trigger event.
///
/// Must not block: trigger sources call it from their own loops.
pub type TriggerHandler = Arc<dyn Fn(TriggerEvent) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_source_names() {
        for source in [TriggerSource::Edge, TriggerSource::Command, TriggerSource::Manual] {
            let json = serde_json::to_value(source).unwrap();
            assert_eq!(json, source.as_str());
        }
    }
}
