//! EdgeDetector - Hardware Line Trigger Monitoring
//!
//! ## Responsibilities
//!
//! - Poll one digital input line per channel (10ms)
//! - Fire the channel handler once per falling edge (high -> low), debounced
//! - Per-channel dispatch toggle without stopping the poll loop
//! - Degrade to an unavailable no-op mode when there is no line access

mod line;

pub use line::{LineReader, NoopLine, SysfsGpio};

use crate::error::{Error, Result};
use crate::models::{TriggerEvent, TriggerHandler, TriggerSource};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// Poll interval for line sampling
const DEFAULT_POLL_INTERVAL_MS: u64 = 10;

/// Minimum spacing between two fired edges on one channel
const DEFAULT_DEBOUNCE_MS: u64 = 200;

/// Pause after an iteration with read errors
const ERROR_BACKOFF_MS: u64 = 100;

/// Bounded wait for the poll loop to exit on stop
const STOP_JOIN_TIMEOUT_MS: u64 = 1000;

/// Falling-edge detector for one line
#[derive(Debug, Clone)]
pub struct EdgeTracker {
    previous: bool,
    last_fired: Option<Instant>,
    debounce: Duration,
}

impl EdgeTracker {
    pub fn new(initial_level: bool, debounce: Duration) -> Self {
        Self {
            previous: initial_level,
            last_fired: None,
            debounce,
        }
    }

    /// Feed one sample. Returns true if it completes a falling edge that should fire.
    pub fn sample(&mut self, level: bool, now: Instant) -> bool {
        let falling = self.previous && !level;
        self.previous = level;

        if !falling {
            return false;
        }

        if let Some(last) = self.last_fired {
            if now.saturating_duration_since(last) < self.debounce {
                tracing::debug!("Falling edge suppressed by debounce");
                return false;
            }
        }

        self.last_fired = Some(now);
        true
    }
}

/// Monitoring state of one channel
#[derive(Debug, Clone, Serialize)]
pub struct ChannelMonitor {
    pub pin: u32,
    pub enabled: bool,
    pub handler_registered: bool,
    /// True while the line is pulled low; None when unavailable
    pub line_low: Option<bool>,
}

/// Monitoring state of the detector
#[derive(Debug, Clone, Serialize)]
pub struct MonitoringStatus {
    pub available: bool,
    pub running: bool,
    pub channels: BTreeMap<String, ChannelMonitor>,
}

struct PollTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// EdgeDetector instance
pub struct EdgeDetector {
    reader: Arc<dyn LineReader>,
    available: bool,
    /// channel_id -> pin
    pins: Vec<(String, u32)>,
    handlers: Arc<RwLock<HashMap<String, TriggerHandler>>>,
    enabled: Arc<RwLock<HashMap<String, bool>>>,
    poll_interval: Duration,
    debounce: Duration,
    task: Mutex<Option<PollTask>>,
}

impl EdgeDetector {
    /// Create over an explicit line backend
    pub fn new(reader: Arc<dyn LineReader>, pins: Vec<(String, u32)>) -> Self {
        let available = reader.is_available();
        let enabled = pins.iter().map(|(c, _)| (c.clone(), true)).collect();

        Self {
            reader,
            available,
            pins,
            handlers: Arc::new(RwLock::new(HashMap::new())),
            enabled: Arc::new(RwLock::new(enabled)),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            task: Mutex::new(None),
        }
    }

    /// Create in unavailable mode (no events are ever fired)
    pub fn unavailable(pins: Vec<(String, u32)>) -> Self {
        Self::new(Arc::new(NoopLine), pins)
    }

    /// Open sysfs GPIO when enabled, falling back to unavailable mode
    pub fn from_system(gpio_enabled: bool, pins: Vec<(String, u32)>) -> Self {
        if !gpio_enabled {
            tracing::warn!("GPIO disabled by configuration. Running in unavailable mode.");
            return Self::unavailable(pins);
        }

        let pin_numbers: Vec<u32> = pins.iter().map(|(_, p)| *p).collect();
        match SysfsGpio::open(&pin_numbers) {
            Ok(gpio) => {
                tracing::info!("GPIO setup completed successfully");
                Self::new(Arc::new(gpio), pins)
            }
            Err(e) => {
                tracing::warn!(error = %e, "GPIO not available. Running in unavailable mode.");
                Self::unavailable(pins)
            }
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    /// Register the handler for a channel. Succeeds in unavailable mode too.
    pub async fn register_handler(&self, channel_id: &str, handler: TriggerHandler) -> Result<()> {
        if !self.pins.iter().any(|(c, _)| c == channel_id) {
            return Err(Error::Validation(format!("Invalid camera ID: {}", channel_id)));
        }

        self.handlers
            .write()
            .await
            .insert(channel_id.to_string(), handler);
        tracing::info!(channel_id = %channel_id, "Registered trigger handler");

        Ok(())
    }

    /// Start the poll loop
    pub async fn start_monitoring(&self) {
        if !self.available {
            tracing::warn!("GPIO not available, cannot start monitoring");
            return;
        }

        let mut task = self.task.lock().await;
        if let Some(existing) = task.as_ref() {
            if !existing.handle.is_finished() {
                tracing::warn!("GPIO monitoring already started");
                return;
            }
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(poll_loop(
            self.reader.clone(),
            self.pins.clone(),
            self.handlers.clone(),
            self.enabled.clone(),
            self.poll_interval,
            self.debounce,
            shutdown_rx,
        ));

        *task = Some(PollTask {
            shutdown: shutdown_tx,
            handle,
        });

        tracing::info!(
            poll_interval_ms = self.poll_interval.as_millis(),
            debounce_ms = self.debounce.as_millis(),
            "GPIO monitoring started"
        );
    }

    /// Stop the poll loop, waiting a bounded time for it to exit
    pub async fn stop_monitoring(&self) {
        let Some(task) = self.task.lock().await.take() else {
            return;
        };

        let _ = task.shutdown.send(true);
        let mut handle = task.handle;

        match tokio::time::timeout(Duration::from_millis(STOP_JOIN_TIMEOUT_MS), &mut handle).await {
            Ok(_) => tracing::info!("GPIO monitoring stopped"),
            Err(_) => {
                tracing::warn!("GPIO poll loop did not stop in time, aborting");
                handle.abort();
            }
        }
    }

    pub async fn is_monitoring(&self) -> bool {
        self.task
            .lock()
            .await
            .as_ref()
            .map(|t| !t.handle.is_finished())
            .unwrap_or(false)
    }

    /// Current line state: Some(true) while pulled low, None when unavailable
    pub fn line_state(&self, channel_id: &str) -> Option<bool> {
        if !self.available {
            return None;
        }

        let pin = self.pin_for(channel_id)?;
        match self.reader.read(pin) {
            Ok(high) => Some(!high),
            Err(e) => {
                tracing::warn!(channel_id = %channel_id, pin = pin, error = %e, "GPIO read failed");
                None
            }
        }
    }

    /// Enable or disable dispatch for one channel
    pub async fn set_channel_enabled(&self, channel_id: &str, enabled: bool) -> Result<()> {
        if self.pin_for(channel_id).is_none() {
            return Err(Error::Validation(format!("Invalid camera ID: {}", channel_id)));
        }

        self.enabled
            .write()
            .await
            .insert(channel_id.to_string(), enabled);

        tracing::info!(
            channel_id = %channel_id,
            enabled = enabled,
            "GPIO monitoring {}",
            if enabled { "enabled" } else { "disabled" }
        );

        Ok(())
    }

    pub async fn status(&self) -> MonitoringStatus {
        let running = self.is_monitoring().await;
        let enabled = self.enabled.read().await;
        let handlers = self.handlers.read().await;

        let channels = self
            .pins
            .iter()
            .map(|(channel_id, pin)| {
                let monitor = ChannelMonitor {
                    pin: *pin,
                    enabled: enabled.get(channel_id).copied().unwrap_or(true),
                    handler_registered: handlers.contains_key(channel_id),
                    line_low: self.line_state(channel_id),
                };
                (channel_id.clone(), monitor)
            })
            .collect();

        MonitoringStatus {
            available: self.available,
            running,
            channels,
        }
    }

    fn pin_for(&self, channel_id: &str) -> Option<u32> {
        self.pins
            .iter()
            .find(|(c, _)| c == channel_id)
            .map(|(_, p)| *p)
    }
}

/// Sample every pin on the blocking pool; sysfs reads are synchronous file IO
async fn read_levels(
    reader: &Arc<dyn LineReader>,
    pins: &Arc<Vec<(String, u32)>>,
) -> Vec<io::Result<bool>> {
    let count = pins.len();
    let reader = reader.clone();
    let pins = pins.clone();

    tokio::task::spawn_blocking(move || pins.iter().map(|(_, pin)| reader.read(*pin)).collect())
        .await
        .unwrap_or_else(|e| {
            (0..count)
                .map(|_| Err(io::Error::new(io::ErrorKind::Other, e.to_string())))
                .collect()
        })
}

async fn poll_loop(
    reader: Arc<dyn LineReader>,
    pins: Vec<(String, u32)>,
    handlers: Arc<RwLock<HashMap<String, TriggerHandler>>>,
    enabled: Arc<RwLock<HashMap<String, bool>>>,
    poll_interval: Duration,
    debounce: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let pins = Arc::new(pins);

    // Seed with the current level so a line already low at start does not fire
    let initial = read_levels(&reader, &pins).await;
    let mut trackers: Vec<EdgeTracker> = initial
        .into_iter()
        .map(|level| EdgeTracker::new(level.unwrap_or(true), debounce))
        .collect();

    let mut ticker = interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                // Sender dropped means the detector is gone
                if changed.is_err() {
                    break;
                }
            }
            _ = ticker.tick() => {}
        }
        if *shutdown.borrow() {
            break;
        }

        // Every line is tracked, with or without a handler, so a handler
        // registered later never sees a stale level
        let levels = read_levels(&reader, &pins).await;
        let now = Instant::now();
        let mut had_error = false;
        let mut fired = Vec::new();

        for (idx, level) in levels.into_iter().enumerate() {
            let (channel_id, pin) = &pins[idx];
            match level {
                Ok(level) => {
                    if trackers[idx].sample(level, now) {
                        fired.push(channel_id);
                    }
                }
                Err(e) => {
                    tracing::error!(
                        channel_id = %channel_id,
                        pin = pin,
                        error = %e,
                        "Error in GPIO monitoring"
                    );
                    had_error = true;
                }
            }
        }

        if !fired.is_empty() {
            let handlers = handlers.read().await;
            let enabled = enabled.read().await;

            for channel_id in fired {
                let Some(handler) = handlers.get(channel_id) else {
                    tracing::debug!(channel_id = %channel_id, "GPIO trigger ignored, no handler");
                    continue;
                };

                if enabled.get(channel_id).copied().unwrap_or(true) {
                    tracing::info!(channel_id = %channel_id, "GPIO trigger detected");
                    handler(TriggerEvent::new(channel_id.clone(), TriggerSource::Edge));
                } else {
                    tracing::debug!(channel_id = %channel_id, "GPIO trigger ignored, channel disabled");
                }
            }
        }

        if had_error {
            tokio::select! {
                _ = shutdown.changed() => {}
                _ = tokio::time::sleep(Duration::from_millis(ERROR_BACKOFF_MS)) => {}
            }
        }
    }

    tracing::debug!("GPIO poll loop exited");
}
