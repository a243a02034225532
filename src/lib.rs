//! edgecam Library
//!
//! Trigger-driven camera capture with an offline-durable local queue and
//! background upload sync.
//!
//! ## Architecture (6 Components)
//!
//! 1. EdgeDetector - Falling-edge trigger on GPIO lines
//! 2. CommandListener - Remote trigger commands over TCP
//! 3. CaptureDispatcher - Per-channel serialized capture
//! 4. LocalQueue - Bounded image store + upload ledger
//! 5. SyncEngine - Background batch upload
//! 6. StatusSurface - Status and control behind the WebAPI
//!
//! ## Design Principles
//!
//! - Every trigger source routes through one shared dispatcher
//! - The queue is the only owner of image files; uploads never delete
//! - Missing hardware degrades to an unavailable mode instead of failing

pub mod capture_dispatcher;
pub mod command_listener;
pub mod edge_detector;
pub mod error;
pub mod local_queue;
pub mod models;
pub mod snapshot_service;
pub mod state;
pub mod status_surface;
pub mod sync_engine;
pub mod uploader;
pub mod web_api;

pub use error::{Error, Result};
pub use state::AppState;
