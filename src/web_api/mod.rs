//! WebAPI - REST API Endpoints
//!
//! ## Responsibilities
//!
//! - HTTP API routes over the status surface
//! - Request validation
//! - Response formatting

mod routes;

pub use routes::create_router;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::models::HealthResponse;
use crate::state::AppState;

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let response = HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_sec: state.status.uptime_sec(),
        gpio_available: state.status.gpio_available(),
        online: state.status.online().await,
    };

    Json(response)
}
