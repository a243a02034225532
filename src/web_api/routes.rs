//! API Routes

use axum::{
    extract::{Path, State},
    http::header,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use crate::error::Error;
use crate::models::ApiResponse;
use crate::state::AppState;

/// Create API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health & Status
        .route("/healthz", get(super::health_check))
        .route("/api/status", get(get_status))
        // Images
        .route("/api/images", get(list_images))
        .route("/api/images/:filename", get(get_image))
        .route("/api/scan-images", post(scan_images))
        // Uploads
        .route("/api/upload-queue", get(get_upload_queue))
        .route("/api/force-upload", post(force_upload))
        // GPIO
        .route("/api/gpio-status", get(gpio_status))
        .route("/api/gpio-toggle", post(gpio_toggle))
        // Capture
        .route("/api/capture/:camera_id", post(capture))
        .with_state(state)
}

// ========================================
// Status
// ========================================

async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.status.status().await;
    Json(ApiResponse::success(status))
}

// ========================================
// Images
// ========================================

async fn list_images(State(state): State<AppState>) -> impl IntoResponse {
    let images = state.status.images().await;
    Json(ApiResponse::success(json!({
        "total": images.len(),
        "images": images,
    })))
}

/// Serve the image bytes. Only filenames present in the queue are served.
async fn get_image(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> impl IntoResponse {
    let entry = match state.status.image(&filename).await {
        Ok(entry) => entry,
        Err(e) => return e.into_response(),
    };

    match tokio::fs::read(&entry.filepath).await {
        Ok(bytes) => {
            let content_type = if filename.to_ascii_lowercase().ends_with(".png") {
                "image/png"
            } else {
                "image/jpeg"
            };
            ([(header::CONTENT_TYPE, content_type)], bytes).into_response()
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Error::NotFound(format!("Image {}", filename)).into_response()
        }
        Err(e) => Error::Io(e).into_response(),
    }
}

async fn scan_images(State(state): State<AppState>) -> impl IntoResponse {
    match state.status.rescan().await {
        Ok(result) => Json(ApiResponse::success(result)).into_response(),
        Err(e) => e.into_response(),
    }
}

// ========================================
// Uploads
// ========================================

async fn get_upload_queue(State(state): State<AppState>) -> impl IntoResponse {
    let queue = state.status.upload_queue().await;
    Json(ApiResponse::success(json!({
        "count": queue.len(),
        "queue": queue,
    })))
}

async fn force_upload(State(state): State<AppState>) -> impl IntoResponse {
    match state.status.force_upload().await {
        Ok(report) => Json(ApiResponse::success(report)).into_response(),
        Err(e) => e.into_response(),
    }
}

// ========================================
// GPIO
// ========================================

async fn gpio_status(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.status.monitoring().await;
    Json(ApiResponse::success(status))
}

#[derive(Debug, Deserialize)]
struct GpioToggleRequest {
    camera_id: String,
    #[serde(default)]
    enabled: bool,
}

async fn gpio_toggle(
    State(state): State<AppState>,
    Json(req): Json<GpioToggleRequest>,
) -> impl IntoResponse {
    match state.status.toggle_monitoring(&req.camera_id, req.enabled).await {
        Ok(status) => Json(ApiResponse::success(status)).into_response(),
        Err(e) => e.into_response(),
    }
}

// ========================================
// Capture
// ========================================

async fn capture(
    State(state): State<AppState>,
    Path(camera_id): Path<String>,
) -> impl IntoResponse {
    match state.status.capture_now(&camera_id).await {
        Ok(entry) => Json(ApiResponse::success(entry)).into_response(),
        Err(e) => e.into_response(),
    }
}
