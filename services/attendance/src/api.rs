use crate::config::ApiConfig;
use crate::error::ApiError;
use crate::inference_client::InferenceService;
use crate::record_store::{OwnerId, RecordStore};
use crate::resolution::{classify, Resolution};
use crate::upload::UploadForm;
use anyhow::{Context, Result};
use axum::{
    extract::{multipart::MultipartRejection, DefaultBodyLimit, Multipart, Path, State},
    http::{HeaderValue, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument, warn};

/// Multipart field carrying frames on the attendance path
const FRAMES_FIELD: &str = "frames";
/// Multipart field carrying images on the registration path
const IMAGES_FIELD: &str = "images";
/// Form field carrying the owner id on the registration path
const USER_ID_FIELD: &str = "user_id";

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn RecordStore>,
    pub inference: Arc<dyn InferenceService>,
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        let cors = CorsLayer::new()
            .allow_methods([
                axum::http::Method::GET,
                axum::http::Method::POST,
                axum::http::Method::OPTIONS,
            ])
            .allow_headers([
                axum::http::header::ORIGIN,
                axum::http::header::CONTENT_TYPE,
                axum::http::header::ACCEPT,
            ]);
        if config.cors_origins.is_empty() {
            cors.allow_origin(Any)
        } else {
            let origins: Vec<HeaderValue> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            cors.allow_origin(origins)
        }
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/", get(index))
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/:device/attendance/new", post(new_attendance))
        .route("/:device/attendance/pending", get(pending_attendance))
        .route("/register", post(register))
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Welcome and route listing
async fn index() -> impl IntoResponse {
    Json(json!({
        "message": "Welcome to the attendance service",
        "routes": {
            "/health": "health check",
            "/ready": "database readiness check",
            "/register": "register a user with reference images",
            "/:device/attendance/new": "submit frames for attendance",
            "/:device/attendance/pending": "poll the pending attendance result",
        }
    }))
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(json!({ "status": "success" }))
}

/// Readiness check endpoint
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "status": "ready",
                "database": "connected"
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "not_ready",
                "database": "disconnected",
                "error": e.to_string()
            })),
        ),
    }
}

/// Relay submitted frames to the inference service and echo its answer
#[instrument(skip(state, multipart))]
async fn new_attendance(
    State(state): State<AppState>,
    Path(device): Path<String>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<Value>, ApiError> {
    let multipart =
        multipart.map_err(|e| ApiError::bad_request("Failed to parse multipart form data", e))?;
    let mut form = UploadForm::read(multipart).await?;

    // No minimum: an empty set is relayed as-is
    let frames = form.take_files(FRAMES_FIELD);
    info!(frame_count = frames.len(), "Relaying attendance frames");

    let response = state.inference.submit_frames(&frames).await.map_err(|e| {
        error!(error = %e, "Failed to send frames to inference service");
        ApiError::bad_gateway("Failed to send frames to inference service", e)
    })?;

    info!(
        status = %response.status,
        content_type = response
            .headers
            .get(axum::http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown"),
        "Inference service answered"
    );

    Ok(Json(json!({
        "status": "success",
        "mms_response": response.body_text(),
    })))
}

/// Ask the inference service whether the pending attendance is resolved
#[instrument(skip(state))]
async fn pending_attendance(
    State(state): State<AppState>,
    Path(device): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let result = state.inference.poll_result().await.map_err(|e| {
        error!(error = %e, "Failed to read inference service response");
        ApiError::bad_gateway("Failed to read inference service response", e)
    })?;

    let response = match classify(&result) {
        Resolution::Resolved {
            owner_id,
            confidence,
        } => {
            info!(user_id = owner_id, confidence = confidence, "Attendance resolved");
            metrics::counter!("attendance.poll.resolved").increment(1);
            (
                StatusCode::OK,
                Json(json!({
                    "status": "success",
                    "user_id": owner_id,
                })),
            )
        }
        Resolution::Pending => {
            metrics::counter!("attendance.poll.pending").increment(1);
            (
                StatusCode::ACCEPTED,
                Json(json!({
                    "status": "pending",
                    "message": "user_id not available yet, please try again later",
                })),
            )
        }
    };

    Ok(response)
}

/// Register an owner and persist its reference images.
///
/// Writes are not transactional: the owner row survives a missing image set,
/// and frames persisted before a failing one stay persisted.
#[instrument(skip(state, multipart))]
async fn register(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<Value>, ApiError> {
    let multipart =
        multipart.map_err(|e| ApiError::bad_request("Failed to parse multipart form data", e))?;
    let mut form = UploadForm::read(multipart).await?;

    let raw_user_id = form.text(USER_ID_FIELD).unwrap_or_default().to_string();
    info!(user_id_raw = %raw_user_id, "Received registration request");

    let owner_id = parse_owner_id(&raw_user_id)?;

    state.store.create_owner(owner_id).await.map_err(|e| {
        error!(error = %e, user_id = owner_id, "Failed to insert user");
        ApiError::internal("Failed to insert user", e)
    })?;
    info!(user_id = owner_id, "User inserted successfully");

    let images = form.take_files(IMAGES_FIELD);
    if images.is_empty() {
        warn!(user_id = owner_id, "No frames found in form data");
        return Err(ApiError::BadRequest("No frames found".to_string()));
    }

    info!(frame_count = images.len(), user_id = owner_id, "Received image frames");

    for (index, image) in images.iter().enumerate() {
        let frame_id = state
            .store
            .create_frame(owner_id, &image.data)
            .await
            .map_err(|e| {
                error!(
                    error = %e,
                    file_name = %image.file_name,
                    frame_index = index,
                    "Failed to save frame to database"
                );
                ApiError::internal("Failed to save frame", e)
            })?;

        info!(
            user_id = owner_id,
            frame_id = frame_id,
            frame_index = index,
            frame_size = image.len(),
            content_type = image.content_type.as_deref().unwrap_or("unknown"),
            "Frame saved to DB successfully"
        );
    }

    // Reported to the caller as a gateway error; persisted rows stay
    state
        .inference
        .notify_registered(owner_id)
        .await
        .map_err(|e| {
            error!(error = %e, user_id = owner_id, "Error sending request to inference service");
            ApiError::bad_gateway("Failed to notify inference service", e)
        })?;
    info!(user_id = owner_id, "Inference service notified successfully");

    Ok(Json(json!({ "status": "success" })))
}

/// Parse the caller-supplied owner id
fn parse_owner_id(raw: &str) -> Result<OwnerId, ApiError> {
    raw.parse::<OwnerId>().map_err(|e| {
        error!(error = %e, user_id_raw = %raw, "Invalid user_id format");
        ApiError::bad_request("Invalid user_id", e)
    })
}

/// Start the device API server, stopping when `shutdown` resolves
pub async fn start_api_server(
    state: AppState,
    config: &ApiConfig,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting attendance API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .context("API server error")?;

    Ok(())
}
