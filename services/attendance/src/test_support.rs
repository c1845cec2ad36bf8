//! Shared fixtures for handler and client tests: a stub inference service
//! bound to a local port and an in-memory record store.

use crate::record_store::{FrameId, OwnerId, RecordStore, StoreError};
use async_trait::async_trait;
use axum::extract::{Multipart, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// One multipart part received by the stub
#[derive(Debug, Clone)]
pub struct SubmittedPart {
    pub field: String,
    pub file_name: Option<String>,
    pub data: Bytes,
}

/// One prediction request received by the stub
#[derive(Debug, Clone)]
pub struct Submission {
    pub content_type: String,
    pub parts: Vec<SubmittedPart>,
    /// Multipart parse failure that ended the read, if any
    pub parse_error: Option<String>,
}

struct StubState {
    submissions: Mutex<Vec<Submission>>,
    notifications: Mutex<Vec<serde_json::Value>>,
    prediction: Mutex<(StatusCode, String)>,
    poll: Mutex<(StatusCode, String)>,
    notify_status: Mutex<StatusCode>,
}

/// Stub inference service serving `/predict`, `/frame-status` and `/success`
pub struct StubInference {
    base_url: String,
    state: Arc<StubState>,
    handle: JoinHandle<()>,
}

impl StubInference {
    pub async fn spawn() -> Self {
        let state = Arc::new(StubState {
            submissions: Mutex::new(Vec::new()),
            notifications: Mutex::new(Vec::new()),
            prediction: Mutex::new((StatusCode::OK, r#"{"status":"received"}"#.to_string())),
            poll: Mutex::new((
                StatusCode::OK,
                r#"{"user_id":0,"confidence_score":0.0}"#.to_string(),
            )),
            notify_status: Mutex::new(StatusCode::OK),
        });

        let app = Router::new()
            .route("/predict", post(predict))
            .route("/frame-status", get(frame_status))
            .route("/success", post(success))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{}", addr),
            state,
            handle,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn set_prediction(&self, status: StatusCode, body: &str) {
        *self.state.prediction.lock() = (status, body.to_string());
    }

    pub fn set_poll(&self, status: StatusCode, body: &str) {
        *self.state.poll.lock() = (status, body.to_string());
    }

    pub fn set_notify_status(&self, status: StatusCode) {
        *self.state.notify_status.lock() = status;
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.state.submissions.lock().clone()
    }

    pub fn notifications(&self) -> Vec<serde_json::Value> {
        self.state.notifications.lock().clone()
    }
}

impl Drop for StubInference {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn predict(
    State(state): State<Arc<StubState>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> impl IntoResponse {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let mut parts = Vec::new();
    let mut parse_error = None;
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                parse_error = Some(e.to_string());
                break;
            }
        };

        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(str::to_string);
        match field.bytes().await {
            Ok(data) => parts.push(SubmittedPart {
                field: name,
                file_name,
                data,
            }),
            Err(e) => {
                parse_error = Some(e.to_string());
                break;
            }
        }
    }

    state.submissions.lock().push(Submission {
        content_type,
        parts,
        parse_error,
    });

    state.prediction.lock().clone()
}

async fn frame_status(State(state): State<Arc<StubState>>) -> impl IntoResponse {
    state.poll.lock().clone()
}

async fn success(
    State(state): State<Arc<StubState>>,
    Json(body): Json<serde_json::Value>,
) -> impl IntoResponse {
    state.notifications.lock().push(body);
    *state.notify_status.lock()
}

/// URL of a local port with nothing listening
pub async fn closed_port_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}

/// In-memory record store keeping writes in arrival order
#[derive(Default)]
pub struct RecordingStore {
    owners: Mutex<Vec<OwnerId>>,
    frames: Mutex<Vec<(OwnerId, Vec<u8>)>>,
    /// Zero-based frame write that fails, if any
    fail_frame_at: Option<usize>,
    frame_attempts: Mutex<usize>,
}

impl RecordingStore {
    pub fn failing_frame_at(index: usize) -> Self {
        Self {
            fail_frame_at: Some(index),
            ..Default::default()
        }
    }

    pub fn owners(&self) -> Vec<OwnerId> {
        self.owners.lock().clone()
    }

    pub fn frames(&self) -> Vec<(OwnerId, Vec<u8>)> {
        self.frames.lock().clone()
    }
}

#[async_trait]
impl RecordStore for RecordingStore {
    async fn create_owner(&self, owner_id: OwnerId) -> Result<(), StoreError> {
        let mut owners = self.owners.lock();
        if owners.contains(&owner_id) {
            return Err(StoreError::Database(sqlx::Error::Protocol(
                "duplicate key value violates unique constraint \"users_pkey\"".to_string(),
            )));
        }
        owners.push(owner_id);
        Ok(())
    }

    async fn create_frame(&self, owner_id: OwnerId, payload: &[u8]) -> Result<FrameId, StoreError> {
        let attempt = {
            let mut attempts = self.frame_attempts.lock();
            let attempt = *attempts;
            *attempts += 1;
            attempt
        };

        if self.fail_frame_at == Some(attempt) {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }

        let mut frames = self.frames.lock();
        frames.push((owner_id, payload.to_vec()));
        Ok(frames.len() as FrameId)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
