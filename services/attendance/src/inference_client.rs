use crate::config::InferenceConfig;
use crate::record_store::OwnerId;
use crate::resolution::InferenceResult;
use crate::upload::UploadedFile;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use tracing::{debug, info, instrument, warn};

/// Errors talking to the inference service
#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    /// Request construction, transport, or body read failure
    #[error("relay request failed: {0}")]
    Relay(#[from] reqwest::Error),

    #[error("unexpected status: {0}")]
    UnexpectedStatus(StatusCode),

    #[error("decoding response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Raw response returned by the prediction endpoint
#[derive(Debug, Clone)]
pub struct RelayResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl RelayResponse {
    /// Body as text, with invalid UTF-8 replaced
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Capabilities of the downstream inference service
#[async_trait]
pub trait InferenceService: Send + Sync {
    /// Forward a frame set for prediction; returns whatever the service answered
    async fn submit_frames(&self, files: &[UploadedFile]) -> Result<RelayResponse, InferenceError>;

    /// Fetch the current attendance result
    async fn poll_result(&self) -> Result<InferenceResult, InferenceError>;

    /// Tell the service an owner finished registration
    async fn notify_registered(&self, owner_id: OwnerId) -> Result<(), InferenceError>;
}

/// HTTP client for the inference service.
///
/// One outbound request per call, no retries. The underlying reqwest client
/// pools connections and is shared across requests.
pub struct InferenceClient {
    http: Client,
    config: InferenceConfig,
}

impl InferenceClient {
    /// Create a new inference client
    pub fn new(config: &InferenceConfig) -> Result<Self, InferenceError> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.request_timeout() {
            builder = builder.timeout(timeout);
        }
        let http = builder.build()?;

        info!(
            prediction_url = %config.prediction_url,
            frame_status_url = %config.frame_status_url,
            "Inference client initialized"
        );

        Ok(Self {
            http,
            config: config.clone(),
        })
    }

    /// Build the outbound multipart body, one part per file under the frame field
    fn build_form(&self, files: &[UploadedFile]) -> Result<Form, InferenceError> {
        let mut form = Form::new();

        for file in files {
            let part = Part::bytes(file.data.to_vec())
                .file_name(file.file_name.clone())
                .mime_str("application/octet-stream")?;
            form = form.part(self.config.frame_field.clone(), part);
        }

        Ok(form)
    }
}

#[async_trait]
impl InferenceService for InferenceClient {
    #[instrument(skip(self, files), fields(frame_count = files.len()))]
    async fn submit_frames(&self, files: &[UploadedFile]) -> Result<RelayResponse, InferenceError> {
        metrics::counter!("attendance.relay.requests").increment(1);

        let result = async {
            let form = self.build_form(files)?;
            let request = self.http.post(&self.config.prediction_url);
            let request = if files.is_empty() {
                // reqwest streams nothing for a part-less form; send the closing delimiter
                let boundary = form.boundary().to_string();
                request
                    .header(
                        CONTENT_TYPE,
                        format!("multipart/form-data; boundary={}", boundary),
                    )
                    .body(format!("--{}--\r\n", boundary))
            } else {
                request.multipart(form)
            };
            let response = request.send().await?;

            let status = response.status();
            let headers = response.headers().clone();
            let body = response.bytes().await?;

            Ok::<_, InferenceError>(RelayResponse {
                status,
                headers,
                body,
            })
        }
        .await;

        match &result {
            Ok(response) => debug!(
                status = %response.status,
                body_size = response.body.len(),
                "Frames relayed"
            ),
            Err(e) => {
                warn!(error = %e, "Frame relay failed");
                metrics::counter!("attendance.relay.failed").increment(1);
            }
        }

        result
    }

    #[instrument(skip(self))]
    async fn poll_result(&self) -> Result<InferenceResult, InferenceError> {
        let response = self.http.get(&self.config.frame_status_url).send().await?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(InferenceError::UnexpectedStatus(status));
        }

        let body = response.bytes().await?;
        let result: InferenceResult = serde_json::from_slice(&body)?;

        debug!(
            user_id = result.user_id,
            confidence_score = result.confidence_score,
            "Poll result received"
        );

        Ok(result)
    }

    #[instrument(skip(self))]
    async fn notify_registered(&self, owner_id: OwnerId) -> Result<(), InferenceError> {
        let response = self
            .http
            .post(&self.config.success_url)
            .json(&serde_json::json!({ "user_id": owner_id }))
            .send()
            .await?;

        // Only transport failures count; the status is informational
        if !response.status().is_success() {
            warn!(status = %response.status(), "Registration notification not accepted");
        }

        Ok(())
    }
}
