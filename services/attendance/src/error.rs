use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use std::fmt::Display;
use thiserror::Error;

/// Per-request failure surfaced to the HTTP caller as a JSON envelope
#[derive(Error, Debug)]
pub enum ApiError {
    /// Malformed client input
    #[error("{0}")]
    BadRequest(String),

    /// Inference service unreachable, non-success, or undecodable
    #[error("{0}")]
    BadGateway(String),

    /// Local persistence failure
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn bad_request(context: &str, cause: impl Display) -> Self {
        Self::BadRequest(format!("{}: {}", context, cause))
    }

    pub fn bad_gateway(context: &str, cause: impl Display) -> Self {
        Self::BadGateway(format!("{}: {}", context, cause))
    }

    pub fn internal(context: &str, cause: impl Display) -> Self {
        Self::Internal(format!("{}: {}", context, cause))
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        (
            status,
            Json(serde_json::json!({
                "status": "error",
                "message": self.to_string(),
            })),
        )
            .into_response()
    }
}
