use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Request-level failures.  Sink failures never become one of these; they are folded into the
/// per-sink results instead.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error=%self, "request failed");
        }
        let body = Json(json!({ "status": "error", "message": self.to_string() }));
        (status, body).into_response()
    }
}

/// Everything that can go wrong while delivering to one downstream sink.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("not configured: {0}")]
    NotConfigured(&'static str),
    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("timed out after {0}s")]
    Timeout(u64),
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("unexpected response: {0}")]
    Response(String),
    #[error("{0}")]
    Rejected(String),
}

impl SinkError {
    /// Builds a `Status` error, keeping only the head of the body so logs stay readable.
    pub fn status(status: reqwest::StatusCode, body: &str) -> Self {
        SinkError::Status {
            status: status.as_u16(),
            body: body.chars().take(200).collect(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var} is invalid: {reason}")]
    Invalid { var: &'static str, reason: String },
}
