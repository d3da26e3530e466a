//! Error types for the surge proxy.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use surge_core::AdmissionError;

/// Proxy error types
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// Request could not be parsed
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The scheduler refused the admission
    #[error("Admission rejected: {0}")]
    Admission(#[from] AdmissionError),

    /// The backend call failed before a response arrived
    #[error("Backend request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The unit was discarded without reaching a backend
    #[error("Request dropped: {0}")]
    Dropped(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ProxyError {
    /// HTTP status reported to the caller
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ProxyError::Admission(_) => StatusCode::BAD_REQUEST,
            ProxyError::Transport(_) => StatusCode::BAD_GATEWAY,
            ProxyError::Dropped(_) => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::Serialization(_) => StatusCode::BAD_REQUEST,
            ProxyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short machine-readable error type
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::InvalidRequest(_) => "InvalidRequest",
            ProxyError::Admission(_) => "AdmissionRejected",
            ProxyError::Transport(_) => "BackendFailure",
            ProxyError::Dropped(_) => "Dropped",
            ProxyError::Serialization(_) => "Serialization",
            ProxyError::Internal(_) => "Internal",
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "message": self.to_string(),
                "type": self.kind(),
            }
        }));

        (self.status(), body).into_response()
    }
}
