//! Mapping of library errors onto HTTP responses.
//!
//! Every failure body is `{"error": "..."}`. Upstream details are logged and
//! replaced by a generic message so end users only ever see "try again" or
//! "fix your question".

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::{error, warn};

use crate::error::CrewError;

/// Shown when retries ran out or the request was cut short.
pub const UNAVAILABLE_MESSAGE: &str =
    "The contract assistant is temporarily unavailable. Please try again shortly.";

/// Shown when the upstream model refused the request outright.
pub const UPSTREAM_FAILED_MESSAGE: &str = "The contract assistant could not answer this question.";

const INTERNAL_MESSAGE: &str = "Internal server error.";

/// A [`CrewError`] on its way out of a handler.
#[derive(Debug)]
pub struct ApiError(pub CrewError);

impl From<CrewError> for ApiError {
    fn from(e: CrewError) -> Self {
        Self(e)
    }
}

/// HTTP status for a library error.
pub fn status_for(err: &CrewError) -> StatusCode {
    match err {
        CrewError::Validation(_) => StatusCode::BAD_REQUEST,
        CrewError::RetryExhausted { .. } | CrewError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        CrewError::Provider(_) => StatusCode::BAD_GATEWAY,
        CrewError::Config(_)
        | CrewError::CacheLookup(_)
        | CrewError::CacheStore(_)
        | CrewError::Io(_)
        | CrewError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// `(status, {"error": message})` response.
pub fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        let message = match &self.0 {
            CrewError::Validation(msg) => msg.clone(),
            CrewError::RetryExhausted { .. } | CrewError::Cancelled => {
                warn!(error = %self.0, "Chat request failed: upstream unavailable");
                UNAVAILABLE_MESSAGE.to_string()
            }
            CrewError::Provider(_) => {
                warn!(error = %self.0, "Chat request failed: upstream rejected");
                UPSTREAM_FAILED_MESSAGE.to_string()
            }
            other => {
                error!(error = %other, "Chat request failed: internal error");
                INTERNAL_MESSAGE.to_string()
            }
        };
        error_response(status, message)
    }
}
