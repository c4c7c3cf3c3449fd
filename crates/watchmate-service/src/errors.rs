//! Watchmate error types.
//!
//! Errors map to HTTP status codes via the `IntoResponse` impl and to
//! `error` events on the WebSocket surface via [`PartyError::error_code`]
//! and [`PartyError::client_message`]. Internal details are logged
//! server-side but not exposed to clients.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Watchmate error type.
///
/// Maps to HTTP status codes:
/// - `Validation`: 400 Bad Request
/// - `Unauthorized`: 401 Unauthorized
/// - `RoomNotFound`: 404 Not Found
/// - `Conflict`: 409 Conflict
/// - `Internal`: 500 Internal Server Error
/// - `CapacityExceeded`, `Draining`: 503 Service Unavailable
#[derive(Debug, Error)]
pub enum PartyError {
    /// Unknown room code on lookup, join or verify.
    #[error("Room not found")]
    RoomNotFound,

    /// Password mismatch on a private room, or a host-only action from a non-host.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Missing or malformed required field.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Request conflicts with current state (e.g. connection already joined).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The room registry is full.
    #[error("Room capacity exceeded")]
    CapacityExceeded,

    /// The service is shutting down.
    #[error("Service is draining")]
    Draining,

    /// Internal error (actor channel failure, RNG failure, hashing failure).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PartyError {
    /// Returns the HTTP status code for this error.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            PartyError::Validation(_) => StatusCode::BAD_REQUEST,
            PartyError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            PartyError::RoomNotFound => StatusCode::NOT_FOUND,
            PartyError::Conflict(_) => StatusCode::CONFLICT,
            PartyError::CapacityExceeded | PartyError::Draining => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            PartyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the stable error code string sent to clients.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            PartyError::RoomNotFound => "ROOM_NOT_FOUND",
            PartyError::Unauthorized(_) => "UNAUTHORIZED",
            PartyError::Validation(_) => "VALIDATION_ERROR",
            PartyError::Conflict(_) => "CONFLICT",
            PartyError::CapacityExceeded => "CAPACITY_EXCEEDED",
            PartyError::Draining => "SERVICE_UNAVAILABLE",
            PartyError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            PartyError::RoomNotFound => "Room not found".to_string(),
            PartyError::Unauthorized(msg)
            | PartyError::Validation(msg)
            | PartyError::Conflict(msg) => msg.clone(),
            PartyError::CapacityExceeded => {
                "Server is at capacity, please try again later".to_string()
            }
            PartyError::Draining => "Server is shutting down, please reconnect".to_string(),
            PartyError::Internal(_) => "An internal error occurred".to_string(),
        }
    }

    /// Short label for metrics (bounded cardinality).
    #[must_use]
    pub fn metric_label(&self) -> &'static str {
        match self {
            PartyError::RoomNotFound => "not_found",
            PartyError::Unauthorized(_) => "unauthorized",
            PartyError::Validation(_) => "validation",
            PartyError::Conflict(_) => "conflict",
            PartyError::CapacityExceeded => "capacity",
            PartyError::Draining => "draining",
            PartyError::Internal(_) => "internal",
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for PartyError {
    fn into_response(self) -> Response {
        match &self {
            PartyError::Internal(err) => {
                // Log actual error server-side, return generic message to client
                tracing::error!(target: "wm.errors", error = %err, "Internal error");
            }
            PartyError::Draining | PartyError::CapacityExceeded => {
                tracing::warn!(target: "wm.errors", error = %self, "Service unavailable");
            }
            _ => {}
        }

        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.error_code().to_string(),
                message: self.client_message(),
            },
        };

        (self.status_code(), Json(body)).into_response()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http_body_util::BodyExt;

    async fn read_body_json(body: Body) -> serde_json::Value {
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_status_code_mapping() {
        assert_eq!(
            PartyError::Validation("x".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            PartyError::Unauthorized("x".to_string()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(PartyError::RoomNotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            PartyError::Conflict("x".to_string()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            PartyError::CapacityExceeded.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            PartyError::Draining.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            PartyError::Internal("boom".to_string()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_client_message_hides_internal_details() {
        let error = PartyError::Internal("channel send failed: closed".to_string());
        assert_eq!(error.client_message(), "An internal error occurred");
        assert!(!error.client_message().contains("channel"));
    }

    #[test]
    fn test_client_message_passes_through_user_facing_reasons() {
        let error = PartyError::Unauthorized("Only the host can change the video".to_string());
        assert_eq!(error.client_message(), "Only the host can change the video");
        assert_eq!(error.error_code(), "UNAUTHORIZED");
    }

    #[tokio::test]
    async fn test_into_response_not_found() {
        let response = PartyError::RoomNotFound.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = read_body_json(response.into_body()).await;
        assert_eq!(body["error"]["code"], "ROOM_NOT_FOUND");
        assert_eq!(body["error"]["message"], "Room not found");
    }

    #[tokio::test]
    async fn test_into_response_internal_is_generic() {
        let response = PartyError::Internal("RNG failure".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = read_body_json(response.into_body()).await;
        assert_eq!(body["error"]["code"], "INTERNAL_ERROR");
        assert_eq!(body["error"]["message"], "An internal error occurred");
    }
}
