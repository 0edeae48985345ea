use axum::{
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use sketchsync_common::protocol::ws::ServerMessage;
use sketchsync_common::types::RoomIdError;
use thiserror::Error;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    InvalidSession,
    MalformedPayload,
    UnknownConnection,
    NotFound,
    InternalError,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidSession => "INVALID_SESSION",
            Self::MalformedPayload => "MALFORMED_PAYLOAD",
            Self::UnknownConnection => "UNKNOWN_CONNECTION",
            Self::NotFound => "NOT_FOUND",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    pub const fn status(self) -> StatusCode {
        match self {
            Self::InvalidSession => StatusCode::CONFLICT,
            Self::MalformedPayload => StatusCode::BAD_REQUEST,
            Self::UnknownConnection => StatusCode::NOT_FOUND,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub const fn retryable(self) -> bool {
        matches!(self, Self::InternalError)
    }

    pub const fn default_message(self) -> &'static str {
        match self {
            Self::InvalidSession => "connection has not joined this room",
            Self::MalformedPayload => "message payload is malformed",
            Self::UnknownConnection => "target connection is not connected",
            Self::NotFound => "requested resource not found",
            Self::InternalError => "internal server error",
        }
    }
}

/// Failures of a single engine operation. Always local to the connection
/// that caused them; the room and other members are unaffected.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    #[error("connection has not joined this room")]
    InvalidSession,

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("target connection is not connected")]
    UnknownConnection,
}

impl SyncError {
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidSession => ErrorCode::InvalidSession,
            Self::MalformedPayload(_) => ErrorCode::MalformedPayload,
            Self::UnknownConnection => ErrorCode::UnknownConnection,
        }
    }

    /// The `error` frame reported back to the offending connection.
    pub fn to_message(&self) -> ServerMessage {
        let code = self.code();
        ServerMessage::Error {
            code: code.as_str().to_string(),
            message: self.to_string(),
            retryable: code.retryable(),
        }
    }
}

impl From<RoomIdError> for SyncError {
    fn from(error: RoomIdError) -> Self {
        Self::MalformedPayload(error.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(error: serde_json::Error) -> Self {
        Self::MalformedPayload(error.to_string())
    }
}

/// JSON error envelope for the HTTP surface.
#[derive(Debug, Clone)]
pub struct RelayError {
    code: ErrorCode,
    message: String,
    details: Value,
    request_id: Option<String>,
}

impl RelayError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), details: json!({}), request_id: None }
    }

    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, code.default_message())
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let mut response = (
            self.code.status(),
            Json(json!({
                "error": {
                    "code": self.code.as_str(),
                    "message": self.message,
                    "retryable": self.code.retryable(),
                    "request_id": self.request_id.clone(),
                    "details": self.details,
                }
            })),
        )
            .into_response();

        if let Some(request_id) = self.request_id {
            if let Ok(header) = HeaderValue::from_str(&request_id) {
                response.headers_mut().insert(REQUEST_ID_HEADER, header);
            }
        }

        response
    }
}

#[cfg(test)]
mod tests {
    use axum::{body::to_bytes, http::StatusCode, response::IntoResponse};
    use serde_json::Value;
    use sketchsync_common::protocol::ws::ServerMessage;
    use sketchsync_common::types::RoomIdError;

    use super::{ErrorCode, RelayError, SyncError};

    async fn body_json(error: RelayError) -> (StatusCode, Value) {
        let response = error.into_response();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("error response body should be readable");
        (status, serde_json::from_slice(&body).expect("error response body should be valid json"))
    }

    #[tokio::test]
    async fn not_found_envelope_has_registry_fields() {
        let (status, parsed) = body_json(RelayError::from_code(ErrorCode::NotFound)).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(parsed["error"]["code"], "NOT_FOUND");
        assert_eq!(parsed["error"]["retryable"], false);
        assert_eq!(parsed["error"]["details"], serde_json::json!({}));
    }

    #[tokio::test]
    async fn explicit_request_id_and_details_are_preserved() {
        let (_, parsed) = body_json(
            RelayError::new(ErrorCode::MalformedPayload, "bad room id")
                .with_details(serde_json::json!({ "field": "roomId" }))
                .with_request_id("req-123"),
        )
        .await;

        assert_eq!(parsed["error"]["request_id"], "req-123");
        assert_eq!(parsed["error"]["details"]["field"], "roomId");
        assert_eq!(parsed["error"]["message"], "bad room id");
    }

    #[test]
    fn sync_errors_map_to_error_frames() {
        match SyncError::InvalidSession.to_message() {
            ServerMessage::Error { code, retryable, .. } => {
                assert_eq!(code, "INVALID_SESSION");
                assert!(!retryable);
            }
            other => panic!("expected error frame, got {other:?}"),
        }

        let malformed = SyncError::from(RoomIdError::Empty);
        assert_eq!(malformed.code(), ErrorCode::MalformedPayload);
        assert_eq!(malformed.to_string(), "malformed payload: room id is empty");
    }
}
