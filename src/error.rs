//! Error taxonomy shared by the messaging core, the WebSocket protocol and the
//! REST glue.
//!
//! Handler errors never tear down a session: they are converted into a failure
//! acknowledgment (`{success: false, msg, reason}`) for the WebSocket caller or
//! into a JSON error response for REST callers.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// No authenticated identity on a privileged operation.
    #[error("Unauthorized")]
    Unauthorized,

    /// Authenticated, but the caller may not perform this action.
    #[error("{0}")]
    Forbidden(String),

    /// Referenced conversation, message or user does not exist.
    #[error("{0}")]
    NotFound(String),

    /// Malformed or incomplete request payload.
    #[error("{0}")]
    Invalid(String),

    /// Store or push provider unavailable or timed out.
    #[error("{0}")]
    Transient(String),
}

pub type Result<T> = std::result::Result<T, GatewayError>;

impl GatewayError {
    /// Stable machine-readable code sent alongside the human message.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::NotFound(_) => "not_found",
            Self::Invalid(_) => "invalid",
            Self::Transient(_) => "transient",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Invalid(_) => StatusCode::BAD_REQUEST,
            Self::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Failure body shared by acks and REST responses.
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "success": false,
            "msg": self.to_string(),
            "reason": self.reason(),
        })
    }
}

impl From<rusqlite::Error> for GatewayError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::QueryReturnedNoRows => Self::NotFound("Not found".to_string()),
            other => Self::Transient(format!("Store error: {}", other)),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        if let Self::Transient(msg) = &self {
            tracing::warn!(error = %msg, "Request failed on a collaborator");
        }
        (self.status(), Json(self.to_json())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_body_carries_reason_and_msg() {
        let body = GatewayError::NotFound("Conversation not found".into()).to_json();
        assert_eq!(body["success"], false);
        assert_eq!(body["msg"], "Conversation not found");
        assert_eq!(body["reason"], "not_found");
    }

    #[test]
    fn test_no_rows_maps_to_not_found() {
        let err: GatewayError = rusqlite::Error::QueryReturnedNoRows.into();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }
}
