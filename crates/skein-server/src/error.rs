use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use skein_core::ThreadError;
use skein_shared::token::TokenError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("Not permitted: {0}")]
    NotPermitted(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ThreadError> for ServerError {
    fn from(e: ThreadError) -> Self {
        match e {
            ThreadError::ThreadNotFound(_) | ThreadError::NotFound(_) => {
                Self::NotFound(e.to_string())
            }
            ThreadError::KeyInUse(_) | ThreadError::AlreadyMember(_) | ThreadError::CausalGap { .. } => {
                Self::Conflict(e.to_string())
            }
            ThreadError::NotPermitted(msg) => Self::NotPermitted(msg),
            ThreadError::Decode(_)
            | ThreadError::UnknownAuthor(_)
            | ThreadError::InvalidBlock(_)
            | ThreadError::MissingContact
            | ThreadError::Invite(_) => Self::BadRequest(e.to_string()),
            ThreadError::Storage(msg) => Self::Storage(msg),
            ThreadError::Index(_) | ThreadError::IndexLock => Self::Internal(e.to_string()),
        }
    }
}

impl From<TokenError> for ServerError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::NoToken | TokenError::Expired => Self::Unauthorized,
            TokenError::Invalid => Self::Forbidden,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::PayloadTooLarge { .. } => {
                (StatusCode::PAYLOAD_TOO_LARGE, self.to_string())
            }
            ServerError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),
            ServerError::Forbidden | ServerError::NotPermitted(_) => {
                (StatusCode::FORBIDDEN, self.to_string())
            }
            ServerError::Conflict(_) => (StatusCode::CONFLICT, self.to_string()),
            ServerError::Storage(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Storage error".to_string())
            }
            ServerError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}
