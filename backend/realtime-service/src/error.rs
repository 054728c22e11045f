use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("server start failure: {0}")]
    StartServer(String),

    #[error("malformed frame: {0}")]
    Protocol(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("not a member of this conversation")]
    NotMember,

    #[error("{message}")]
    Forbidden {
        code: &'static str,
        message: String,
    },

    #[error("{message}")]
    Validation {
        code: &'static str,
        message: String,
    },

    #[error("not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("broker unavailable: {0}")]
    Broker(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl AppError {
    pub fn validation(code: &'static str, message: impl Into<String>) -> Self {
        AppError::Validation {
            code,
            message: message.into(),
        }
    }

    pub fn forbidden(code: &'static str, message: impl Into<String>) -> Self {
        AppError::Forbidden {
            code,
            message: message.into(),
        }
    }

    /// Error code carried in ERROR frames and REST bodies.
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Config(_) => "CONFIG",
            AppError::StartServer(_) => "START_FAILED",
            AppError::Protocol(_) => "PROTOCOL",
            AppError::Unauthorized => "UNAUTHORIZED",
            AppError::NotMember => "NOT_MEMBER",
            AppError::Forbidden { code, .. } => code,
            AppError::Validation { code, .. } => code,
            AppError::NotFound => "NOT_FOUND",
            AppError::Conflict(_) => "CONFLICT",
            AppError::Broker(_) => "BROKER_UNAVAILABLE",
            AppError::Database(_) => "INTERNAL",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Protocol(_) | AppError::Validation { .. } => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::NotMember | AppError::Forbidden { .. } => StatusCode::FORBIDDEN,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Broker(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Config(_) | AppError::StartServer(_) | AppError::Database(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        // Internal details stay in the logs, not in responses.
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "request failed");
            "internal server error".to_string()
        } else {
            self.to_string()
        };
        let body = Json(serde_json::json!({
            "code": self.error_code(),
            "message": message,
        }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes() {
        assert_eq!(AppError::Unauthorized.status_code().as_u16(), 401);
        assert_eq!(AppError::NotMember.status_code().as_u16(), 403);
        assert_eq!(AppError::NotFound.status_code().as_u16(), 404);
        assert_eq!(
            AppError::validation("INVALID_BODY", "bad").status_code().as_u16(),
            400
        );
        assert_eq!(AppError::Conflict("dup".into()).status_code().as_u16(), 409);
    }

    #[test]
    fn forbidden_carries_frame_code_and_maps_to_403() {
        let err = AppError::forbidden("EDIT_DENIED", "only the sender can edit");
        assert_eq!(err.error_code(), "EDIT_DENIED");
        assert_eq!(err.status_code().as_u16(), 403);
    }

    #[test]
    fn validation_carries_frame_code() {
        let err = AppError::validation("INVALID_MEDIA", "media asset required");
        assert_eq!(err.error_code(), "INVALID_MEDIA");
        assert_eq!(err.to_string(), "media asset required");
    }
}
