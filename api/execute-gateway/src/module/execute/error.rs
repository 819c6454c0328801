use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecuteError {
    #[error("invalid endpoint: the receiving subnet endpoint is unreachable")]
    InvalidEndpoint,

    #[error("invalid private key: the configured signing key could not be loaded")]
    InvalidPrivateKey,

    #[error("invalid contract: no executor contract deployed at the given address")]
    InvalidContract,

    #[error("job not found")]
    JobNotFound,

    #[error("redis not available: queue backend never became ready")]
    RedisNotAvailable,

    #[error("enqueue failed: {0}")]
    EnqueueFailed(String),

    #[error("queue error: {0}")]
    Queue(String),
}

impl ExecuteError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidEndpoint => "INVALID_ENDPOINT",
            Self::InvalidPrivateKey => "INVALID_PRIVATE_KEY",
            Self::InvalidContract => "INVALID_CONTRACT",
            Self::JobNotFound => "JOB_NOT_FOUND",
            Self::RedisNotAvailable => "REDIS_NOT_AVAILABLE",
            Self::EnqueueFailed(_) => "ENQUEUE_FAILED",
            Self::Queue(_) => "QUEUE_ERROR",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl AppError {
    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code,
            message: message.into(),
        }
    }

    pub fn not_found(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            code,
            message: message.into(),
        }
    }

    pub fn unavailable(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            code,
            message: message.into(),
        }
    }

    pub fn internal(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code,
            message: message.into(),
        }
    }
}

impl From<ExecuteError> for AppError {
    fn from(err: ExecuteError) -> Self {
        let code = err.code();
        let message = err.to_string();
        match err {
            ExecuteError::InvalidEndpoint
            | ExecuteError::InvalidPrivateKey
            | ExecuteError::InvalidContract => Self::bad_request(code, message),
            ExecuteError::JobNotFound => Self::not_found(code, message),
            ExecuteError::RedisNotAvailable => Self::unavailable(code, message),
            ExecuteError::EnqueueFailed(_) | ExecuteError::Queue(_) => {
                Self::internal(code, message)
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = json!({
            "error_code": self.code,
            "reason": self.message,
        });
        (self.status, Json(body)).into_response()
    }
}
