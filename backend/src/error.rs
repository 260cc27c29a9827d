use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use shared::ErrorResponse;

#[derive(Debug, thiserror::Error)]
pub enum DetectionError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Inference service unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("Inference service timed out after {0}s")]
    ServiceTimeout(u64),
    #[error("Inference failed with upstream status {status}: {message}")]
    InferenceFailure { status: u16, message: String },
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Persistence error: {0}")]
    Persistence(String),
}

pub type Result<T> = std::result::Result<T, DetectionError>;

impl ResponseError for DetectionError {
    fn status_code(&self) -> StatusCode {
        match self {
            DetectionError::Validation(_) | DetectionError::InvalidState(_) => {
                StatusCode::BAD_REQUEST
            }
            DetectionError::NotFound(_) => StatusCode::NOT_FOUND,
            DetectionError::Forbidden(_) => StatusCode::FORBIDDEN,
            DetectionError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            DetectionError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            DetectionError::ServiceTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            DetectionError::InferenceFailure { status, .. } => StatusCode::from_u16(*status)
                .ok()
                .filter(|code| code.is_client_error() || code.is_server_error())
                .unwrap_or(StatusCode::BAD_GATEWAY),
            DetectionError::Storage(_) | DetectionError::Persistence(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        let upstream_status = match self {
            DetectionError::InferenceFailure { status, .. } => Some(*status),
            _ => None,
        };
        HttpResponse::build(self.status_code()).json(ErrorResponse {
            error: self.to_string(),
            upstream_status,
        })
    }
}
