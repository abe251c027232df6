use actix_web::http::StatusCode;
use actix_web::{error::ResponseError, HttpResponse};
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use log::{debug, error, warn};
use serde_json::json;
use thiserror::Error;

// Custom error handling
#[derive(Debug, Error, PartialEq)]
pub enum ApiError {
    #[error("Validation error: {message}")]
    ValidationError {
        field: Option<String>,
        message: String,
    },
    #[error("Authentication error: {0}")]
    AuthError(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Not found: {0}")]
    NotFoundError(String),
    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),
    #[error("Freight {0} has already been rated")]
    DuplicateRating(i32),
    #[error("Driver {0} already has a pending withdrawal request")]
    DuplicatePending(i32),
    #[error("Insufficient balance: {0}")]
    InsufficientBalance(String),
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Internal server error: {0}")]
    InternalError(String),
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::ValidationError {
            field: None,
            message: message.into(),
        }
    }

    pub fn field(field: &str, message: impl Into<String>) -> Self {
        ApiError::ValidationError {
            field: Some(field.to_string()),
            message: message.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::ValidationError { .. } => "VALIDATION_ERROR",
            ApiError::AuthError(_) => "UNAUTHORIZED",
            ApiError::Forbidden(_) => "FORBIDDEN",
            ApiError::NotFoundError(_) => "NOT_FOUND",
            ApiError::InvalidStateTransition(_) => "INVALID_STATE_TRANSITION",
            ApiError::DuplicateRating(_) => "DUPLICATE_RATING",
            ApiError::DuplicatePending(_) => "DUPLICATE_PENDING",
            ApiError::InsufficientBalance(_) => "INSUFFICIENT_BALANCE",
            ApiError::DatabaseError(_) => "DATABASE_ERROR",
            ApiError::InternalError(_) => "INTERNAL_ERROR",
        }
    }
}

impl ResponseError for ApiError {
    fn error_response(&self) -> HttpResponse {
        let message = self.to_string();
        match self {
            ApiError::DatabaseError(_) | ApiError::InternalError(_) => {
                error!("\x1B[1;31m{}:\x1B[0m {}", self.code(), message);
            }
            ApiError::NotFoundError(_) => {
                debug!("\x1B[1;36m{}:\x1B[0m {}", self.code(), message);
            }
            _ => {
                warn!("\x1B[1;33m{}:\x1B[0m {}", self.code(), message);
            }
        }

        // Storage details stay in the log, not in the response
        let public_message = match self {
            ApiError::DatabaseError(_) => "Database error".to_string(),
            ApiError::InternalError(_) => "Internal server error".to_string(),
            _ => message,
        };

        let mut body = json!({ "error": public_message, "code": self.code() });
        if let ApiError::ValidationError { field: Some(field), .. } = self {
            body["field"] = json!(field);
        }
        HttpResponse::build(self.status_code()).json(body)
    }

    fn status_code(&self) -> StatusCode {
        match *self {
            ApiError::ValidationError { .. } => StatusCode::BAD_REQUEST,
            ApiError::AuthError(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFoundError(_) => StatusCode::NOT_FOUND,
            ApiError::InvalidStateTransition(_)
            | ApiError::DuplicateRating(_)
            | ApiError::DuplicatePending(_) => StatusCode::CONFLICT,
            ApiError::InsufficientBalance(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::DatabaseError(_) | ApiError::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<DieselError> for ApiError {
    fn from(e: DieselError) -> Self {
        match e {
            DieselError::NotFound => ApiError::NotFoundError("Record not found".to_string()),
            DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
                debug!("Unique constraint violated: {}", info.message());
                ApiError::validation(info.message().to_string())
            }
            other => ApiError::DatabaseError(other.to_string()),
        }
    }
}

impl From<r2d2::Error> for ApiError {
    fn from(e: r2d2::Error) -> Self {
        error!("Failed to get database connection: {}", e);
        ApiError::DatabaseError(e.to_string())
    }
}

impl From<actix_web::error::BlockingError> for ApiError {
    fn from(e: actix_web::error::BlockingError) -> Self {
        error!("Blocking operation error: {}", e);
        ApiError::InternalError(e.to_string())
    }
}
