use http::StatusCode;
use serde_json::{Value, json};
use thiserror::Error;

use crate::config::Environment;

/// The application's error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// A database error.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A migration error.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// An I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A JSON serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An authentication error (bad credentials, missing or invalid token).
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// An authorization error (authenticated, but wrong role).
    #[error("Access forbidden")]
    Forbidden,

    /// A resource not found error.
    #[error("Resource not found")]
    NotFound,

    /// A validation error.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A uniqueness conflict (duplicate email or national id).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A router registration error (unknown middleware name, bad pattern).
    #[error("Router error: {0}")]
    Router(String),

    /// An internal server error.
    #[error("Internal server error: {0}")]
    Internal(String),
}

/// A `Result` type that uses `AppError` as the error type.
pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    /// The HTTP status code this error maps to.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Authentication(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Database(_)
            | AppError::Migration(_)
            | AppError::Io(_)
            | AppError::Serialization(_)
            | AppError::Router(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether this error is an unexpected failure that must be logged with
    /// full context and reported to the client without detail.
    pub fn is_unexpected(&self) -> bool {
        self.status_code() == StatusCode::INTERNAL_SERVER_ERROR
    }

    /// The message safe to show the client for the given environment.
    ///
    /// Input and business-rule failures carry their own wording; unexpected
    /// failures are suppressed to a generic message outside development mode.
    pub fn public_message(&self, env: Environment) -> String {
        match self {
            AppError::Authentication(msg) => msg.clone(),
            AppError::Forbidden => "Access forbidden".to_string(),
            AppError::NotFound => "Resource not found".to_string(),
            AppError::Validation(msg) => msg.clone(),
            AppError::Conflict(msg) => msg.clone(),
            other if env == Environment::Development => other.to_string(),
            _ => "Internal server error".to_string(),
        }
    }

    /// Builds the JSON error envelope sent to API clients.
    pub fn envelope(&self, env: Environment) -> Value {
        json!({
            "status": "error",
            "code": self.status_code().as_u16(),
            "message": self.public_message(env),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_maps_to_400() {
        let err = AppError::Validation("email is required".to_string());
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert!(!err.is_unexpected());
    }

    #[test]
    fn internal_detail_is_suppressed_in_production() {
        let err = AppError::Internal("pool exhausted".to_string());
        assert_eq!(err.public_message(Environment::Production), "Internal server error");
        assert!(
            err.public_message(Environment::Development)
                .contains("pool exhausted")
        );
    }

    #[test]
    fn envelope_has_status_and_code() {
        let err = AppError::Forbidden;
        let body = err.envelope(Environment::Production);
        assert_eq!(body["status"], "error");
        assert_eq!(body["code"], 403);
    }
}
