//! Error Types for Lexis API
//!
//! This module defines error handling for the API layer, including:
//! - ApiError struct for structured error responses
//! - ErrorCode enum for categorizing errors
//! - IntoResponse implementation for Axum HTTP responses
//! - Conversions from domain, database and serialization errors
//!
//! All errors are serialized as JSON with appropriate HTTP status codes.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use lexis_core::{CacheError, LexisError, NotFoundError, StorageError, ValidationError};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// ERROR CODE ENUM
// ============================================================================

/// Error codes for API responses.
///
/// Each error code maps to a specific HTTP status code and represents
/// a category of error that can occur during API operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // ========================================================================
    // Authentication Errors (401)
    // ========================================================================
    /// Request lacks valid authentication credentials
    Unauthorized,

    /// Authentication token is invalid or malformed
    InvalidToken,

    /// Authentication token has expired
    TokenExpired,

    // ========================================================================
    // Validation Errors (400)
    // ========================================================================
    /// Request contains invalid input data
    InvalidInput,

    /// Required field is missing from request
    MissingField,

    /// Field value is out of valid range
    InvalidRange,

    /// Field format is incorrect
    InvalidFormat,

    /// A card for this word already exists
    CardAlreadyCreated,

    /// Word ids must be introduced in increasing order
    CardOutOfSequence,

    /// The word is not currently due for review
    WordNotDue,

    /// No unseen words remain in the word bank
    EndOfWordBank,

    // ========================================================================
    // Not Found Errors (404)
    // ========================================================================
    /// The word id is not in the word bank
    WordNotFound,

    /// No card exists for the user and word
    CardNotFound,

    /// The user has no review profile
    ProfileNotFound,

    // ========================================================================
    // Conflict Errors (409)
    // ========================================================================
    /// Idempotency key was reused with a different request
    IdempotencyConflict,

    /// A request with the same idempotency key is still running
    IdempotencyInProgress,


    // ========================================================================
    // Server Errors (500, 503, 504)
    // ========================================================================
    /// Internal server error
    InternalError,

    /// Database operation failed
    DatabaseError,

    /// Service is temporarily unavailable
    ServiceUnavailable,

    /// Review cache has not finished rehydrating
    CacheNotReady,

    /// Database connection pool exhausted
    ConnectionPoolExhausted,

    /// Operation timed out
    Timeout,
}

impl ErrorCode {
    /// Get the HTTP status code for this error code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::Unauthorized | ErrorCode::InvalidToken | ErrorCode::TokenExpired => {
                StatusCode::UNAUTHORIZED
            }

            ErrorCode::InvalidInput
            | ErrorCode::MissingField
            | ErrorCode::InvalidRange
            | ErrorCode::InvalidFormat
            | ErrorCode::CardAlreadyCreated
            | ErrorCode::CardOutOfSequence
            | ErrorCode::WordNotDue
            | ErrorCode::EndOfWordBank => StatusCode::BAD_REQUEST,

            ErrorCode::WordNotFound | ErrorCode::CardNotFound | ErrorCode::ProfileNotFound => {
                StatusCode::NOT_FOUND
            }

            ErrorCode::IdempotencyConflict | ErrorCode::IdempotencyInProgress => StatusCode::CONFLICT,

            ErrorCode::ServiceUnavailable
            | ErrorCode::CacheNotReady
            | ErrorCode::ConnectionPoolExhausted => StatusCode::SERVICE_UNAVAILABLE,

            ErrorCode::Timeout => StatusCode::GATEWAY_TIMEOUT,

            ErrorCode::InternalError | ErrorCode::DatabaseError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Get a default message for this error code.
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::Unauthorized => "Authentication required",
            ErrorCode::InvalidToken => "Invalid authentication token",
            ErrorCode::TokenExpired => "Authentication token has expired",

            ErrorCode::InvalidInput => "Invalid input data",
            ErrorCode::MissingField => "Required field is missing",
            ErrorCode::InvalidRange => "Value is out of valid range",
            ErrorCode::InvalidFormat => "Invalid format",
            ErrorCode::CardAlreadyCreated => "Word card already created",
            ErrorCode::CardOutOfSequence => "Word card not in sequence",
            ErrorCode::WordNotDue => "Word is not due for review",
            ErrorCode::EndOfWordBank => "No more words in the word bank",

            ErrorCode::WordNotFound => "Word not found in the word bank",
            ErrorCode::CardNotFound => "Card not found",
            ErrorCode::ProfileNotFound => "Review profile not found",

            ErrorCode::IdempotencyConflict => "Idempotency key was used with a different request",
            ErrorCode::IdempotencyInProgress => "A request with this idempotency key is in progress",

            ErrorCode::InternalError => "Internal server error",
            ErrorCode::DatabaseError => "Database operation failed",
            ErrorCode::ServiceUnavailable => "Service temporarily unavailable",
            ErrorCode::CacheNotReady => "Review cache is warming up",
            ErrorCode::ConnectionPoolExhausted => "Connection pool exhausted",
            ErrorCode::Timeout => "Operation timed out",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ============================================================================
// API ERROR STRUCT
// ============================================================================

/// Structured error response for API operations.
///
/// This type is returned by all API endpoints when an error occurs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ApiError {
    /// Error code categorizing the error
    pub code: ErrorCode,

    /// Human-readable error message
    pub message: String,

    /// Optional additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    #[cfg_attr(feature = "openapi", schema(value_type = Option<Object>))]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Create a new API error with the given code, using the default message.
    pub fn from_code(code: ErrorCode) -> Self {
        Self {
            code,
            message: code.default_message().to_string(),
            details: None,
        }
    }

    /// Add additional details to the error.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        self.code.status_code()
    }

    // ========================================================================
    // Convenience constructors for common errors
    // ========================================================================

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    pub fn invalid_token(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidToken, message)
    }

    pub fn token_expired() -> Self {
        Self::from_code(ErrorCode::TokenExpired)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    pub fn missing_field(field: &str) -> Self {
        Self::new(
            ErrorCode::MissingField,
            format!("Required field '{}' is missing", field),
        )
    }

    pub fn invalid_range(field: &str, min: impl fmt::Display, max: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::InvalidRange,
            format!("Field '{}' must be between {} and {}", field, min, max),
        )
    }

    pub fn invalid_format(field: &str, expected: &str) -> Self {
        Self::new(
            ErrorCode::InvalidFormat,
            format!("Field '{}' has invalid format, expected {}", field, expected),
        )
    }

    pub fn idempotency_conflict(key: &str) -> Self {
        Self::new(
            ErrorCode::IdempotencyConflict,
            format!(
                "Idempotency key '{}' was already used with a different request",
                key
            ),
        )
    }

    pub fn idempotency_in_progress(key: &str) -> Self {
        Self::new(
            ErrorCode::IdempotencyInProgress,
            format!("A request with idempotency key '{}' is still in progress, retry later", key),
        )
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    pub fn database_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DatabaseError, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ServiceUnavailable, message)
    }

    pub fn cache_not_ready() -> Self {
        Self::from_code(ErrorCode::CacheNotReady)
    }

    pub fn connection_pool_exhausted() -> Self {
        Self::from_code(ErrorCode::ConnectionPoolExhausted)
    }

    pub fn timeout(operation: &str) -> Self {
        Self::new(
            ErrorCode::Timeout,
            format!("Operation '{}' timed out", operation),
        )
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

// ============================================================================
// AXUM INTEGRATION
// ============================================================================

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(self);
        (status, body).into_response()
    }
}

// ============================================================================
// CONVERSIONS FROM DOMAIN ERRORS
// ============================================================================

impl From<LexisError> for ApiError {
    fn from(err: LexisError) -> Self {
        match err {
            LexisError::Validation(e) => {
                let code = match e {
                    ValidationError::CardAlreadyCreated { .. } => ErrorCode::CardAlreadyCreated,
                    ValidationError::CardOutOfSequence { .. } => ErrorCode::CardOutOfSequence,
                    ValidationError::WordNotDue { .. } => ErrorCode::WordNotDue,
                    ValidationError::InvalidLimit { .. } => ErrorCode::InvalidRange,
                };
                ApiError::new(code, e.to_string())
            }
            LexisError::NotFound(e) => {
                let code = match e {
                    NotFoundError::CardNotFound { .. } => ErrorCode::CardNotFound,
                    NotFoundError::EndOfWordBank { .. } => ErrorCode::EndOfWordBank,
                    NotFoundError::WordNotFound { .. } => ErrorCode::WordNotFound,
                };
                ApiError::new(code, e.to_string())
            }
            LexisError::Cache(CacheError::NotReady) => ApiError::cache_not_ready(),
            LexisError::Cache(e @ CacheError::ProfileMissing { .. }) => {
                tracing::warn!(error = %e, "Review profile missing for authenticated user");
                ApiError::new(ErrorCode::ProfileNotFound, e.to_string())
            }
            LexisError::Storage(e) => {
                tracing::error!("Storage error: {:?}", e);
                match e {
                    StorageError::Timeout { operation, .. } => ApiError::timeout(operation),
                    StorageError::Unavailable { .. } => {
                        ApiError::service_unavailable("Storage temporarily unavailable")
                    }
                    _ => ApiError::database_error("Database operation failed"),
                }
            }
        }
    }
}

impl From<CacheError> for ApiError {
    fn from(err: CacheError) -> Self {
        ApiError::from(LexisError::from(err))
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::from(LexisError::from(err))
    }
}

// ============================================================================
// CONVERSIONS FROM STANDARD ERRORS
// ============================================================================

/// Convert from tokio_postgres::Error to ApiError.
impl From<tokio_postgres::Error> for ApiError {
    fn from(err: tokio_postgres::Error) -> Self {
        tracing::error!("Database error: {:?}", err);

        // Generic message so internal details never reach the client
        ApiError::database_error("Database operation failed")
    }
}

/// Convert from deadpool_postgres::PoolError to ApiError.
impl From<deadpool_postgres::PoolError> for ApiError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        tracing::error!("Connection pool error: {:?}", err);

        match err {
            deadpool_postgres::PoolError::Timeout(_) => ApiError::connection_pool_exhausted(),
            deadpool_postgres::PoolError::Closed => {
                ApiError::service_unavailable("Database connection pool is closed")
            }
            _ => ApiError::database_error("Failed to acquire database connection"),
        }
    }
}

/// Convert from serde_json::Error to ApiError.
impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        tracing::error!("JSON serialization error: {:?}", err);
        ApiError::invalid_input(format!("Invalid JSON: {}", err))
    }
}

// ============================================================================
// RESULT TYPE ALIAS
// ============================================================================

/// Result type alias for API operations.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_error_code_status_mapping() {
        assert_eq!(ErrorCode::Unauthorized.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(ErrorCode::CardAlreadyCreated.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorCode::EndOfWordBank.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorCode::CardNotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(ErrorCode::WordNotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(ErrorCode::IdempotencyConflict.status_code(), StatusCode::CONFLICT);
        assert_eq!(ErrorCode::IdempotencyInProgress.status_code(), StatusCode::CONFLICT);
        assert_eq!(ErrorCode::InternalError.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(ErrorCode::CacheNotReady.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(ErrorCode::Timeout.status_code(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn test_api_error_constructors() {
        let err = ApiError::unauthorized("Invalid credentials");
        assert_eq!(err.code, ErrorCode::Unauthorized);
        assert_eq!(err.message, "Invalid credentials");
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);

        let err = ApiError::missing_field("word_id");
        assert_eq!(err.code, ErrorCode::MissingField);
        assert!(err.message.contains("word_id"));

        let err = ApiError::idempotency_conflict("abc");
        assert!(err.message.contains("abc"));
    }

    #[test]
    fn test_api_error_with_details() {
        let details = serde_json::json!({ "word_id": 3 });
        let err = ApiError::invalid_input("bad word").with_details(details.clone());
        assert_eq!(err.details, Some(details));
    }

    #[test]
    fn test_error_serialization() -> Result<(), serde_json::Error> {
        let err = ApiError::from_code(ErrorCode::CardOutOfSequence);
        let json = serde_json::to_string(&err)?;
        assert!(json.contains("CARD_OUT_OF_SEQUENCE"));
        assert!(!json.contains("details"));

        let deserialized: ApiError = serde_json::from_str(&json)?;
        assert_eq!(deserialized, err);
        Ok(())
    }

    #[test]
    fn test_domain_validation_mapping() {
        let err: ApiError = LexisError::from(ValidationError::CardAlreadyCreated {
            user_id: 1,
            word_id: 2,
        })
        .into();
        assert_eq!(err.code, ErrorCode::CardAlreadyCreated);
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert!(err.message.contains("already created"));

        let err: ApiError = LexisError::from(ValidationError::CardOutOfSequence {
            word_id: 2,
            last_word_id: 5,
        })
        .into();
        assert_eq!(err.code, ErrorCode::CardOutOfSequence);
    }

    #[test]
    fn test_domain_not_found_mapping() {
        let err: ApiError = LexisError::from(NotFoundError::EndOfWordBank { after: 10 }).into();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);

        let err: ApiError = LexisError::from(NotFoundError::CardNotFound {
            user_id: 1,
            word_id: 2,
        })
        .into();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_storage_errors_do_not_leak() {
        let err: ApiError = LexisError::from(StorageError::InsertFailed {
            entity: "card",
            reason: "duplicate key value violates unique constraint".to_string(),
        })
        .into();
        assert_eq!(err.code, ErrorCode::DatabaseError);
        assert!(!err.message.contains("constraint"));

        let err: ApiError = LexisError::from(StorageError::Timeout {
            operation: "card_insert",
            elapsed: Duration::from_secs(5),
        })
        .into();
        assert_eq!(err.status_code(), StatusCode::GATEWAY_TIMEOUT);

        let err: ApiError = LexisError::from(CacheError::NotReady).into();
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_error_display() {
        let err = ApiError::database_error("Connection failed");
        assert_eq!(format!("{}", err), "DatabaseError: Connection failed");
    }
}
