//! Error types for Lexis operations

use crate::{UserId, WordId};
use std::time::Duration;
use thiserror::Error;

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    #[error("Insert failed for {entity}: {reason}")]
    InsertFailed { entity: &'static str, reason: String },

    #[error("Update failed for {entity} {key}: {reason}")]
    UpdateFailed {
        entity: &'static str,
        key: String,
        reason: String,
    },

    #[error("Store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Store operation '{operation}' timed out after {elapsed:?}")]
    Timeout {
        operation: &'static str,
        elapsed: Duration,
    },

    #[error("Stored {entity} could not be decoded: {reason}")]
    Decode { entity: &'static str, reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Request validation errors. Never retried automatically.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Word card already created for word {word_id}")]
    CardAlreadyCreated { user_id: UserId, word_id: WordId },

    #[error("Word card not in sequence: word {word_id} must follow word {last_word_id}")]
    CardOutOfSequence { word_id: WordId, last_word_id: WordId },

    #[error("Word {word_id} is not due for review")]
    WordNotDue { user_id: UserId, word_id: WordId },

    #[error("Invalid limit {limit}: must be between 1 and {max}")]
    InvalidLimit { limit: usize, max: usize },
}

/// Expected "empty or exhausted" outcomes. Callers treat these as normal results.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NotFoundError {
    #[error("No card found for user {user_id} and word {word_id}")]
    CardNotFound { user_id: UserId, word_id: WordId },

    #[error("No more words in the word bank after word {after}")]
    EndOfWordBank { after: WordId },

    #[error("Word {word_id} is not in the word bank")]
    WordNotFound { word_id: WordId },
}

/// Review cache errors. Both indicate a startup or registration bug, not bad input.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Review cache is still rehydrating")]
    NotReady,

    #[error("No review profile for user {user_id}")]
    ProfileMissing { user_id: UserId },
}

/// Master error type for all Lexis errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LexisError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Not found: {0}")]
    NotFound(#[from] NotFoundError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),
}

impl LexisError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LexisError::Storage(StorageError::Unavailable { .. })
                | LexisError::Storage(StorageError::Timeout { .. })
                | LexisError::Cache(CacheError::NotReady)
        )
    }
}

/// Result type alias for Lexis operations.
pub type LexisResult<T> = Result<T, LexisError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display_already_created() {
        let err = ValidationError::CardAlreadyCreated {
            user_id: 7,
            word_id: 42,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("already created"));
        assert!(msg.contains("42"));
    }

    #[test]
    fn test_validation_error_display_out_of_sequence() {
        let err = ValidationError::CardOutOfSequence {
            word_id: 3,
            last_word_id: 9,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("not in sequence"));
        assert!(msg.contains('3'));
        assert!(msg.contains('9'));
    }

    #[test]
    fn test_storage_error_display_timeout() {
        let err = StorageError::Timeout {
            operation: "card_insert",
            elapsed: Duration::from_secs(5),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("card_insert"));
        assert!(msg.contains("timed out"));
    }

    #[test]
    fn test_lexis_error_from_variants() {
        let storage = LexisError::from(StorageError::LockPoisoned);
        assert!(matches!(storage, LexisError::Storage(_)));

        let validation = LexisError::from(ValidationError::InvalidLimit { limit: 0, max: 50 });
        assert!(matches!(validation, LexisError::Validation(_)));

        let not_found = LexisError::from(NotFoundError::WordNotFound { word_id: 1 });
        assert!(matches!(not_found, LexisError::NotFound(_)));

        let cache = LexisError::from(CacheError::NotReady);
        assert!(matches!(cache, LexisError::Cache(_)));
    }

    #[test]
    fn test_transient_classification() {
        assert!(LexisError::from(StorageError::Unavailable {
            reason: "connection refused".to_string()
        })
        .is_transient());
        assert!(LexisError::from(CacheError::NotReady).is_transient());
        assert!(!LexisError::from(CacheError::ProfileMissing { user_id: 1 }).is_transient());
        assert!(!LexisError::from(ValidationError::CardAlreadyCreated {
            user_id: 1,
            word_id: 1
        })
        .is_transient());
    }
}
