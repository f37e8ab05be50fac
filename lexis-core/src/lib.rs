//! Lexis Core - Domain Types and Review Scheduling
//!
//! Pure data structures, the spaced-repetition interval table and the
//! per-user review profile. No I/O lives here; storage and HTTP crates
//! depend on this one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod clock;
pub mod error;
pub mod profile;
pub mod schedule;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{CacheError, LexisError, LexisResult, NotFoundError, StorageError, ValidationError};
pub use profile::{ProfileSnapshot, ReviewOutcome, ReviewProfile};
pub use schedule::{
    interval_minutes, next_review_time, KNOWN_INITIAL_VIEWS, MASTERY_THRESHOLD, MAX_LEVEL,
    NEW_CARD_VIEWS,
};

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Telegram user identifier. Also the `sub` claim of access tokens.
pub type UserId = i64;

/// Word bank identifier. Word ids grow monotonically as content is imported.
pub type WordId = i64;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

// ============================================================================
// ENTITIES
// ============================================================================

/// A registered learner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct User {
    pub id: UserId,
    pub first_name: Option<String>,
    pub username: Option<String>,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub created_at: Timestamp,
}

/// Registration payload for a learner seen for the first time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUser {
    pub id: UserId,
    pub first_name: Option<String>,
    pub username: Option<String>,
}

impl NewUser {
    pub fn new(id: UserId) -> Self {
        Self {
            id,
            first_name: None,
            username: None,
        }
    }
}

/// Outcome of registering a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserRegistration {
    /// The user row was inserted by this call.
    Created(User),
    /// The user already existed; the stored row is returned.
    Existing(User),
}

impl UserRegistration {
    pub fn user(&self) -> &User {
        match self {
            UserRegistration::Created(user) | UserRegistration::Existing(user) => user,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, UserRegistration::Created(_))
    }
}

/// Persisted review record for one (user, word) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Card {
    pub user_id: UserId,
    pub word_id: WordId,
    /// Successful exposures so far. Never negative.
    pub count_of_views: i32,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub last_view: Timestamp,
}

impl Card {
    pub fn is_mastered(&self) -> bool {
        self.count_of_views >= MASTERY_THRESHOLD
    }
}

/// Example sentence attached to a word.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Sentence {
    pub id: i64,
    pub word_id: WordId,
    pub native_text: String,
    pub foreign_text: String,
}

/// Word bank entry with its example sentences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Word {
    pub id: WordId,
    pub latin_word: String,
    pub native_word: String,
    pub cyrillic_word: Option<String>,
    pub transcription: Option<String>,
    pub image: Option<String>,
    pub legend: Option<String>,
    pub voice_id: Option<String>,
    #[serde(default)]
    pub sentences: Vec<Sentence>,
}
