//! Card and review API types

use lexis_core::{ReviewOutcome, Timestamp, UserId, Word, WordId};
use serde::{Deserialize, Serialize};

/// Request to create a card for a word.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct NewCardRequest {
    /// The user already knows this word
    pub known: bool,
    pub word_id: WordId,
    /// Client token that dedupes retries of this request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

/// Created card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct NewCardResponse {
    pub user_id: UserId,
    pub word_id: WordId,
    pub count_of_views: i32,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub last_view: Timestamp,
    pub message: String,
}

/// Request to record a review outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ReviewRequest {
    pub passed: bool,
    pub word_id: WordId,
    /// Client token that dedupes retries of this review
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

/// Where a reviewed card went.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum ReviewStage {
    /// Waiting until `next_review_at`
    Waiting,
    /// Back on the due queue
    Due,
    /// No longer scheduled
    Mastered,
}

impl ReviewStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewStage::Waiting => "waiting",
            ReviewStage::Due => "due",
            ReviewStage::Mastered => "mastered",
        }
    }
}

/// Result of a recorded review. Replayed verbatim for a repeated key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ReviewResponse {
    pub word_id: WordId,
    pub passed: bool,
    pub count_of_views: i32,
    pub stage: ReviewStage,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "date-time"))]
    pub next_review_at: Option<Timestamp>,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub reviewed_at: Timestamp,
    pub message: String,
}

impl ReviewResponse {
    pub fn new(
        word_id: WordId,
        passed: bool,
        count_of_views: i32,
        outcome: ReviewOutcome,
        reviewed_at: Timestamp,
    ) -> Self {
        let (stage, next_review_at) = match outcome {
            ReviewOutcome::Rescheduled(at) => (ReviewStage::Waiting, Some(at)),
            ReviewOutcome::Retry => (ReviewStage::Due, None),
            ReviewOutcome::Mastered => (ReviewStage::Mastered, None),
        };
        Self {
            word_id,
            passed,
            count_of_views,
            stage,
            next_review_at,
            reviewed_at,
            message: "Review added successfully".to_string(),
        }
    }
}

/// Batch of words with their sentences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct WordsResponse {
    pub words: Vec<Word>,
}

/// Optional batch size for word listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::IntoParams))]
#[cfg_attr(feature = "openapi", into_params(parameter_in = Query))]
pub struct BatchQuery {
    /// Number of words to return
    pub limit: Option<usize>,
}

/// Number of words due for review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct DueCountResponse {
    pub count: usize,
}
