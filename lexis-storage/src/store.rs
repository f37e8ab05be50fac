//! Async persistence seam for users, cards and the word bank.
//!
//! The review core never talks to a database directly. Everything it needs
//! from durable storage goes through [`CardStore`], implemented by the
//! in-memory [`crate::MemoryStore`] and the PostgreSQL store in the API crate.

use async_trait::async_trait;
use lexis_core::{Card, LexisResult, NewUser, Timestamp, User, UserId, UserRegistration, Word, WordId};

/// Async storage trait for the card lifecycle.
///
/// Implementations must enforce uniqueness of `(user_id, word_id)` cards and
/// keep `count_of_views` non-negative.
#[async_trait]
pub trait CardStore: Send + Sync {
    // ========================================================================
    // USER OPERATIONS
    // ========================================================================

    /// Register a user, or return the stored row if it already exists.
    async fn user_insert(&self, user: &NewUser, at: Timestamp) -> LexisResult<UserRegistration>;

    /// List every registered user.
    async fn user_list_all(&self) -> LexisResult<Vec<User>>;

    // ========================================================================
    // CARD OPERATIONS
    // ========================================================================

    /// Insert a new card. Fails with `InsertFailed` if the pair already exists.
    async fn card_insert(&self, card: &Card) -> LexisResult<()>;

    /// Get the card for a (user, word) pair.
    async fn card_get(&self, user_id: UserId, word_id: WordId) -> LexisResult<Option<Card>>;

    /// List a user's cards in ascending word order, at most `limit` rows.
    async fn card_list_by_user(&self, user_id: UserId, limit: usize) -> LexisResult<Vec<Card>>;

    /// Add one view to a card, set `last_view` to `at` and return the updated row.
    async fn card_increment_views(
        &self,
        user_id: UserId,
        word_id: WordId,
        at: Timestamp,
    ) -> LexisResult<Card>;

    // ========================================================================
    // WORD BANK OPERATIONS
    // ========================================================================

    /// Next `limit` words with id greater than `after`, ascending, with sentences.
    async fn word_list_after(&self, after: WordId, limit: usize) -> LexisResult<Vec<Word>>;

    /// Words for the given ids, in the order given. Unknown ids are skipped.
    async fn word_list_by_ids(&self, ids: &[WordId]) -> LexisResult<Vec<Word>>;

    // ========================================================================
    // HEALTH
    // ========================================================================

    /// Cheap round trip used by readiness probes.
    async fn health_check(&self) -> LexisResult<()>;
}
