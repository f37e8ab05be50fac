//! Card Service
//!
//! Orchestrates card creation, reviews and word batches over the review
//! cache and the card store.
//!
//! Every mutation takes the user's profile lock, validates against the
//! profile, writes to the store and only then updates the profile. A failed
//! or timed-out write leaves the profile untouched. Mutations run on their
//! own task so a dropped request cannot stop one halfway.

use std::future::Future;
use std::sync::Arc;

use lexis_core::{
    Card, Clock, LexisError, NewUser, NotFoundError, ProfileSnapshot, ReviewOutcome, StorageError,
    UserId, ValidationError, WordId, KNOWN_INITIAL_VIEWS, NEW_CARD_VIEWS,
};
use lexis_storage::{CardStore, IdempotencyStore, ReviewCache};

use crate::config::ReviewConfig;
use crate::error::{ApiError, ApiResult};
use crate::telemetry::METRICS;
use crate::types::{NewCardRequest, NewCardResponse, ReviewRequest, ReviewResponse, UserResponse};

/// Body-level idempotency receipts for card creation.
pub type CardReceipts = IdempotencyStore<NewCardResponse>;

/// Body-level idempotency receipts for reviews.
pub type ReviewReceipts = IdempotencyStore<ReviewResponse>;

/// Card orchestrator shared by every request.
#[derive(Clone)]
pub struct CardService {
    store: Arc<dyn CardStore>,
    cache: Arc<ReviewCache>,
    clock: Arc<dyn Clock>,
    card_receipts: Arc<CardReceipts>,
    review_receipts: Arc<ReviewReceipts>,
    config: ReviewConfig,
}

impl std::fmt::Debug for CardService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CardService")
            .field("cached_profiles", &self.cache.len())
            .field("config", &self.config)
            .finish()
    }
}

impl CardService {
    pub fn new(
        store: Arc<dyn CardStore>,
        cache: Arc<ReviewCache>,
        clock: Arc<dyn Clock>,
        config: ReviewConfig,
    ) -> Self {
        let card_receipts = Arc::new(IdempotencyStore::new(config.idempotency_ttl, clock.clone()));
        let review_receipts =
            Arc::new(IdempotencyStore::new(config.idempotency_ttl, clock.clone()));
        Self {
            store,
            cache,
            clock,
            card_receipts,
            review_receipts,
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn CardStore> {
        &self.store
    }

    pub fn cache(&self) -> &Arc<ReviewCache> {
        &self.cache
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn config(&self) -> &ReviewConfig {
        &self.config
    }

    // ========================================================================
    // USERS
    // ========================================================================

    /// Persist the user and make sure a review profile exists for them.
    pub async fn register_user(&self, user: NewUser) -> ApiResult<UserResponse> {
        let registration = self
            .with_timeout("user_insert", self.store.user_insert(&user, self.clock.now()))
            .await?;
        self.cache.ensure_profile(user.id);
        if let Ok(metrics) = METRICS.as_ref() {
            metrics.set_cached_profiles(self.cache.len());
        }

        let created = registration.is_created();
        if created {
            tracing::info!(user_id = user.id, "User registered");
        }
        Ok(UserResponse {
            user: registration.user().clone(),
            created,
        })
    }

    // ========================================================================
    // CARDS
    // ========================================================================

    /// Create a card for `word_id`.
    ///
    /// Known words are stored at the mastery count and never scheduled;
    /// unknown words start at one view and are due immediately.
    pub async fn create_card(&self, user_id: UserId, req: NewCardRequest) -> ApiResult<NewCardResponse> {
        let service = self.clone();
        tokio::spawn(async move { service.create_card_locked(user_id, req).await })
            .await
            .map_err(|e| ApiError::internal_error(format!("Card task failed: {}", e)))?
    }

    async fn create_card_locked(&self, user_id: UserId, req: NewCardRequest) -> ApiResult<NewCardResponse> {
        let mut profile = self.cache.lock(user_id).await?;

        if let Some(key) = req.idempotency_key.as_deref() {
            if let Some(prior) = self.card_receipts.check(user_id, key) {
                tracing::debug!(user_id, idempotency_key = key, "Replaying card creation");
                record_replay();
                return Ok(prior);
            }
        }

        profile.check_new_card(req.word_id, self.config.enforce_sequence)?;
        self.ensure_word_exists(req.word_id).await?;

        let now = self.clock.now();
        let card = Card {
            user_id,
            word_id: req.word_id,
            count_of_views: if req.known { KNOWN_INITIAL_VIEWS } else { NEW_CARD_VIEWS },
            last_view: now,
        };
        self.with_timeout("card_insert", self.store.card_insert(&card))
            .await
            .map_err(|e| insert_error_as_domain(e, user_id, req.word_id))?;

        // Checked above under the same lock
        let count_of_views = profile.record_new_card(req.word_id, req.known)?;
        drop(profile);

        if let Ok(metrics) = METRICS.as_ref() {
            metrics.record_card_created(req.known);
        }
        tracing::info!(user_id, word_id = req.word_id, known = req.known, "Card created");

        let response = NewCardResponse {
            user_id,
            word_id: req.word_id,
            count_of_views,
            last_view: now,
            message: "Word card created successfully".to_string(),
        };
        if let Some(key) = req.idempotency_key.as_deref() {
            self.card_receipts.store(user_id, key, response.clone());
        }
        Ok(response)
    }

    // ========================================================================
    // REVIEWS
    // ========================================================================

    /// Record a review for a due word.
    ///
    /// A pass adds one view in the store and schedules the next review from
    /// the count before the increment; reaching the mastery threshold takes
    /// the word out of scheduling. A fail persists nothing and puts the word
    /// at the back of the due queue.
    pub async fn review_card(&self, user_id: UserId, req: ReviewRequest) -> ApiResult<ReviewResponse> {
        let service = self.clone();
        tokio::spawn(async move { service.review_card_locked(user_id, req).await })
            .await
            .map_err(|e| ApiError::internal_error(format!("Review task failed: {}", e)))?
    }

    async fn review_card_locked(&self, user_id: UserId, req: ReviewRequest) -> ApiResult<ReviewResponse> {
        let mut profile = self.cache.lock(user_id).await?;

        if let Some(key) = req.idempotency_key.as_deref() {
            if let Some(prior) = self.review_receipts.check(user_id, key) {
                tracing::debug!(user_id, idempotency_key = key, "Replaying review");
                record_replay();
                return Ok(prior);
            }
        }

        let now = self.clock.now();
        profile.promote_due(now);
        profile.check_review(req.word_id)?;

        let (outcome, count_of_views) = if req.passed {
            let updated = self
                .with_timeout(
                    "card_increment_views",
                    self.store.card_increment_views(user_id, req.word_id, now),
                )
                .await?;
            let prior_views = updated.count_of_views.saturating_sub(1);
            (ReviewOutcome::after_pass(now, prior_views), updated.count_of_views)
        } else {
            let current = self
                .with_timeout("card_get", self.store.card_get(user_id, req.word_id))
                .await?
                .ok_or(NotFoundError::CardNotFound {
                    user_id,
                    word_id: req.word_id,
                })
                .map_err(LexisError::from)?;
            (ReviewOutcome::Retry, current.count_of_views)
        };

        profile.apply_review(req.word_id, outcome)?;
        drop(profile);

        let response = ReviewResponse::new(req.word_id, req.passed, count_of_views, outcome, now);
        if let Ok(metrics) = METRICS.as_ref() {
            metrics.record_review(response.stage.as_str());
        }
        tracing::info!(
            user_id,
            word_id = req.word_id,
            passed = req.passed,
            stage = response.stage.as_str(),
            "Review recorded"
        );

        if let Some(key) = req.idempotency_key.as_deref() {
            self.review_receipts.store(user_id, key, response.clone());
        }
        Ok(response)
    }

    // ========================================================================
    // WORD BATCHES
    // ========================================================================

    /// Next unseen words after the highest word the user has a card for.
    pub async fn get_new_words(&self, user_id: UserId, limit: Option<usize>) -> ApiResult<Vec<lexis_core::Word>> {
        let limit = self.resolve_limit(limit, self.config.new_words_batch)?;
        let last_created = self.cache.lock(user_id).await?.last_created().unwrap_or(0);

        let words = self
            .with_timeout("word_list_after", self.store.word_list_after(last_created, limit))
            .await?;
        if words.is_empty() {
            return Err(LexisError::from(NotFoundError::EndOfWordBank { after: last_created }).into());
        }
        Ok(words)
    }

    /// Words currently due, oldest first. Waiting words whose time has come
    /// are promoted before the batch is taken. Empty when nothing is due.
    pub async fn get_review_words(&self, user_id: UserId, limit: Option<usize>) -> ApiResult<Vec<lexis_core::Word>> {
        let limit = self.resolve_limit(limit, self.config.review_batch)?;
        let due: Vec<WordId> = {
            let mut profile = self.cache.lock(user_id).await?;
            profile.due_batch(self.clock.now(), limit)
        };
        if due.is_empty() {
            return Ok(Vec::new());
        }

        let words = self
            .with_timeout("word_list_by_ids", self.store.word_list_by_ids(&due))
            .await?;
        if words.len() < due.len() {
            tracing::warn!(
                user_id,
                due = due.len(),
                found = words.len(),
                "Due words missing from the word bank"
            );
        }
        Ok(words)
    }

    /// Number of due words after promotion.
    pub async fn count_due(&self, user_id: UserId) -> ApiResult<usize> {
        let mut profile = self.cache.lock(user_id).await?;
        Ok(profile.count_due(self.clock.now()))
    }

    /// Stage counts for the user's profile, after promotion.
    pub async fn stats(&self, user_id: UserId) -> ApiResult<ProfileSnapshot> {
        let mut profile = self.cache.lock(user_id).await?;
        profile.promote_due(self.clock.now());
        Ok(profile.snapshot())
    }

    // ========================================================================
    // MAINTENANCE
    // ========================================================================

    /// Drop expired body-level idempotency receipts.
    pub fn purge_expired_receipts(&self) -> usize {
        self.card_receipts.purge_expired() + self.review_receipts.purge_expired()
    }

    // ========================================================================
    // HELPERS
    // ========================================================================

    /// Cards may only be created for words in the word bank. A phantom id
    /// would become the user's last created word and block the real ones.
    async fn ensure_word_exists(&self, word_id: WordId) -> ApiResult<()> {
        let found = self
            .with_timeout("word_list_by_ids", self.store.word_list_by_ids(&[word_id]))
            .await?;
        if found.iter().any(|w| w.id == word_id) {
            Ok(())
        } else {
            Err(LexisError::from(NotFoundError::WordNotFound { word_id }).into())
        }
    }

    fn resolve_limit(&self, limit: Option<usize>, default: usize) -> ApiResult<usize> {
        let limit = limit.unwrap_or(default);
        if limit == 0 || limit > self.config.max_batch {
            return Err(ValidationError::InvalidLimit {
                limit,
                max: self.config.max_batch,
            }
            .into());
        }
        Ok(limit)
    }

    async fn with_timeout<T, F>(&self, operation: &'static str, fut: F) -> Result<T, LexisError>
    where
        F: Future<Output = Result<T, LexisError>>,
    {
        match tokio::time::timeout(self.config.store_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(StorageError::Timeout {
                operation,
                elapsed: self.config.store_timeout,
            }
            .into()),
        }
    }
}

fn record_replay() {
    if let Ok(metrics) = METRICS.as_ref() {
        metrics.record_idempotent_replay("body");
    }
}

/// Map store-level constraint failures on card insert back to domain errors.
fn insert_error_as_domain(err: LexisError, user_id: UserId, word_id: WordId) -> LexisError {
    match err {
        LexisError::Storage(StorageError::InsertFailed { entity: "card", ref reason })
            if reason == "already exists" =>
        {
            tracing::warn!(user_id, word_id, "Card exists in store but not in review profile");
            ValidationError::CardAlreadyCreated { user_id, word_id }.into()
        }
        LexisError::Storage(StorageError::InsertFailed { entity: "card", ref reason })
            if reason == "unknown user or word" =>
        {
            NotFoundError::WordNotFound { word_id }.into()
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use chrono::Duration;
    use lexis_core::{ManualClock, Word};
    use lexis_storage::MemoryStore;

    const NOW: i64 = 1_704_067_200;

    fn word(id: WordId) -> Word {
        Word {
            id,
            latin_word: format!("latin-{id}"),
            native_word: format!("native-{id}"),
            cyrillic_word: None,
            transcription: None,
            image: None,
            legend: None,
            voice_id: None,
            sentences: Vec::new(),
        }
    }

    fn new_card(word_id: WordId, known: bool) -> NewCardRequest {
        NewCardRequest {
            known,
            word_id,
            idempotency_key: None,
        }
    }

    fn review(word_id: WordId, passed: bool) -> ReviewRequest {
        ReviewRequest {
            passed,
            word_id,
            idempotency_key: None,
        }
    }

    async fn service_with_words(n: i64) -> (CardService, MemoryStore, ManualClock) {
        let store = MemoryStore::with_words((1..=n).map(word));
        let clock = ManualClock::at_epoch_secs(NOW);
        let cache = Arc::new(ReviewCache::new());
        cache.mark_ready();
        let service = CardService::new(
            Arc::new(store.clone()),
            cache,
            Arc::new(clock.clone()),
            ReviewConfig::default(),
        );
        service.register_user(NewUser::new(1)).await.unwrap();
        (service, store, clock)
    }

    #[tokio::test]
    async fn test_create_card_unknown_is_due() {
        let (service, store, _clock) = service_with_words(3).await;

        let created = service.create_card(1, new_card(1, false)).await.unwrap();
        assert_eq!(created.count_of_views, NEW_CARD_VIEWS);
        assert_eq!(store.card_get(1, 1).await.unwrap().unwrap().count_of_views, 1);
        assert_eq!(service.count_due(1).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_create_card_known_is_mastered() {
        let (service, _store, _clock) = service_with_words(3).await;

        let created = service.create_card(1, new_card(1, true)).await.unwrap();
        assert_eq!(created.count_of_views, KNOWN_INITIAL_VIEWS);

        let stats = service.stats(1).await.unwrap();
        assert_eq!(stats.known, 1);
        assert_eq!(stats.mastered, 1);
        assert_eq!(stats.due, 0);
    }

    #[tokio::test]
    async fn test_create_card_twice_rejected() {
        let (service, store, _clock) = service_with_words(3).await;

        service.create_card(1, new_card(1, false)).await.unwrap();
        let err = service.create_card(1, new_card(1, false)).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::CardAlreadyCreated);
        assert_eq!(store.card_count(), 1);
    }

    #[tokio::test]
    async fn test_create_card_out_of_sequence() {
        let (service, _store, _clock) = service_with_words(5).await;

        service.create_card(1, new_card(3, false)).await.unwrap();
        let err = service.create_card(1, new_card(2, false)).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::CardOutOfSequence);
    }

    #[tokio::test]
    async fn test_card_for_missing_word_rejected() {
        let (service, store, _clock) = service_with_words(3).await;

        let err = service.create_card(1, new_card(999_999, false)).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::WordNotFound);
        assert_eq!(store.card_count(), 0);

        let stats = service.stats(1).await.unwrap();
        assert_eq!(stats.created, 0);
        assert_eq!(stats.last_created, None);

        service.create_card(1, new_card(1, false)).await.unwrap();
        let next = service.get_new_words(1, None).await.unwrap();
        assert_eq!(next.iter().map(|w| w.id).collect::<Vec<_>>(), vec![2, 3]);
        assert_eq!(service.count_due(1).await.unwrap(), 1);
        assert_eq!(service.get_review_words(1, None).await.unwrap().len(), 1);
    }

    #[test]
    fn test_foreign_key_insert_failure_maps_to_word_not_found() {
        let err = insert_error_as_domain(
            StorageError::InsertFailed {
                entity: "card",
                reason: "unknown user or word".to_string(),
            }
            .into(),
            1,
            42,
        );
        assert_eq!(err, NotFoundError::WordNotFound { word_id: 42 }.into());

        let err = insert_error_as_domain(
            StorageError::InsertFailed {
                entity: "card",
                reason: "already exists".to_string(),
            }
            .into(),
            1,
            42,
        );
        assert_eq!(err, ValidationError::CardAlreadyCreated { user_id: 1, word_id: 42 }.into());
    }

    #[tokio::test]
    async fn test_store_failure_leaves_profile_unchanged() {
        let (service, store, _clock) = service_with_words(3).await;

        store.set_unavailable(true);
        let err = service.create_card(1, new_card(1, false)).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ServiceUnavailable);

        store.set_unavailable(false);
        let stats = service.stats(1).await.unwrap();
        assert_eq!(stats.created, 0);
        service.create_card(1, new_card(1, false)).await.unwrap();
    }

    #[tokio::test]
    async fn test_slow_store_times_out_without_mutation() {
        let store = MemoryStore::with_words((1..=3).map(word));
        let clock = ManualClock::at_epoch_secs(NOW);
        let cache = Arc::new(ReviewCache::new());
        cache.mark_ready();
        let config = ReviewConfig {
            store_timeout: std::time::Duration::from_millis(20),
            ..ReviewConfig::default()
        };
        let service = CardService::new(Arc::new(store.clone()), cache, Arc::new(clock), config);
        service.register_user(NewUser::new(1)).await.unwrap();

        store.set_write_latency(Some(std::time::Duration::from_millis(200)));
        let err = service.create_card(1, new_card(1, false)).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::Timeout);
        assert_eq!(service.stats(1).await.unwrap().created, 0);
    }

    #[tokio::test]
    async fn test_review_pass_schedules_level_two() {
        let (service, store, clock) = service_with_words(3).await;
        service.create_card(1, new_card(1, false)).await.unwrap();

        let receipt = service.review_card(1, review(1, true)).await.unwrap();
        assert_eq!(receipt.count_of_views, 2);
        assert_eq!(receipt.next_review_at, Some(clock.now() + Duration::minutes(40)));
        assert_eq!(store.card_get(1, 1).await.unwrap().unwrap().count_of_views, 2);
        assert_eq!(service.count_due(1).await.unwrap(), 0);

        clock.advance(Duration::minutes(41));
        let words = service.get_review_words(1, None).await.unwrap();
        assert_eq!(words.iter().map(|w| w.id).collect::<Vec<_>>(), vec![1]);
    }

    #[tokio::test]
    async fn test_review_fail_requeues_without_persisting() {
        let (service, store, _clock) = service_with_words(3).await;
        service.create_card(1, new_card(1, false)).await.unwrap();
        service.create_card(1, new_card(2, false)).await.unwrap();

        let receipt = service.review_card(1, review(1, false)).await.unwrap();
        assert_eq!(receipt.count_of_views, 1);
        assert!(receipt.next_review_at.is_none());
        assert_eq!(store.card_get(1, 1).await.unwrap().unwrap().count_of_views, 1);

        let words = service.get_review_words(1, None).await.unwrap();
        assert_eq!(words.iter().map(|w| w.id).collect::<Vec<_>>(), vec![2, 1]);
    }

    #[tokio::test]
    async fn test_review_not_due_rejected() {
        let (service, _store, _clock) = service_with_words(3).await;
        service.create_card(1, new_card(1, false)).await.unwrap();
        service.review_card(1, review(1, true)).await.unwrap();

        let err = service.review_card(1, review(1, true)).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::WordNotDue);

        let err = service.review_card(1, review(9, true)).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::CardNotFound);
    }

    #[tokio::test]
    async fn test_review_replay_does_not_double_increment() {
        let (service, store, _clock) = service_with_words(3).await;
        service.create_card(1, new_card(1, false)).await.unwrap();

        let req = ReviewRequest {
            passed: true,
            word_id: 1,
            idempotency_key: Some("tap-1".to_string()),
        };
        let first = service.review_card(1, req.clone()).await.unwrap();
        let second = service.review_card(1, req).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(store.card_get(1, 1).await.unwrap().unwrap().count_of_views, 2);
    }

    #[tokio::test]
    async fn test_get_new_words_after_last_created() {
        let (service, _store, _clock) = service_with_words(10).await;

        let first = service.get_new_words(1, None).await.unwrap();
        assert_eq!(first.iter().map(|w| w.id).collect::<Vec<_>>(), vec![1, 2, 3, 4, 5]);

        service.create_card(1, new_card(8, true)).await.unwrap();
        let next = service.get_new_words(1, Some(5)).await.unwrap();
        assert_eq!(next.iter().map(|w| w.id).collect::<Vec<_>>(), vec![9, 10]);

        service.create_card(1, new_card(10, true)).await.unwrap();
        let err = service.get_new_words(1, None).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::EndOfWordBank);
    }

    #[tokio::test]
    async fn test_invalid_limit_rejected() {
        let (service, _store, _clock) = service_with_words(3).await;
        let err = service.get_new_words(1, Some(0)).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidRange);
        let err = service.get_review_words(1, Some(1_000)).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidRange);
    }

    #[tokio::test]
    async fn test_unregistered_user_has_no_profile() {
        let (service, _store, _clock) = service_with_words(3).await;
        let err = service.count_due(99).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ProfileNotFound);
    }

    #[tokio::test]
    async fn test_users_are_isolated() {
        let (service, _store, _clock) = service_with_words(3).await;
        service.register_user(NewUser::new(2)).await.unwrap();

        service.create_card(1, new_card(1, false)).await.unwrap();
        assert_eq!(service.count_due(1).await.unwrap(), 1);
        assert_eq!(service.count_due(2).await.unwrap(), 0);
        service.create_card(2, new_card(1, false)).await.unwrap();
    }
}
