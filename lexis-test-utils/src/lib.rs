//! Lexis Test Utilities
//!
//! Shared test infrastructure for the Lexis workspace:
//! - Fixtures for words, users and cards at a fixed instant
//! - [`TestApp`]: the full HTTP router over a memory store and manual clock
//! - Proptest generators for review histories

pub use lexis_core::{
    Card, Clock, ManualClock, Sentence, Timestamp, User, UserId, Word, WordId,
    MASTERY_THRESHOLD,
};
pub use lexis_storage::{MemoryStore, ReviewCache};

use chrono::DateTime;
use lexis_api::{
    create_api_router, generate_jwt_token, ApiConfig, ApiResult, AppState, AuthConfig, JwtSecret,
    ReviewConfig,
};
use std::sync::Arc;

/// 2024-01-01T00:00:00Z, the instant every fixture clock starts at.
pub const FIXTURE_EPOCH_SECS: i64 = 1_704_067_200;

/// Signing secret used by [`TestApp`] tokens.
pub const TEST_JWT_SECRET: &str = "lexis-test-secret-that-is-long-enough-for-hs256";

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    use super::*;

    /// Clock frozen at [`FIXTURE_EPOCH_SECS`].
    pub fn clock() -> ManualClock {
        ManualClock::at_epoch_secs(FIXTURE_EPOCH_SECS)
    }

    pub fn fixture_now() -> Timestamp {
        DateTime::from_timestamp(FIXTURE_EPOCH_SECS, 0).unwrap_or(DateTime::UNIX_EPOCH)
    }

    /// A word with two example sentences.
    pub fn word(id: WordId) -> Word {
        Word {
            id,
            latin_word: format!("rec{id}"),
            native_word: format!("word {id}"),
            cyrillic_word: Some(format!("реч{id}")),
            transcription: None,
            image: None,
            legend: None,
            voice_id: None,
            sentences: (1..=2)
                .map(|n| Sentence {
                    id: id * 10 + n,
                    word_id: id,
                    native_text: format!("sentence {n} for word {id}"),
                    foreign_text: format!("rečenica {n} za reč {id}"),
                })
                .collect(),
        }
    }

    /// Words `1..=n`.
    pub fn word_bank(n: i64) -> Vec<Word> {
        (1..=n).map(word).collect()
    }

    pub fn user(id: UserId) -> User {
        User {
            id,
            first_name: Some(format!("Learner {id}")),
            username: None,
            created_at: DateTime::UNIX_EPOCH,
        }
    }

    pub fn card(user_id: UserId, word_id: WordId, count_of_views: i32, last_view: Timestamp) -> Card {
        Card {
            user_id,
            word_id,
            count_of_views,
            last_view,
        }
    }

    /// Memory store holding `words` words and the given users.
    pub fn seeded_store(words: i64, users: &[UserId]) -> MemoryStore {
        let store = MemoryStore::with_words(word_bank(words));
        for id in users {
            store.seed_user(user(*id));
        }
        store
    }
}

// ============================================================================
// TEST APP
// ============================================================================

/// Full API router over a memory store, sharing one manual clock between
/// scheduling, idempotency TTLs and token validation.
pub struct TestApp {
    pub router: axum::Router,
    pub state: AppState,
    pub store: MemoryStore,
    pub clock: ManualClock,
    pub auth: AuthConfig,
}

impl TestApp {
    /// Build the router without rehydrating. Card routes answer 503.
    pub fn cold(store: MemoryStore) -> ApiResult<Self> {
        Self::cold_with_config(store, ReviewConfig::default())
    }

    pub fn cold_with_config(store: MemoryStore, config: ReviewConfig) -> ApiResult<Self> {
        let clock = fixtures::clock();
        let state = AppState::new(Arc::new(store.clone()), Arc::new(clock.clone()), config);
        let auth = AuthConfig {
            jwt_secret: JwtSecret::new(TEST_JWT_SECRET.to_string())?,
            clock: Arc::new(clock.clone()),
            ..AuthConfig::default()
        };
        let router = create_api_router(state.clone(), &ApiConfig::default(), auth.clone())?;
        Ok(Self {
            router,
            state,
            store,
            clock,
            auth,
        })
    }

    /// Build the router and rehydrate the cache from `store`.
    pub async fn start(store: MemoryStore) -> ApiResult<Self> {
        let app = Self::cold(store)?;
        app.state.rehydrate().await?;
        Ok(app)
    }

    /// Bearer header value for `user_id`.
    pub fn bearer(&self, user_id: UserId) -> ApiResult<String> {
        Ok(format!("Bearer {}", generate_jwt_token(&self.auth, user_id)?))
    }
}

// ============================================================================
// GENERATORS
// ============================================================================

pub mod generators {
    use super::*;
    use proptest::prelude::*;

    /// Persisted view counts, including counts past the mastery threshold.
    pub fn arb_count_of_views() -> impl Strategy<Value = i32> {
        0i32..=MASTERY_THRESHOLD + 5
    }

    /// A card for `user_id` whose last view is up to ~4 years before the fixture epoch.
    pub fn arb_card(user_id: UserId, word_id: WordId) -> impl Strategy<Value = Card> {
        (arb_count_of_views(), 0i64..2_000_000).prop_map(move |(views, minutes_ago)| Card {
            user_id,
            word_id,
            count_of_views: views,
            last_view: fixtures::fixture_now() - chrono::Duration::minutes(minutes_ago),
        })
    }

    /// Review outcomes (pass = true) with minutes to advance before each.
    pub fn arb_review_history() -> impl Strategy<Value = Vec<(bool, i64)>> {
        prop::collection::vec((any::<bool>(), 0i64..100_000), 0..30)
    }
}
