//! Startup rebuild of the review cache from persisted cards.

use super::review_cache::ReviewCache;
use crate::store::CardStore;
use lexis_core::{Clock, LexisResult, ReviewProfile, UserId};
use std::collections::HashMap;
use std::time::Instant;

/// Default per-user card cap for rehydration queries.
pub const DEFAULT_CARD_LIMIT: usize = 10_000;

/// Summary of a rehydration run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RehydrationReport {
    pub users: usize,
    pub cards: usize,
    pub due: usize,
    pub waiting: usize,
    pub mastered: usize,
    /// Users whose card list hit the limit and may be incomplete.
    pub truncated_users: usize,
}

/// Rebuild a profile for every stored user.
///
/// Returns `None` when the store has no users, so the caller can leave the
/// current cache untouched.
pub async fn build_profiles(
    store: &dyn CardStore,
    clock: &dyn Clock,
    card_limit: usize,
) -> LexisResult<Option<(HashMap<UserId, ReviewProfile>, RehydrationReport)>> {
    let users = store.user_list_all().await?;
    if users.is_empty() {
        return Ok(None);
    }

    let now = clock.now();
    let mut report = RehydrationReport {
        users: users.len(),
        ..RehydrationReport::default()
    };
    let mut profiles = HashMap::with_capacity(users.len());

    for user in users {
        let cards = store.card_list_by_user(user.id, card_limit).await?;
        if cards.len() >= card_limit {
            report.truncated_users += 1;
            tracing::warn!(
                user_id = user.id,
                card_limit,
                "Card list reached rehydration limit; profile may be incomplete"
            );
        }

        let mut profile = ReviewProfile::new(user.id);
        profile.restore_cards(&cards, now);

        let snapshot = profile.snapshot();
        report.cards += snapshot.created;
        report.due += snapshot.due;
        report.waiting += snapshot.waiting;
        report.mastered += snapshot.mastered;
        profiles.insert(user.id, profile);
    }

    Ok(Some((profiles, report)))
}

/// Rebuild every profile, install the result and open the cache.
///
/// Nothing is installed if any store call fails, and the cache stays closed.
/// An empty store is not an error: the cache is opened unchanged.
pub async fn rebuild_all_profiles(
    store: &dyn CardStore,
    clock: &dyn Clock,
    cache: &ReviewCache,
    card_limit: usize,
) -> LexisResult<RehydrationReport> {
    let started = Instant::now();
    let report = match build_profiles(store, clock, card_limit).await? {
        Some((profiles, report)) => {
            cache.install(profiles);
            report
        }
        None => {
            tracing::info!("No users found; review cache left unchanged");
            RehydrationReport::default()
        }
    };
    cache.mark_ready();

    tracing::info!(
        users = report.users,
        cards = report.cards,
        due = report.due,
        waiting = report.waiting,
        mastered = report.mastered,
        truncated_users = report.truncated_users,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Review cache rehydrated"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;
    use chrono::{DateTime, Duration};
    use lexis_core::{Card, ManualClock, User, MASTERY_THRESHOLD};

    const NOW: i64 = 1_704_067_200;

    fn user(id: UserId) -> User {
        User {
            id,
            first_name: None,
            username: None,
            created_at: DateTime::UNIX_EPOCH,
        }
    }

    fn card(user_id: UserId, word_id: i64, views: i32, minutes_ago: i64) -> Card {
        Card {
            user_id,
            word_id,
            count_of_views: views,
            last_view: DateTime::from_timestamp(NOW, 0).unwrap() - Duration::minutes(minutes_ago),
        }
    }

    #[tokio::test]
    async fn test_empty_store_leaves_cache_unchanged_and_ready() {
        let store = MemoryStore::new();
        let cache = ReviewCache::new();
        cache.ensure_profile(7);
        let clock = ManualClock::at_epoch_secs(NOW);

        let report = rebuild_all_profiles(&store, &clock, &cache, DEFAULT_CARD_LIMIT)
            .await
            .unwrap();
        assert_eq!(report, RehydrationReport::default());
        assert!(cache.is_ready());
        assert!(cache.contains(7));
    }

    #[tokio::test]
    async fn test_rebuild_partitions_cards() {
        let store = MemoryStore::new();
        store.seed_user(user(1));
        store.seed_user(user(2));
        // level 2: 40 minutes
        store.seed_card(card(1, 1, 1, 60));
        store.seed_card(card(1, 2, 1, 10));
        store.seed_card(card(1, 3, MASTERY_THRESHOLD, 0));
        store.seed_card(card(2, 1, 5, 10));

        let cache = ReviewCache::new();
        let clock = ManualClock::at_epoch_secs(NOW);
        let report = rebuild_all_profiles(&store, &clock, &cache, DEFAULT_CARD_LIMIT)
            .await
            .unwrap();

        assert_eq!(report.users, 2);
        assert_eq!(report.cards, 4);
        assert_eq!((report.due, report.waiting, report.mastered), (1, 2, 1));

        let first = cache.lock(1).await.unwrap();
        assert_eq!(first.due_words().collect::<Vec<_>>(), vec![1]);
        assert!(first.is_waiting(2));
        assert!(first.is_mastered(3));
        assert!(first.is_consistent());
        drop(first);

        let second = cache.lock(2).await.unwrap();
        assert!(second.is_waiting(1));
    }

    #[tokio::test]
    async fn test_user_without_cards_gets_empty_profile() {
        let store = MemoryStore::new();
        store.seed_user(user(3));
        let cache = ReviewCache::new();
        let clock = ManualClock::at_epoch_secs(NOW);
        rebuild_all_profiles(&store, &clock, &cache, DEFAULT_CARD_LIMIT)
            .await
            .unwrap();
        let profile = cache.lock(3).await.unwrap();
        assert_eq!(profile.snapshot().created, 0);
    }

    #[tokio::test]
    async fn test_card_limit_is_reported() {
        let store = MemoryStore::new();
        store.seed_user(user(1));
        for word_id in 1..=5 {
            store.seed_card(card(1, word_id, 1, 120));
        }
        let clock = ManualClock::at_epoch_secs(NOW);
        let (profiles, report) = build_profiles(&store, &clock, 3).await.unwrap().unwrap();
        assert_eq!(report.truncated_users, 1);
        assert_eq!(profiles[&1].snapshot().created, 3);
    }

    #[tokio::test]
    async fn test_store_failure_keeps_cache_closed() {
        let store = MemoryStore::new();
        store.seed_user(user(1));
        store.set_unavailable(true);
        let cache = ReviewCache::new();
        let clock = ManualClock::at_epoch_secs(NOW);

        let err = rebuild_all_profiles(&store, &clock, &cache, DEFAULT_CARD_LIMIT)
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert!(!cache.is_ready());
        assert!(cache.is_empty());
    }
}
