//! In-memory [`CardStore`] used for local runs and tests.

use crate::store::CardStore;
use async_trait::async_trait;
use lexis_core::{
    Card, LexisError, LexisResult, NewUser, StorageError, Timestamp, User, UserId,
    UserRegistration, Word, WordId,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

/// In-memory storage backed by locked maps.
///
/// Clones share state. Tests can make the store unavailable or slow to
/// exercise error and timeout paths.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    users: Arc<RwLock<HashMap<UserId, User>>>,
    cards: Arc<RwLock<BTreeMap<(UserId, WordId), Card>>>,
    words: Arc<RwLock<BTreeMap<WordId, Word>>>,
    unavailable: Arc<AtomicBool>,
    write_latency: Arc<RwLock<Option<Duration>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-loaded with a word bank.
    pub fn with_words(words: impl IntoIterator<Item = Word>) -> Self {
        let store = Self::new();
        store.insert_words(words);
        store
    }

    /// Add or replace word bank entries.
    pub fn insert_words(&self, words: impl IntoIterator<Item = Word>) {
        let mut map = self.words.write().unwrap_or_else(|e| e.into_inner());
        for word in words {
            map.insert(word.id, word);
        }
    }

    /// Insert a card row directly, bypassing the review core.
    pub fn seed_card(&self, card: Card) {
        let mut map = self.cards.write().unwrap_or_else(|e| e.into_inner());
        map.insert((card.user_id, card.word_id), card);
    }

    /// Insert a user row directly.
    pub fn seed_user(&self, user: User) {
        let mut map = self.users.write().unwrap_or_else(|e| e.into_inner());
        map.insert(user.id, user);
    }

    /// Make every operation fail with `StorageError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Delay every write by `latency` before it is applied.
    pub fn set_write_latency(&self, latency: Option<Duration>) {
        *self.write_latency.write().unwrap_or_else(|e| e.into_inner()) = latency;
    }

    pub fn user_count(&self) -> usize {
        self.users.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn card_count(&self) -> usize {
        self.cards.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn word_count(&self) -> usize {
        self.words.read().map(|m| m.len()).unwrap_or(0)
    }

    /// Drop all users and cards. The word bank is kept.
    pub fn clear(&self) {
        self.users.write().unwrap_or_else(|e| e.into_inner()).clear();
        self.cards.write().unwrap_or_else(|e| e.into_inner()).clear();
    }

    fn check_available(&self) -> LexisResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable {
                reason: "memory store marked unavailable".to_string(),
            }
            .into());
        }
        Ok(())
    }

    async fn before_write(&self) -> LexisResult<()> {
        self.check_available()?;
        let latency = *self.write_latency.read().map_err(|_| StorageError::LockPoisoned)?;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        Ok(())
    }
}

fn read<T>(lock: &RwLock<T>) -> LexisResult<RwLockReadGuard<'_, T>> {
    lock.read().map_err(|_| LexisError::from(StorageError::LockPoisoned))
}

fn write<T>(lock: &RwLock<T>) -> LexisResult<RwLockWriteGuard<'_, T>> {
    lock.write().map_err(|_| LexisError::from(StorageError::LockPoisoned))
}

#[async_trait]
impl CardStore for MemoryStore {
    async fn user_insert(&self, user: &NewUser, at: Timestamp) -> LexisResult<UserRegistration> {
        self.before_write().await?;
        let mut users = write(&self.users)?;
        if let Some(existing) = users.get(&user.id) {
            return Ok(UserRegistration::Existing(existing.clone()));
        }
        let created = User {
            id: user.id,
            first_name: user.first_name.clone(),
            username: user.username.clone(),
            created_at: at,
        };
        users.insert(user.id, created.clone());
        Ok(UserRegistration::Created(created))
    }

    async fn user_list_all(&self) -> LexisResult<Vec<User>> {
        self.check_available()?;
        let users = read(&self.users)?;
        let mut all: Vec<User> = users.values().cloned().collect();
        all.sort_by_key(|u| u.id);
        Ok(all)
    }

    async fn card_insert(&self, card: &Card) -> LexisResult<()> {
        self.before_write().await?;
        if card.count_of_views < 0 {
            return Err(StorageError::InsertFailed {
                entity: "card",
                reason: "count_of_views must be non-negative".to_string(),
            }
            .into());
        }
        let mut cards = write(&self.cards)?;
        let key = (card.user_id, card.word_id);
        if cards.contains_key(&key) {
            return Err(StorageError::InsertFailed {
                entity: "card",
                reason: "already exists".to_string(),
            }
            .into());
        }
        cards.insert(key, card.clone());
        Ok(())
    }

    async fn card_get(&self, user_id: UserId, word_id: WordId) -> LexisResult<Option<Card>> {
        self.check_available()?;
        let cards = read(&self.cards)?;
        Ok(cards.get(&(user_id, word_id)).cloned())
    }

    async fn card_list_by_user(&self, user_id: UserId, limit: usize) -> LexisResult<Vec<Card>> {
        self.check_available()?;
        let cards = read(&self.cards)?;
        Ok(cards
            .range((user_id, WordId::MIN)..=(user_id, WordId::MAX))
            .take(limit)
            .map(|(_, card)| card.clone())
            .collect())
    }

    async fn card_increment_views(
        &self,
        user_id: UserId,
        word_id: WordId,
        at: Timestamp,
    ) -> LexisResult<Card> {
        self.before_write().await?;
        let mut cards = write(&self.cards)?;
        let card = cards
            .get_mut(&(user_id, word_id))
            .ok_or_else(|| StorageError::NotFound {
                entity: "card",
                key: format!("{}:{}", user_id, word_id),
            })?;
        card.count_of_views = card.count_of_views.saturating_add(1);
        card.last_view = at;
        Ok(card.clone())
    }

    async fn word_list_after(&self, after: WordId, limit: usize) -> LexisResult<Vec<Word>> {
        self.check_available()?;
        let words = read(&self.words)?;
        Ok(words
            .range(after.saturating_add(1)..)
            .take(limit)
            .map(|(_, word)| word.clone())
            .collect())
    }

    async fn word_list_by_ids(&self, ids: &[WordId]) -> LexisResult<Vec<Word>> {
        self.check_available()?;
        let words = read(&self.words)?;
        Ok(ids.iter().filter_map(|id| words.get(id).cloned()).collect())
    }

    async fn health_check(&self) -> LexisResult<()> {
        self.check_available()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

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

    fn card(user_id: UserId, word_id: WordId) -> Card {
        Card {
            user_id,
            word_id,
            count_of_views: 1,
            last_view: DateTime::UNIX_EPOCH,
        }
    }

    #[tokio::test]
    async fn test_user_insert_reports_existing() {
        let store = MemoryStore::new();
        let first = store.user_insert(&NewUser::new(1), Utc::now()).await.unwrap();
        let second = store.user_insert(&NewUser::new(1), Utc::now()).await.unwrap();
        assert!(first.is_created());
        assert!(!second.is_created());
        assert_eq!(first.user().created_at, second.user().created_at);
        assert_eq!(store.user_count(), 1);
    }

    #[tokio::test]
    async fn test_card_insert_duplicate() {
        let store = MemoryStore::new();
        store.card_insert(&card(1, 1)).await.unwrap();
        let err = store.card_insert(&card(1, 1)).await.unwrap_err();
        assert!(matches!(
            err,
            LexisError::Storage(StorageError::InsertFailed { entity: "card", .. })
        ));
        store.card_insert(&card(2, 1)).await.unwrap();
        assert_eq!(store.card_count(), 2);
    }

    #[tokio::test]
    async fn test_card_increment_views() {
        let store = MemoryStore::new();
        store.card_insert(&card(1, 3)).await.unwrap();
        let at = Utc::now();
        let updated = store.card_increment_views(1, 3, at).await.unwrap();
        assert_eq!(updated.count_of_views, 2);
        assert_eq!(updated.last_view, at);

        let missing = store.card_increment_views(1, 4, at).await.unwrap_err();
        assert!(matches!(missing, LexisError::Storage(StorageError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_card_list_by_user_is_scoped_and_limited() {
        let store = MemoryStore::new();
        for word_id in 1..=5 {
            store.seed_card(card(1, word_id));
        }
        store.seed_card(card(2, 1));
        let cards = store.card_list_by_user(1, 3).await.unwrap();
        assert_eq!(cards.iter().map(|c| c.word_id).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert!(cards.iter().all(|c| c.user_id == 1));
    }

    #[tokio::test]
    async fn test_word_queries() {
        let store = MemoryStore::with_words([1, 2, 4, 7].map(word));
        let after = store.word_list_after(2, 5).await.unwrap();
        assert_eq!(after.iter().map(|w| w.id).collect::<Vec<_>>(), vec![4, 7]);
        assert!(store.word_list_after(7, 5).await.unwrap().is_empty());

        let by_ids = store.word_list_by_ids(&[7, 3, 1]).await.unwrap();
        assert_eq!(by_ids.iter().map(|w| w.id).collect::<Vec<_>>(), vec![7, 1]);
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_everything() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        assert!(store.health_check().await.unwrap_err().is_transient());
        assert!(store.card_insert(&card(1, 1)).await.is_err());
        assert!(store.user_list_all().await.is_err());
        store.set_unavailable(false);
        assert!(store.health_check().await.is_ok());
    }
}
