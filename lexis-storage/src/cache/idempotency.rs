//! User-scoped idempotency store.
//!
//! Maps `(user_id, client_key)` to the response produced the first time the
//! key was used. Entries expire after a fixed TTL. Expired entries are
//! evicted lazily on lookup and in bulk by [`IdempotencyStore::purge_expired`].
//!
//! The same type backs the `Idempotency-Key` header middleware (which stores
//! a request fingerprint alongside the response) and the `idempotency_key`
//! body field handled by the card service.
//!
//! [`IdempotencyStore::begin`] also claims the key while the first request
//! runs, so a concurrent duplicate sees [`IdempotencyCheck::InFlight`]
//! instead of executing twice.

use chrono::Duration as ChronoDuration;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use lexis_core::{Clock, SystemClock, Timestamp, UserId};
use std::sync::Arc;
use std::time::Duration;

/// Default TTL for idempotency keys (24 hours).
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Stored response for one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyEntry<R> {
    pub stored_at: Timestamp,
    /// Hash of the originating request, when the caller tracks one.
    pub fingerprint: Option<Vec<u8>>,
    pub response: R,
}

/// Result of looking up a key together with a request fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdempotencyCheck<R> {
    /// Key unseen or expired; run the request.
    New,
    /// Key seen with the same request; return the stored response.
    Replay(R),
    /// Key seen with a different request.
    Conflict,
    /// Another request holding this key has not finished yet.
    InFlight,
}

/// Time-boxed, user-scoped response cache.
pub struct IdempotencyStore<R> {
    entries: DashMap<(UserId, String), IdempotencyEntry<R>>,
    in_flight: DashMap<(UserId, String), ()>,
    ttl: ChronoDuration,
    clock: Arc<dyn Clock>,
}

impl<R> std::fmt::Debug for IdempotencyStore<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdempotencyStore")
            .field("entries", &self.entries.len())
            .field("in_flight", &self.in_flight.len())
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl<R: Clone> Default for IdempotencyStore<R> {
    fn default() -> Self {
        Self::new(DEFAULT_TTL, Arc::new(SystemClock))
    }
}

impl<R: Clone> IdempotencyStore<R> {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            in_flight: DashMap::new(),
            ttl: ChronoDuration::from_std(ttl).unwrap_or(ChronoDuration::MAX),
            clock,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl.to_std().unwrap_or(DEFAULT_TTL)
    }

    fn is_expired(&self, entry: &IdempotencyEntry<R>, now: Timestamp) -> bool {
        now.signed_duration_since(entry.stored_at) >= self.ttl
    }

    fn live_entry(&self, user_id: UserId, key: &str) -> Option<IdempotencyEntry<R>> {
        let scoped = (user_id, key.to_string());
        let now = self.clock.now();
        self.entries
            .remove_if(&scoped, |_, entry| self.is_expired(entry, now));
        self.entries.get(&scoped).map(|entry| entry.value().clone())
    }

    /// Stored response for `(user_id, key)`, if still within the TTL.
    pub fn check(&self, user_id: UserId, key: &str) -> Option<R> {
        self.live_entry(user_id, key).map(|entry| entry.response)
    }

    /// Look up a key and compare the stored request fingerprint.
    ///
    /// Entries stored without a fingerprint replay for any request.
    pub fn check_fingerprint(&self, user_id: UserId, key: &str, fingerprint: &[u8]) -> IdempotencyCheck<R> {
        match self.live_entry(user_id, key) {
            None => IdempotencyCheck::New,
            Some(entry) => match entry.fingerprint {
                Some(stored) if stored != fingerprint => IdempotencyCheck::Conflict,
                _ => IdempotencyCheck::Replay(entry.response),
            },
        }
    }

    /// Look up a key and, when it is new, claim it until [`Self::release`].
    ///
    /// A stored response is inserted before its claim is released, so a
    /// caller that wins the claim after another finished sees the replay.
    pub fn begin(&self, user_id: UserId, key: &str, fingerprint: &[u8]) -> IdempotencyCheck<R> {
        match self.in_flight.entry((user_id, key.to_string())) {
            Entry::Occupied(_) => IdempotencyCheck::InFlight,
            Entry::Vacant(slot) => {
                let check = self.check_fingerprint(user_id, key, fingerprint);
                if matches!(check, IdempotencyCheck::New) {
                    slot.insert(());
                }
                check
            }
        }
    }

    /// Drop the claim taken by [`Self::begin`].
    pub fn release(&self, user_id: UserId, key: &str) {
        self.in_flight.remove(&(user_id, key.to_string()));
    }

    /// Whether a request holding `(user_id, key)` is still running.
    pub fn is_in_flight(&self, user_id: UserId, key: &str) -> bool {
        self.in_flight.contains_key(&(user_id, key.to_string()))
    }

    /// Record the response produced for `(user_id, key)`.
    pub fn store(&self, user_id: UserId, key: &str, response: R) {
        self.insert(user_id, key, None, response);
    }

    /// Record a response together with the request fingerprint.
    pub fn store_with_fingerprint(&self, user_id: UserId, key: &str, fingerprint: Vec<u8>, response: R) {
        self.insert(user_id, key, Some(fingerprint), response);
    }

    fn insert(&self, user_id: UserId, key: &str, fingerprint: Option<Vec<u8>>, response: R) {
        self.entries.insert(
            (user_id, key.to_string()),
            IdempotencyEntry {
                stored_at: self.clock.now(),
                fingerprint,
                response,
            },
        );
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !self.is_expired(entry, now));
        before.saturating_sub(self.entries.len())
    }

    /// Number of stored entries, including expired ones not yet evicted.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}
