//! Process-wide review profile cache with per-user exclusive access.
//!
//! Each user's [`ReviewProfile`] sits behind its own async mutex. Holding the
//! guard serialises every read-modify-write for that user while other users
//! proceed in parallel. The map shard lock is never held across an await:
//! handles are cloned out of the map first and locked afterwards.

use dashmap::DashMap;
use lexis_core::{CacheError, ProfileSnapshot, ReviewProfile, UserId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Shared handle to one user's profile.
pub type ProfileHandle = Arc<Mutex<ReviewProfile>>;

/// Exclusive access to one user's profile.
pub type ProfileGuard = OwnedMutexGuard<ReviewProfile>;

/// Review profiles for every known user.
#[derive(Debug, Default)]
pub struct ReviewCache {
    profiles: DashMap<UserId, ProfileHandle>,
    ready: AtomicBool,
}

impl ReviewCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether rehydration has completed and the cache may serve reads.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Open the cache for request traffic.
    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    /// Get or create the profile for `user_id`.
    pub fn ensure_profile(&self, user_id: UserId) -> ProfileHandle {
        self.profiles
            .entry(user_id)
            .or_insert_with(|| Arc::new(Mutex::new(ReviewProfile::new(user_id))))
            .clone()
    }

    /// Handle for an existing profile.
    pub fn profile(&self, user_id: UserId) -> Result<ProfileHandle, CacheError> {
        if !self.is_ready() {
            return Err(CacheError::NotReady);
        }
        self.profiles
            .get(&user_id)
            .map(|entry| entry.value().clone())
            .ok_or(CacheError::ProfileMissing { user_id })
    }

    /// Lock a user's profile for a read-modify-write.
    pub async fn lock(&self, user_id: UserId) -> Result<ProfileGuard, CacheError> {
        let handle = self.profile(user_id)?;
        Ok(handle.lock_owned().await)
    }

    /// Install rebuilt profiles, replacing any entry for the same user.
    ///
    /// Users absent from `profiles` keep their current entry, so a user
    /// registered while rehydration was running is not dropped.
    pub fn install(&self, profiles: HashMap<UserId, ReviewProfile>) {
        for (user_id, profile) in profiles {
            self.profiles.insert(user_id, Arc::new(Mutex::new(profile)));
        }
    }

    /// Snapshot of a user's counts, taken under that user's lock.
    pub async fn snapshot(&self, user_id: UserId) -> Result<ProfileSnapshot, CacheError> {
        let guard = self.lock(user_id).await?;
        Ok(guard.snapshot())
    }

    /// Number of cached profiles.
    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    pub fn contains(&self, user_id: UserId) -> bool {
        self.profiles.contains_key(&user_id)
    }
}
