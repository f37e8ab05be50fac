//! In-process cache layer for the review core.
//!
//! - [`ReviewCache`]: one [`lexis_core::ReviewProfile`] per user behind a
//!   per-user async mutex, plus the readiness flag that gates traffic until
//!   rehydration finishes.
//! - [`IdempotencyStore`]: user-scoped, TTL-bounded response cache.
//! - [`rebuild_all_profiles`]: startup rehydration from a [`crate::CardStore`].
//!
//! Persisted cards remain the source of truth; everything here can be
//! rebuilt from the store.

pub mod idempotency;
pub mod rehydrate;
pub mod review_cache;

pub use idempotency::{IdempotencyCheck, IdempotencyEntry, IdempotencyStore, DEFAULT_TTL};
pub use rehydrate::{build_profiles, rebuild_all_profiles, RehydrationReport, DEFAULT_CARD_LIMIT};
pub use review_cache::{ProfileGuard, ProfileHandle, ReviewCache};
