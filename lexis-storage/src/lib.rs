//! Lexis Storage - Card Store Trait, Memory Store and Review Cache
//!
//! Defines the persistence seam the review core consumes and the in-memory
//! state built on top of it. The PostgreSQL implementation lives in
//! lexis-api.

pub mod cache;
pub mod memory;
pub mod store;

pub use cache::{
    build_profiles, rebuild_all_profiles, IdempotencyCheck, IdempotencyEntry, IdempotencyStore,
    ProfileGuard, ProfileHandle, RehydrationReport, ReviewCache, DEFAULT_CARD_LIMIT, DEFAULT_TTL,
};
pub use memory::MemoryStore;
pub use store::CardStore;
