//! API Configuration Module
//!
//! CORS and request settings for the HTTP layer, review tuning for the card
//! service, and the choice of backing store. Everything is loaded from
//! `LEXIS_*` environment variables with development defaults.

use lexis_storage::{DEFAULT_CARD_LIMIT, DEFAULT_TTL};
use std::time::Duration;

// ============================================================================
// API CONFIGURATION
// ============================================================================

/// API configuration for CORS and request handling.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    // ========================================================================
    // CORS Configuration
    // ========================================================================
    /// Allowed CORS origins (comma-separated in env var).
    /// Empty means allow all origins (dev mode).
    /// Example: "https://lexis.app,https://bot.lexis.app"
    pub cors_origins: Vec<String>,

    /// Whether to allow credentials in CORS requests.
    pub cors_allow_credentials: bool,

    /// Max age for CORS preflight cache in seconds.
    pub cors_max_age_secs: u64,

    // ========================================================================
    // Request Handling
    // ========================================================================
    /// Upper bound on a single request, middleware included.
    pub request_timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            cors_origins: Vec::new(), // Empty = allow all
            cors_allow_credentials: false,
            cors_max_age_secs: 86400, // 24 hours
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl ApiConfig {
    /// Create ApiConfig from environment variables.
    ///
    /// Environment variables:
    /// - `LEXIS_CORS_ORIGINS`: Comma-separated allowed origins (empty = allow all)
    /// - `LEXIS_CORS_ALLOW_CREDENTIALS`: "true" or "false" (default: false)
    /// - `LEXIS_CORS_MAX_AGE_SECS`: Preflight cache duration (default: 86400)
    /// - `LEXIS_REQUEST_TIMEOUT_SECS`: Per-request timeout (default: 30)
    pub fn from_env() -> Self {
        let cors_origins = std::env::var("LEXIS_CORS_ORIGINS")
            .ok()
            .map(|s| {
                s.split(',')
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let cors_allow_credentials = std::env::var("LEXIS_CORS_ALLOW_CREDENTIALS")
            .ok()
            .map(|s| s.to_lowercase() == "true")
            .unwrap_or(false);

        let cors_max_age_secs = std::env::var("LEXIS_CORS_MAX_AGE_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(86400);

        let request_timeout = std::env::var("LEXIS_REQUEST_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(30));

        Self {
            cors_origins,
            cors_allow_credentials,
            cors_max_age_secs,
            request_timeout,
        }
    }

    /// Check if running in production mode (strict CORS).
    pub fn is_production(&self) -> bool {
        !self.cors_origins.is_empty()
    }

    /// Check if a given origin is allowed.
    pub fn is_origin_allowed(&self, origin: &str) -> bool {
        if self.cors_origins.is_empty() {
            return true;
        }

        self.cors_origins.iter().any(|allowed| {
            if allowed == origin {
                return true;
            }
            // Wildcard subdomains: *.lexis.app
            if let Some(pattern) = allowed.strip_prefix("*.") {
                if let Some(origin_domain) = origin.strip_prefix("https://") {
                    return origin_domain.ends_with(&format!(".{}", pattern))
                        || origin_domain == pattern;
                }
            }
            false
        })
    }
}

// ============================================================================
// REVIEW CONFIGURATION
// ============================================================================

/// Tuning for the card service and review cache.
#[derive(Debug, Clone)]
pub struct ReviewConfig {
    /// How long idempotency receipts are kept.
    pub idempotency_ttl: Duration,

    /// Per-user card cap when rebuilding the cache at startup.
    pub rehydrate_card_limit: usize,

    /// Default size of a new-words batch.
    pub new_words_batch: usize,

    /// Default size of a review batch.
    pub review_batch: usize,

    /// Largest batch a client may ask for.
    pub max_batch: usize,

    /// Reject new cards whose word id is not above the last one created.
    pub enforce_sequence: bool,

    /// Budget for a single store write.
    pub store_timeout: Duration,

    /// How often expired idempotency keys are purged.
    pub purge_interval: Duration,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            idempotency_ttl: DEFAULT_TTL,
            rehydrate_card_limit: DEFAULT_CARD_LIMIT,
            new_words_batch: 5,
            review_batch: 20,
            max_batch: 100,
            enforce_sequence: true,
            store_timeout: Duration::from_secs(5),
            purge_interval: Duration::from_secs(60 * 60),
        }
    }
}

impl ReviewConfig {
    /// Create ReviewConfig from environment variables.
    ///
    /// Environment variables:
    /// - `LEXIS_IDEMPOTENCY_TTL_SECS` (default: 86400)
    /// - `LEXIS_REHYDRATE_CARD_LIMIT` (default: 10000)
    /// - `LEXIS_NEW_WORDS_BATCH` (default: 5)
    /// - `LEXIS_REVIEW_BATCH` (default: 20)
    /// - `LEXIS_MAX_BATCH` (default: 100)
    /// - `LEXIS_ENFORCE_SEQUENCE`: "true" or "false" (default: true)
    /// - `LEXIS_STORE_TIMEOUT_MS` (default: 5000)
    /// - `LEXIS_PURGE_INTERVAL_SECS` (default: 3600)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let idempotency_ttl = std::env::var("LEXIS_IDEMPOTENCY_TTL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.idempotency_ttl);

        let rehydrate_card_limit = std::env::var("LEXIS_REHYDRATE_CARD_LIMIT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.rehydrate_card_limit);

        let new_words_batch = std::env::var("LEXIS_NEW_WORDS_BATCH")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.new_words_batch);

        let review_batch = std::env::var("LEXIS_REVIEW_BATCH")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.review_batch);

        let max_batch = std::env::var("LEXIS_MAX_BATCH")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.max_batch);

        let enforce_sequence = std::env::var("LEXIS_ENFORCE_SEQUENCE")
            .ok()
            .map(|s| s.to_lowercase() != "false")
            .unwrap_or(defaults.enforce_sequence);

        let store_timeout = std::env::var("LEXIS_STORE_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.store_timeout);

        let purge_interval = std::env::var("LEXIS_PURGE_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.purge_interval);

        Self {
            idempotency_ttl,
            rehydrate_card_limit,
            new_words_batch,
            review_batch,
            max_batch,
            enforce_sequence,
            store_timeout,
            purge_interval,
        }
    }
}

// ============================================================================
// STORE SELECTION
// ============================================================================

/// Which [`lexis_storage::CardStore`] the binary runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Postgres,
}

impl StoreBackend {
    /// Read `LEXIS_STORE` ("memory" or "postgres"). Defaults to postgres.
    pub fn from_env() -> Self {
        match std::env::var("LEXIS_STORE").ok().as_deref() {
            Some(value) => Self::parse(value).unwrap_or_else(|| {
                tracing::warn!(value, "Unknown LEXIS_STORE value, using postgres");
                StoreBackend::Postgres
            }),
            None => StoreBackend::Postgres,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "memory" | "mem" => Some(StoreBackend::Memory),
            "postgres" | "postgresql" | "pg" => Some(StoreBackend::Postgres),
            _ => None,
        }
    }
}
