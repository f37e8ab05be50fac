//! Shared application state for Axum routers.

use std::sync::Arc;

use lexis_core::Clock;
use lexis_storage::{CardStore, IdempotencyStore, ReviewCache};

use crate::config::ReviewConfig;
use crate::middleware::StoredResponse;
use crate::services::CardService;

/// Header-level idempotency store shared by the middleware.
pub type HttpReceipts = IdempotencyStore<StoredResponse>;

/// Application-wide state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    /// Card orchestrator over the cache and store.
    pub service: CardService,
    pub store: Arc<dyn CardStore>,
    /// Review profiles, rebuilt from the store at startup.
    pub cache: Arc<ReviewCache>,
    /// Responses replayed for repeated `Idempotency-Key` headers.
    pub http_receipts: Arc<HttpReceipts>,
    pub clock: Arc<dyn Clock>,
    pub start_time: std::time::Instant,
}

impl AppState {
    /// Build the state around a store. The cache starts empty and closed
    /// until [`lexis_storage::rebuild_all_profiles`] opens it.
    pub fn new(store: Arc<dyn CardStore>, clock: Arc<dyn Clock>, config: ReviewConfig) -> Self {
        let cache = Arc::new(ReviewCache::new());
        let http_receipts = Arc::new(IdempotencyStore::new(config.idempotency_ttl, clock.clone()));
        let service = CardService::new(store.clone(), cache.clone(), clock.clone(), config);
        Self {
            service,
            store,
            cache,
            http_receipts,
            clock,
            start_time: std::time::Instant::now(),
        }
    }

    /// Rebuild every review profile from the store and open the cache.
    pub async fn rehydrate(&self) -> crate::error::ApiResult<lexis_storage::RehydrationReport> {
        let report = lexis_storage::rebuild_all_profiles(
            self.store.as_ref(),
            self.clock.as_ref(),
            &self.cache,
            self.service.config().rehydrate_card_limit,
        )
        .await?;
        if let Ok(metrics) = crate::telemetry::METRICS.as_ref() {
            metrics.set_cached_profiles(self.cache.len());
        }
        Ok(report)
    }

    /// Drop expired idempotency entries at both layers.
    pub fn purge_expired_idempotency(&self) -> usize {
        self.http_receipts.purge_expired() + self.service.purge_expired_receipts()
    }
}

crate::impl_from_ref!(CardService, service);
crate::impl_from_ref!(Arc<ReviewCache>, cache);
