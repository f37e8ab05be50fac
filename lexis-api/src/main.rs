//! Lexis API Server Entry Point
//!
//! Bootstraps configuration, picks the card store, rebuilds the review
//! cache and starts the Axum HTTP server.

use std::net::SocketAddr;
use std::sync::Arc;

use lexis_api::telemetry::{init_tracing, TelemetryConfig};
use lexis_api::{
    create_api_router, ApiConfig, ApiError, ApiResult, AppState, AuthConfig, DbConfig, PgStore,
    ReviewConfig, StoreBackend,
};
use lexis_core::{Clock, SystemClock, Word};
use lexis_storage::{CardStore, MemoryStore};

#[tokio::main]
async fn main() -> ApiResult<()> {
    let telemetry_config = TelemetryConfig::default();
    init_tracing(&telemetry_config)?;

    let api_config = ApiConfig::from_env();
    let auth_config = AuthConfig::from_env();
    let review_config = ReviewConfig::from_env();
    let purge_interval = review_config.purge_interval;

    let word_bank = read_word_bank()?;

    let store: Arc<dyn CardStore> = match StoreBackend::from_env() {
        StoreBackend::Postgres => {
            let db_config = DbConfig::from_env();
            let store = PgStore::from_config(&db_config)?;
            store.ensure_schema().await?;
            if let Some(words) = &word_bank {
                let imported = store.word_upsert(words).await?;
                tracing::info!(imported, "Word bank imported");
            }
            tracing::info!(host = %db_config.host, dbname = %db_config.dbname, "Using PostgreSQL store");
            Arc::new(store)
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store; nothing survives a restart");
            Arc::new(MemoryStore::with_words(word_bank.unwrap_or_default()))
        }
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let state = AppState::new(store, clock, review_config);

    // Startup barrier: card routes answer 503 until this completes
    state.rehydrate().await?;

    let purge_state = state.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(purge_interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let purged = purge_state.purge_expired_idempotency();
            if purged > 0 {
                tracing::debug!(purged, "Purged expired idempotency keys");
            }
        }
    });

    let app = create_api_router(state, &api_config, auth_config)?;

    let addr = resolve_bind_addr()?;
    tracing::info!(%addr, "Starting Lexis API server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;

    let server = axum::serve(listener, app);
    tokio::select! {
        result = server => {
            result.map_err(|e| ApiError::internal_error(format!("Server error: {}", e)))?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    Ok(())
}

/// Words from the JSON file named by `LEXIS_WORDS_FILE`, if set.
fn read_word_bank() -> ApiResult<Option<Vec<Word>>> {
    let Ok(path) = std::env::var("LEXIS_WORDS_FILE") else {
        return Ok(None);
    };
    let raw = std::fs::read_to_string(&path)
        .map_err(|e| ApiError::invalid_input(format!("Failed to read {}: {}", path, e)))?;
    let words: Vec<Word> = serde_json::from_str(&raw)?;
    tracing::info!(path = %path, words = words.len(), "Loaded word bank file");
    Ok(Some(words))
}

fn resolve_bind_addr() -> ApiResult<SocketAddr> {
    let host = std::env::var("LEXIS_API_BIND").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port_str = std::env::var("PORT")
        .ok()
        .or_else(|| std::env::var("LEXIS_API_PORT").ok())
        .unwrap_or_else(|| "3000".to_string());
    let port = port_str.parse::<u16>().map_err(|_| {
        ApiError::invalid_input(format!("Invalid port value: {}", port_str))
    })?;

    let addr = format!("{}:{}", host, port);
    addr.parse::<SocketAddr>().map_err(|e| {
        ApiError::invalid_input(format!("Invalid bind address {}: {}", addr, e))
    })
}
