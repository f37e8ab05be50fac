//! Idempotency Middleware for Lexis API
//!
//! Transport-level idempotency for POST/PUT/PATCH/DELETE requests carrying an
//! `Idempotency-Key` header. Keys are scoped to the authenticated user and
//! kept in an in-process [`IdempotencyStore`] for the configured TTL.
//!
//! 1. Key seen with the same request hash: replay the stored response
//! 2. Key seen with a different request hash: 409 Conflict
//! 3. Key unseen: run the request and store a successful response
//! 4. Key still held by a running request: 409 Conflict, retry later
//!
//! Only 2xx responses are stored, so a request that failed can be retried
//! with the same key.
//!
//! ```ignore
//! let state = IdempotencyState::new(Arc::new(IdempotencyStore::default()));
//!
//! let app = Router::new()
//!     .route("/api/v1/cards", axum::routing::post(create_card))
//!     .layer(middleware::from_fn_with_state(state, idempotency_middleware))
//!     .layer(middleware::from_fn_with_state(auth_state, auth_middleware));
//! ```

use crate::auth::AuthContext;
use crate::error::ApiError;
use crate::telemetry::METRICS;
use axum::{
    body::{Body, Bytes},
    extract::{Request, State},
    http::{header, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use lexis_core::UserId;
use lexis_storage::{IdempotencyCheck, IdempotencyStore};
use sha2::{Digest, Sha256};
use std::sync::Arc;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Header name for idempotency key
pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

/// Header set on replayed responses
pub const IDEMPOTENCY_REPLAY_HEADER: &str = "x-idempotency-replay";

/// Maximum size of request body read for hashing (1MB)
pub const MAX_BODY_HASH_SIZE: usize = 1024 * 1024;

/// Longest accepted idempotency key
pub const MAX_KEY_LENGTH: usize = 256;

// ============================================================================
// STATE
// ============================================================================

/// Response kept for replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

/// Configuration for idempotency middleware.
#[derive(Debug, Clone)]
pub struct IdempotencyConfig {
    /// Maximum request body size considered for hashing
    pub max_body_size: usize,

    /// Whether mutating requests must carry a key
    pub require_key: bool,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            max_body_size: MAX_BODY_HASH_SIZE,
            require_key: false,
        }
    }
}

/// Shared state for idempotency middleware.
#[derive(Debug, Clone)]
pub struct IdempotencyState {
    pub store: Arc<IdempotencyStore<StoredResponse>>,
    pub config: IdempotencyConfig,
}

impl IdempotencyState {
    pub fn new(store: Arc<IdempotencyStore<StoredResponse>>) -> Self {
        Self {
            store,
            config: IdempotencyConfig::default(),
        }
    }

    pub fn with_config(store: Arc<IdempotencyStore<StoredResponse>>, config: IdempotencyConfig) -> Self {
        Self { store, config }
    }
}

// ============================================================================
// MIDDLEWARE
// ============================================================================

/// Axum middleware for idempotency key handling.
///
/// Must run after `auth_middleware`: keys are scoped by the caller's user id.
pub async fn idempotency_middleware(
    State(state): State<IdempotencyState>,
    request: Request,
    next: Next,
) -> Result<Response, IdempotencyError> {
    let method = request.method().clone();
    if !is_mutating_method(&method) {
        return Ok(next.run(request).await);
    }

    let idempotency_key = match request
        .headers()
        .get(IDEMPOTENCY_KEY_HEADER)
        .map(|h| h.to_str().map(str::to_string))
    {
        Some(Ok(key)) => {
            if key.is_empty() || key.len() > MAX_KEY_LENGTH {
                return Err(IdempotencyError::InvalidKey(format!(
                    "Idempotency key must be 1-{} characters",
                    MAX_KEY_LENGTH
                )));
            }
            key
        }
        Some(Err(_)) => {
            return Err(IdempotencyError::InvalidKey(
                "Idempotency key must be visible ASCII".to_string(),
            ))
        }
        None => {
            if state.config.require_key {
                return Err(IdempotencyError::MissingKey);
            }
            return Ok(next.run(request).await);
        }
    };

    let user_id = request
        .extensions()
        .get::<AuthContext>()
        .map(|ctx| ctx.user_id)
        .ok_or_else(|| {
            IdempotencyError::Internal(
                "Auth context missing, ensure auth middleware runs first".to_string(),
            )
        })?;

    let (parts, body) = request.into_parts();
    let body_bytes = axum::body::to_bytes(body, state.config.max_body_size)
        .await
        .map_err(|e| IdempotencyError::InvalidBody(format!("Failed to read request body: {}", e)))?;

    let request_hash = compute_request_hash(&method, parts.uri.path(), &body_bytes);

    match state
        .store
        .begin(user_id, &idempotency_key, &request_hash)
    {
        IdempotencyCheck::Replay(stored) => {
            tracing::debug!(
                user_id,
                idempotency_key = %idempotency_key,
                "Returning cached response for idempotency key"
            );
            if let Ok(metrics) = METRICS.as_ref() {
                metrics.record_idempotent_replay("header");
            }
            replay_response(stored)
        }
        IdempotencyCheck::Conflict => {
            tracing::warn!(
                user_id,
                idempotency_key = %idempotency_key,
                request_hash = %hex::encode(&request_hash),
                "Idempotency key reused with a different request"
            );
            Err(IdempotencyError::Conflict(idempotency_key))
        }
        IdempotencyCheck::InFlight => {
            tracing::debug!(
                user_id,
                idempotency_key = %idempotency_key,
                "Idempotency key held by a running request"
            );
            Err(IdempotencyError::InProgress(idempotency_key))
        }
        IdempotencyCheck::New => {
            let _claim = InFlightClaim {
                store: &state.store,
                user_id,
                key: &idempotency_key,
            };
            let request = Request::from_parts(parts, Body::from(body_bytes));
            let response = next.run(request).await;

            if !response.status().is_success() {
                return Ok(response);
            }

            let (resp_parts, resp_body) = response.into_parts();
            let resp_bytes = axum::body::to_bytes(resp_body, usize::MAX)
                .await
                .map_err(|e| IdempotencyError::Internal(format!("Failed to read response body: {}", e)))?;

            state.store.store_with_fingerprint(
                user_id,
                &idempotency_key,
                request_hash,
                StoredResponse {
                    status: resp_parts.status.as_u16(),
                    content_type: resp_parts
                        .headers
                        .get(header::CONTENT_TYPE)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string),
                    body: resp_bytes.clone(),
                },
            );

            Ok(Response::from_parts(resp_parts, Body::from(resp_bytes)))
        }
    }
}

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// Releases the key's in-flight claim when the request finishes or is dropped.
struct InFlightClaim<'a> {
    store: &'a IdempotencyStore<StoredResponse>,
    user_id: UserId,
    key: &'a str,
}

impl Drop for InFlightClaim<'_> {
    fn drop(&mut self) {
        self.store.release(self.user_id, self.key);
    }
}

/// Check if the HTTP method is a mutating operation.
fn is_mutating_method(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

/// Compute SHA-256 hash of method + path + body.
fn compute_request_hash(method: &Method, path: &str, body: &Bytes) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(method.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(path.as_bytes());
    hasher.update(b"|");
    hasher.update(body);
    hasher.finalize().to_vec()
}

fn replay_response(stored: StoredResponse) -> Result<Response, IdempotencyError> {
    let status = StatusCode::from_u16(stored.status).unwrap_or(StatusCode::OK);
    let mut builder = Response::builder()
        .status(status)
        .header(IDEMPOTENCY_REPLAY_HEADER, "true");
    if let Some(content_type) = stored.content_type {
        builder = builder.header(header::CONTENT_TYPE, content_type);
    }
    builder
        .body(Body::from(stored.body))
        .map_err(|e| IdempotencyError::Internal(format!("Failed to build response: {}", e)))
}

// ============================================================================
// ERROR HANDLING
// ============================================================================

/// Errors that can occur in idempotency middleware.
#[derive(Debug)]
pub enum IdempotencyError {
    /// Idempotency key is required but not provided
    MissingKey,

    /// Idempotency key format is invalid
    InvalidKey(String),

    /// Request body could not be read
    InvalidBody(String),

    /// Key exists but request hash doesn't match (different request)
    Conflict(String),

    /// Key is held by a request that has not finished
    InProgress(String),

    /// Internal error
    Internal(String),
}

impl IntoResponse for IdempotencyError {
    fn into_response(self) -> Response {
        let error = match self {
            IdempotencyError::MissingKey => ApiError::missing_field(IDEMPOTENCY_KEY_HEADER),
            IdempotencyError::InvalidKey(msg) => ApiError::invalid_format(IDEMPOTENCY_KEY_HEADER, &msg),
            IdempotencyError::InvalidBody(msg) => ApiError::invalid_input(msg),
            IdempotencyError::Conflict(key) => ApiError::idempotency_conflict(&key),
            IdempotencyError::InProgress(key) => ApiError::idempotency_in_progress(&key),
            IdempotencyError::Internal(msg) => {
                tracing::error!(error = %msg, "Idempotency middleware internal error");
                ApiError::internal_error("Internal server error")
            }
        };
        error.into_response()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use axum::{middleware, routing::post, Router};
    use lexis_core::ManualClock;
    use lexis_storage::DEFAULT_TTL;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;
    use tower::ServiceExt;

    #[test]
    fn test_is_mutating_method() {
        assert!(is_mutating_method(&Method::POST));
        assert!(is_mutating_method(&Method::PUT));
        assert!(is_mutating_method(&Method::PATCH));
        assert!(is_mutating_method(&Method::DELETE));
        assert!(!is_mutating_method(&Method::GET));
        assert!(!is_mutating_method(&Method::HEAD));
        assert!(!is_mutating_method(&Method::OPTIONS));
    }

    #[test]
    fn test_compute_request_hash_deterministic() {
        let body = Bytes::from(r#"{"word_id": 1}"#);
        let hash1 = compute_request_hash(&Method::POST, "/api/v1/cards", &body);
        let hash2 = compute_request_hash(&Method::POST, "/api/v1/cards", &body);
        assert_eq!(hash1, hash2);
    }

    #[test]
    fn test_compute_request_hash_different_for_different_inputs() {
        let body = Bytes::from(r#"{"word_id": 1}"#);
        let hash1 = compute_request_hash(&Method::POST, "/api/v1/cards", &body);
        assert_ne!(hash1, compute_request_hash(&Method::PATCH, "/api/v1/cards", &body));
        assert_ne!(hash1, compute_request_hash(&Method::POST, "/api/v1/users", &body));
        let other_body = Bytes::from(r#"{"word_id": 2}"#);
        assert_ne!(hash1, compute_request_hash(&Method::POST, "/api/v1/cards", &other_body));
    }

    #[test]
    fn test_idempotency_config_default() {
        let config = IdempotencyConfig::default();
        assert_eq!(config.max_body_size, MAX_BODY_HASH_SIZE);
        assert!(!config.require_key);
    }

    /// Router whose handler counts executions and echoes the body length.
    fn counting_app(calls: Arc<AtomicUsize>, status: StatusCode) -> Router {
        let store = Arc::new(IdempotencyStore::new(
            DEFAULT_TTL,
            Arc::new(ManualClock::at_epoch_secs(1_704_067_200)),
        ));
        Router::new()
            .route(
                "/act",
                post(move |body: Bytes| {
                    let calls = calls.clone();
                    async move {
                        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                        (status, axum::Json(serde_json::json!({ "call": n, "len": body.len() })))
                    }
                }),
            )
            .layer(middleware::from_fn_with_state(
                IdempotencyState::new(store),
                idempotency_middleware,
            ))
            .layer(middleware::from_fn(
                |mut request: Request, next: Next| async move {
                    request.extensions_mut().insert(AuthContext::new(7, i64::MAX));
                    next.run(request).await
                },
            ))
    }

    /// Router whose handler blocks until `gate` is notified.
    fn gated_app(
        calls: Arc<AtomicUsize>,
        gate: Arc<Notify>,
    ) -> (Router, Arc<IdempotencyStore<StoredResponse>>) {
        let store = Arc::new(IdempotencyStore::new(
            DEFAULT_TTL,
            Arc::new(ManualClock::at_epoch_secs(1_704_067_200)),
        ));
        let router = Router::new()
            .route(
                "/act",
                post(move || {
                    let calls = calls.clone();
                    let gate = gate.clone();
                    async move {
                        gate.notified().await;
                        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                        (StatusCode::CREATED, axum::Json(serde_json::json!({ "call": n })))
                    }
                }),
            )
            .layer(middleware::from_fn_with_state(
                IdempotencyState::new(store.clone()),
                idempotency_middleware,
            ))
            .layer(middleware::from_fn(
                |mut request: Request, next: Next| async move {
                    request.extensions_mut().insert(AuthContext::new(7, i64::MAX));
                    next.run(request).await
                },
            ));
        (router, store)
    }

    async fn wait_until_in_flight(store: &IdempotencyStore<StoredResponse>, key: &str) {
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while !store.is_in_flight(7, key) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("request never claimed the key");
    }

    fn keyed(key: &str, body: &'static str) -> Request {
        Request::builder()
            .method(Method::POST)
            .uri("/act")
            .header(IDEMPOTENCY_KEY_HEADER, key)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .expect("request")
    }

    #[tokio::test]
    async fn test_replay_returns_first_response() {
        let calls = Arc::new(AtomicUsize::new(0));
        let app = counting_app(calls.clone(), StatusCode::CREATED);

        let first = app.clone().oneshot(keyed("k1", "{}")).await.expect("response");
        assert_eq!(first.status(), StatusCode::CREATED);
        assert!(first.headers().get(IDEMPOTENCY_REPLAY_HEADER).is_none());
        let first_body = axum::body::to_bytes(first.into_body(), usize::MAX).await.expect("body");

        let second = app.oneshot(keyed("k1", "{}")).await.expect("response");
        assert_eq!(second.status(), StatusCode::CREATED);
        assert_eq!(
            second.headers().get(IDEMPOTENCY_REPLAY_HEADER).map(|v| v.as_bytes()),
            Some(&b"true"[..])
        );
        let second_body = axum::body::to_bytes(second.into_body(), usize::MAX).await.expect("body");

        assert_eq!(first_body, second_body);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_key_reuse_with_different_body_conflicts() {
        let calls = Arc::new(AtomicUsize::new(0));
        let app = counting_app(calls.clone(), StatusCode::OK);

        app.clone().oneshot(keyed("k1", "{}")).await.expect("response");
        let response = app.oneshot(keyed("k1", r#"{"x":1}"#)).await.expect("response");
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let err: ApiError = serde_json::from_slice(&bytes).expect("error body");
        assert_eq!(err.code, ErrorCode::IdempotencyConflict);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_responses_are_not_cached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let app = counting_app(calls.clone(), StatusCode::SERVICE_UNAVAILABLE);

        app.clone().oneshot(keyed("k1", "{}")).await.expect("response");
        app.oneshot(keyed("k1", "{}")).await.expect("response");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_concurrent_duplicate_is_rejected_while_first_runs() {
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());
        let (app, store) = gated_app(calls.clone(), gate.clone());

        let first = tokio::spawn(app.clone().oneshot(keyed("k1", "{}")));
        wait_until_in_flight(&store, "k1").await;

        let duplicate = app.clone().oneshot(keyed("k1", "{}")).await.expect("response");
        assert_eq!(duplicate.status(), StatusCode::CONFLICT);
        let bytes = axum::body::to_bytes(duplicate.into_body(), usize::MAX).await.expect("body");
        let err: ApiError = serde_json::from_slice(&bytes).expect("error body");
        assert_eq!(err.code, ErrorCode::IdempotencyInProgress);

        gate.notify_one();
        let first = first.await.expect("join").expect("response");
        assert_eq!(first.status(), StatusCode::CREATED);
        assert!(!store.is_in_flight(7, "k1"));

        let replay = app.oneshot(keyed("k1", "{}")).await.expect("response");
        assert_eq!(replay.status(), StatusCode::CREATED);
        assert!(replay.headers().get(IDEMPOTENCY_REPLAY_HEADER).is_some());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dropped_request_releases_key() {
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());
        let (app, store) = gated_app(calls.clone(), gate.clone());

        let abandoned = tokio::spawn(app.clone().oneshot(keyed("k1", "{}")));
        wait_until_in_flight(&store, "k1").await;
        abandoned.abort();
        assert!(abandoned.await.is_err());
        assert!(!store.is_in_flight(7, "k1"));

        gate.notify_one();
        let retry = app.oneshot(keyed("k1", "{}")).await.expect("response");
        assert_eq!(retry.status(), StatusCode::CREATED);
        assert!(retry.headers().get(IDEMPOTENCY_REPLAY_HEADER).is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_oversized_key_is_rejected() {
        let calls = Arc::new(AtomicUsize::new(0));
        let app = counting_app(calls.clone(), StatusCode::OK);
        let long_key = "k".repeat(MAX_KEY_LENGTH + 1);

        let response = app.oneshot(keyed(&long_key, "{}")).await.expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_requests_without_key_pass_through() {
        let calls = Arc::new(AtomicUsize::new(0));
        let app = counting_app(calls.clone(), StatusCode::OK);
        for _ in 0..2 {
            let request = Request::builder()
                .method(Method::POST)
                .uri("/act")
                .body(Body::from("{}"))
                .expect("request");
            app.clone().oneshot(request).await.expect("response");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
