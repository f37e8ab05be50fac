//! Middleware modules for Lexis API
//!
//! - `auth`: bearer-token authentication
//! - `idempotency`: `Idempotency-Key` handling for safe retries
//!
//! # Middleware Order
//!
//! Idempotency keys are scoped by user, so auth must run first:
//!
//! ```ignore
//! Router::new()
//!     .route("/api/v1/cards", post(create_card))
//!     .layer(middleware::from_fn_with_state(idempotency_state, idempotency_middleware))
//!     .layer(middleware::from_fn_with_state(auth_state, auth_middleware))
//! ```

mod auth;
pub mod idempotency;

pub use auth::{
    auth_middleware, extract_auth_context, AuthExtractor, AuthMiddlewareError, AuthMiddlewareState,
};

pub use idempotency::{
    idempotency_middleware, IdempotencyConfig, IdempotencyError, IdempotencyState, StoredResponse,
    IDEMPOTENCY_KEY_HEADER, IDEMPOTENCY_REPLAY_HEADER,
};
