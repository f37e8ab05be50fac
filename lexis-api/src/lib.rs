//! Lexis API - HTTP Layer for the Vocabulary Review Service
//!
//! Axum routes for card creation and spaced-repetition reviews, the card
//! orchestrator service, JWT authentication, idempotency middleware, the
//! PostgreSQL card store, configuration and telemetry.
//!
//! Scheduling decisions are answered from the in-memory review cache in
//! `lexis-storage`; the database is only touched to persist changes and
//! to fetch word content.

#[macro_use]
mod macros;

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod openapi;
pub mod routes;
pub mod services;
pub mod state;
pub mod telemetry;
pub mod types;

// Re-export commonly used types
pub use auth::{
    authenticate_jwt, generate_jwt_token, validate_jwt_token, AuthConfig, AuthContext, Claims,
    JwtSecret,
};
pub use config::{ApiConfig, ReviewConfig, StoreBackend};
pub use db::{DbConfig, PgStore};
pub use error::{ApiError, ApiResult, ErrorCode};
pub use middleware::{auth_middleware, extract_auth_context, AuthMiddlewareState};
pub use openapi::ApiDoc;
pub use routes::create_api_router;
pub use services::CardService;
pub use state::AppState;
pub use types::*;
