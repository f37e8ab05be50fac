//! REST API Routes Module
//!
//! Includes:
//! - Card and review routes under /api/v1/cards (auth + idempotency)
//! - User registration under /api/v1/users
//! - Health check endpoints (Kubernetes-compatible)
//! - Prometheus metrics and the OpenAPI document
//! - CORS support for the Telegram web app

pub mod cards;
pub mod health;
pub mod users;

use std::time::Duration;

use axum::{
    error_handling::HandleErrorLayer,
    http::{header, header::HeaderName, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    response::IntoResponse,
    routing::get,
    BoxError, Json, Router,
};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use utoipa::OpenApi;

use crate::auth::AuthConfig;
use crate::config::ApiConfig;
use crate::error::{ApiError, ApiResult};
use crate::middleware::{
    auth_middleware, idempotency_middleware, AuthMiddlewareState, IdempotencyState,
    IDEMPOTENCY_KEY_HEADER, IDEMPOTENCY_REPLAY_HEADER,
};
use crate::openapi::ApiDoc;
use crate::state::AppState;
use crate::telemetry::{metrics_handler, observability_middleware};

pub use cards::create_router as cards_router;
pub use health::create_router as health_router;
pub use users::create_router as users_router;

// ============================================================================
// OPENAPI ENDPOINT
// ============================================================================

/// Handler for /openapi.json endpoint.
async fn openapi_json() -> impl IntoResponse {
    Json(ApiDoc::openapi())
}

// ============================================================================
// PRODUCTION VALIDATION
// ============================================================================

/// Check if running in a production environment.
fn is_production_environment() -> bool {
    std::env::var("LEXIS_ENVIRONMENT")
        .map(|e| matches!(e.to_lowercase().as_str(), "production" | "prod"))
        .unwrap_or(false)
}

/// Validate API configuration for production use.
fn validate_api_config_for_production(config: &ApiConfig) -> ApiResult<()> {
    if config.cors_origins.is_empty() {
        return Err(ApiError::invalid_input(
            "CORS origins not configured for production. Set LEXIS_CORS_ORIGINS.",
        ));
    }
    Ok(())
}

// ============================================================================
// SECURE ROUTER BUILDER
// ============================================================================

/// Builder for the API router with auth and idempotency on by default.
///
/// Every /api/v1 route is protected by:
/// 1. Authentication middleware (JWT bearer)
/// 2. Idempotency middleware (`Idempotency-Key` header)
///
/// The whole router gets observability, a request timeout and CORS.
/// Health, metrics and OpenAPI routes are public.
pub struct SecureRouterBuilder {
    state: AppState,
    api_config: ApiConfig,
    auth_state: AuthMiddlewareState,
    idempotency_state: IdempotencyState,
}

impl SecureRouterBuilder {
    /// Create a new SecureRouterBuilder.
    ///
    /// In production environments this validates the security configuration
    /// and returns an error if critical settings are missing.
    pub fn new(state: AppState, api_config: ApiConfig, auth_config: AuthConfig) -> ApiResult<Self> {
        if is_production_environment() {
            auth_config.validate_for_production()?;
            validate_api_config_for_production(&api_config)?;
        }

        let auth_state = AuthMiddlewareState::new(auth_config);
        let idempotency_state = IdempotencyState::new(state.http_receipts.clone());

        Ok(Self {
            state,
            api_config,
            auth_state,
            idempotency_state,
        })
    }

    /// Build the authenticated routes.
    fn build_api_routes(&self) -> Router {
        Router::new()
            .nest("/cards", cards::create_router())
            .nest("/users", users::create_router())
            .with_state(self.state.clone())
    }

    /// Build the complete router.
    ///
    /// # Middleware Order (outer to inner)
    /// 1. CORS (outermost) - handles preflight requests
    /// 2. Observability - tracing and metrics
    /// 3. Request timeout
    /// 4. Auth (only on /api/v1/*) - validates credentials
    /// 5. Idempotency (only on /api/v1/*) - needs the caller's identity
    pub fn build(self) -> ApiResult<Router> {
        let api_routes = self
            .build_api_routes()
            .layer(from_fn_with_state(self.idempotency_state.clone(), idempotency_middleware))
            .layer(from_fn_with_state(self.auth_state.clone(), auth_middleware));

        #[allow(unused_mut)]
        let mut router = Router::new()
            .nest("/api/v1", api_routes)
            .nest(
                "/health",
                health::create_router(self.state.store.clone(), self.state.cache.clone()),
            )
            .route("/metrics", get(metrics_handler))
            .route("/openapi.json", get(openapi_json));

        #[cfg(feature = "swagger-ui")]
        {
            use utoipa_swagger_ui::SwaggerUi;
            router = router.merge(SwaggerUi::new("/swagger-ui").url("/openapi.json", ApiDoc::openapi()));
        }

        let cors = build_cors_layer(&self.api_config);
        let timeout = ServiceBuilder::new()
            .layer(HandleErrorLayer::new(handle_timeout_error))
            .timeout(self.api_config.request_timeout);

        // Execution order: CORS -> Observability -> Timeout -> Handler
        Ok(router
            .layer(timeout)
            .layer(from_fn(observability_middleware))
            .layer(cors))
    }
}

async fn handle_timeout_error(err: BoxError) -> ApiError {
    if err.is::<tower::timeout::error::Elapsed>() {
        ApiError::timeout("request")
    } else {
        ApiError::internal_error(format!("Unhandled middleware error: {}", err))
    }
}

// ============================================================================
// CORS LAYER
// ============================================================================

/// Build the CORS layer from ApiConfig.
///
/// In development mode (empty origins), allows all origins.
/// In production mode, only allows configured origins.
fn build_cors_layer(config: &ApiConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::ACCEPT,
            HeaderName::from_static(IDEMPOTENCY_KEY_HEADER),
        ])
        .expose_headers([HeaderName::from_static(IDEMPOTENCY_REPLAY_HEADER)])
        .max_age(Duration::from_secs(config.cors_max_age_secs));

    if config.cors_origins.is_empty() {
        tracing::info!("CORS: Development mode - allowing all origins");
        cors.allow_origin(Any).allow_headers(Any).expose_headers(Any)
    } else {
        tracing::info!(
            "CORS: Production mode - allowing origins: {:?}",
            config.cors_origins
        );
        let origins: Vec<HeaderValue> = config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();

        if config.cors_allow_credentials {
            cors.allow_origin(origins).allow_credentials(true)
        } else {
            cors.allow_origin(origins)
        }
    }
}

/// Create the complete API router.
///
/// - Card and user routes under /api/v1/* (auth + idempotency)
/// - Health checks at /health/* (public)
/// - Metrics at /metrics (public)
/// - OpenAPI spec at /openapi.json
/// - Swagger UI at /swagger-ui (when swagger-ui feature is enabled)
///
/// The review cache must be rehydrated (see [`AppState::rehydrate`]) before
/// card routes answer with anything but 503.
pub fn create_api_router(
    state: AppState,
    api_config: &ApiConfig,
    auth_config: AuthConfig,
) -> ApiResult<Router> {
    SecureRouterBuilder::new(state, api_config.clone(), auth_config)
        .and_then(|builder| builder.build())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_production_requires_cors_origins() {
        let mut config = ApiConfig::default();
        assert!(validate_api_config_for_production(&config).is_err());
        config.cors_origins = vec!["https://lexis.app".to_string()];
        assert!(validate_api_config_for_production(&config).is_ok());
    }
}
