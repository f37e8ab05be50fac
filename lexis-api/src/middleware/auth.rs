//! Axum middleware for bearer-token authentication.
//!
//! Validates `Authorization: Bearer <jwt>`, injects [`AuthContext`] into the
//! request extensions and rejects everything else with 401.

use crate::auth::{authenticate_jwt, AuthConfig, AuthContext};
use crate::error::{ApiError, ApiResult};
use axum::{
    extract::{FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

// ============================================================================
// MIDDLEWARE STATE
// ============================================================================

/// Shared state for authentication middleware.
#[derive(Debug, Clone)]
pub struct AuthMiddlewareState {
    pub auth_config: Arc<AuthConfig>,
}

impl AuthMiddlewareState {
    pub fn new(auth_config: AuthConfig) -> Self {
        Self {
            auth_config: Arc::new(auth_config),
        }
    }
}

// ============================================================================
// MIDDLEWARE FUNCTION
// ============================================================================

/// Authenticate the request and inject [`AuthContext`].
///
/// ```ignore
/// let app = Router::new()
///     .route("/api/v1/cards", axum::routing::get(get_new_words))
///     .layer(middleware::from_fn_with_state(auth_state, auth_middleware));
/// ```
pub async fn auth_middleware(
    State(state): State<AuthMiddlewareState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthMiddlewareError> {
    let auth_header = request
        .headers()
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| {
            AuthMiddlewareError(ApiError::unauthorized(
                "Missing Authorization header",
            ))
        })?;

    let token = auth_header.strip_prefix("Bearer ").ok_or_else(|| {
        AuthMiddlewareError(ApiError::invalid_token(
            "Authorization header must use Bearer scheme",
        ))
    })?;

    let auth_context =
        authenticate_jwt(&state.auth_config, token.trim()).map_err(AuthMiddlewareError)?;

    tracing::debug!(user_id = auth_context.user_id, "Request authenticated");
    request.extensions_mut().insert(auth_context);

    Ok(next.run(request).await)
}

// ============================================================================
// ERROR TYPE
// ============================================================================

/// Error wrapper for middleware that implements IntoResponse.
#[derive(Debug)]
pub struct AuthMiddlewareError(pub ApiError);

impl IntoResponse for AuthMiddlewareError {
    fn into_response(self) -> Response {
        self.0.into_response()
    }
}

// ============================================================================
// TYPED EXTRACTOR
// ============================================================================

/// Handler extractor for the authenticated caller.
///
/// Requires `auth_middleware` on the route; without it the extractor fails
/// with 500.
#[derive(Debug, Clone, Copy)]
pub struct AuthExtractor(pub AuthContext);

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthExtractor
where
    S: Send + Sync,
{
    type Rejection = AuthMiddlewareError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthContext>()
            .copied()
            .map(AuthExtractor)
            .ok_or_else(|| {
                AuthMiddlewareError(ApiError::internal_error(
                    "AuthContext not found in request extensions. \
                     Ensure auth_middleware is applied to this route.",
                ))
            })
    }
}

impl std::ops::Deref for AuthExtractor {
    type Target = AuthContext;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// Extract AuthContext from request extensions.
pub fn extract_auth_context(request: &Request) -> ApiResult<&AuthContext> {
    request
        .extensions()
        .get::<AuthContext>()
        .ok_or_else(|| ApiError::unauthorized("Auth context missing from request"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{generate_jwt_token, test_clocks, JwtSecret};
    use crate::error::ErrorCode;
    use axum::{body::Body, http::StatusCode, middleware, routing::get, Router};
    use tower::ServiceExt;

    fn test_config() -> AuthConfig {
        AuthConfig {
            jwt_secret: JwtSecret::new("middleware_test_secret".to_string()).expect("valid secret"),
            clock: Arc::new(test_clocks::valid()),
            ..AuthConfig::default()
        }
    }

    fn app(config: AuthConfig) -> Router {
        Router::new()
            .route(
                "/whoami",
                get(|AuthExtractor(auth): AuthExtractor| async move { auth.user_id.to_string() }),
            )
            .layer(middleware::from_fn_with_state(
                AuthMiddlewareState::new(config),
                auth_middleware,
            ))
    }

    async fn error_code(response: Response) -> ErrorCode {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        serde_json::from_slice::<ApiError>(&bytes).expect("error body").code
    }

    #[tokio::test]
    async fn test_valid_token_reaches_handler() {
        let config = test_config();
        let token = generate_jwt_token(&config, 42).expect("token");
        let response = app(config)
            .oneshot(
                Request::builder()
                    .uri("/whoami")
                    .header("authorization", format!("Bearer {}", token))
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        assert_eq!(&bytes[..], b"42");
    }

    #[tokio::test]
    async fn test_missing_header_is_unauthorized() {
        let response = app(test_config())
            .oneshot(Request::builder().uri("/whoami").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(error_code(response).await, ErrorCode::Unauthorized);
    }

    #[tokio::test]
    async fn test_non_bearer_scheme_is_rejected() {
        let response = app(test_config())
            .oneshot(
                Request::builder()
                    .uri("/whoami")
                    .header("authorization", "Basic dXNlcjpwYXNz")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(error_code(response).await, ErrorCode::InvalidToken);
    }

    #[tokio::test]
    async fn test_extractor_without_middleware_is_internal_error() {
        let app = Router::new().route(
            "/whoami",
            get(|AuthExtractor(auth): AuthExtractor| async move { auth.user_id.to_string() }),
        );
        let response = app
            .oneshot(Request::builder().uri("/whoami").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
