//! User REST API Routes
//!
//! Registration of the authenticated Telegram user. Registering creates the
//! user's review profile, so it must happen before any card route is used.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::post, Json, Router};
use lexis_core::NewUser;

use crate::{
    error::{ApiError, ApiResult},
    middleware::AuthExtractor,
    services::CardService,
    state::AppState,
    types::{RegisterUserRequest, UserResponse},
};

/// POST /api/v1/users - Register the current user
#[utoipa::path(
    post,
    path = "/api/v1/users",
    tag = "Users",
    request_body = RegisterUserRequest,
    responses(
        (status = 201, description = "User registered", body = UserResponse),
        (status = 200, description = "User already registered", body = UserResponse),
        (status = 401, description = "Unauthorized", body = ApiError),
    ),
    security(("bearer_auth" = []))
)]
pub async fn register_user(
    State(service): State<CardService>,
    AuthExtractor(auth): AuthExtractor,
    Json(req): Json<RegisterUserRequest>,
) -> ApiResult<impl IntoResponse> {
    let user = NewUser {
        id: auth.user_id,
        first_name: req.first_name,
        username: req.username,
    };
    let response = service.register_user(user).await?;
    let status = if response.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(response)))
}

/// Create the user router.
pub fn create_router() -> Router<AppState> {
    Router::new().route("/", post(register_user))
}
