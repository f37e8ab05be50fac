//! Card REST API Routes
//!
//! Card creation, new-word batches and the review loop for the
//! authenticated user. Handlers delegate to [`CardService`].

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use lexis_core::ProfileSnapshot;

use crate::{
    error::{ApiError, ApiResult},
    middleware::AuthExtractor,
    services::CardService,
    state::AppState,
    types::{
        BatchQuery, DueCountResponse, NewCardRequest, NewCardResponse, ReviewRequest,
        ReviewResponse, WordsResponse,
    },
};

/// Longest accepted body-level idempotency key.
const MAX_BODY_KEY_LENGTH: usize = 256;

fn validate_body_key(key: Option<&str>) -> ApiResult<()> {
    match key {
        Some(k) if k.is_empty() || k.len() > MAX_BODY_KEY_LENGTH => Err(ApiError::invalid_range(
            "idempotency_key length",
            1,
            MAX_BODY_KEY_LENGTH,
        )),
        _ => Ok(()),
    }
}

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// POST /api/v1/cards - Create a card for a word
#[utoipa::path(
    post,
    path = "/api/v1/cards",
    tag = "Cards",
    request_body = NewCardRequest,
    responses(
        (status = 201, description = "Card created", body = NewCardResponse),
        (status = 400, description = "Already created or out of sequence", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 404, description = "User not registered or word not in the word bank", body = ApiError),
        (status = 503, description = "Review cache not ready", body = ApiError),
    ),
    security(("bearer_auth" = []))
)]
pub async fn create_card(
    State(service): State<CardService>,
    AuthExtractor(auth): AuthExtractor,
    Json(req): Json<NewCardRequest>,
) -> ApiResult<impl IntoResponse> {
    if req.word_id <= 0 {
        return Err(ApiError::invalid_range("word_id", 1, i64::MAX));
    }
    validate_body_key(req.idempotency_key.as_deref())?;

    let card = service.create_card(auth.user_id, req).await?;
    Ok((StatusCode::CREATED, Json(card)))
}

/// GET /api/v1/cards - Next batch of unseen words
#[utoipa::path(
    get,
    path = "/api/v1/cards",
    tag = "Cards",
    params(BatchQuery),
    responses(
        (status = 200, description = "Unseen words with sentences", body = WordsResponse),
        (status = 400, description = "Word bank exhausted or invalid limit", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError),
    ),
    security(("bearer_auth" = []))
)]
pub async fn get_new_words(
    State(service): State<CardService>,
    AuthExtractor(auth): AuthExtractor,
    Query(query): Query<BatchQuery>,
) -> ApiResult<Json<WordsResponse>> {
    let words = service.get_new_words(auth.user_id, query.limit).await?;
    Ok(Json(WordsResponse { words }))
}

/// PATCH /api/v1/cards/review - Record a review outcome
#[utoipa::path(
    patch,
    path = "/api/v1/cards/review",
    tag = "Cards",
    request_body = ReviewRequest,
    responses(
        (status = 201, description = "Review recorded", body = ReviewResponse),
        (status = 400, description = "Word not due for review", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 404, description = "No card for this word", body = ApiError),
        (status = 503, description = "Store or cache unavailable", body = ApiError),
    ),
    security(("bearer_auth" = []))
)]
pub async fn review_card(
    State(service): State<CardService>,
    AuthExtractor(auth): AuthExtractor,
    Json(req): Json<ReviewRequest>,
) -> ApiResult<impl IntoResponse> {
    validate_body_key(req.idempotency_key.as_deref())?;

    let receipt = service.review_card(auth.user_id, req).await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

/// GET /api/v1/cards/review - Words due for review
#[utoipa::path(
    get,
    path = "/api/v1/cards/review",
    tag = "Cards",
    params(BatchQuery),
    responses(
        (status = 200, description = "Due words, empty when nothing is due", body = WordsResponse),
        (status = 401, description = "Unauthorized", body = ApiError),
    ),
    security(("bearer_auth" = []))
)]
pub async fn get_review_words(
    State(service): State<CardService>,
    AuthExtractor(auth): AuthExtractor,
    Query(query): Query<BatchQuery>,
) -> ApiResult<Json<WordsResponse>> {
    let words = service.get_review_words(auth.user_id, query.limit).await?;
    Ok(Json(WordsResponse { words }))
}

/// GET /api/v1/cards/review/count - Number of due words
#[utoipa::path(
    get,
    path = "/api/v1/cards/review/count",
    tag = "Cards",
    responses(
        (status = 200, description = "Due word count", body = DueCountResponse),
        (status = 401, description = "Unauthorized", body = ApiError),
    ),
    security(("bearer_auth" = []))
)]
pub async fn count_review_words(
    State(service): State<CardService>,
    AuthExtractor(auth): AuthExtractor,
) -> ApiResult<Json<DueCountResponse>> {
    let count = service.count_due(auth.user_id).await?;
    Ok(Json(DueCountResponse { count }))
}

/// GET /api/v1/cards/stats - Review profile counts
#[utoipa::path(
    get,
    path = "/api/v1/cards/stats",
    tag = "Cards",
    responses(
        (status = 200, description = "Profile snapshot", body = ProfileSnapshot),
        (status = 401, description = "Unauthorized", body = ApiError),
    ),
    security(("bearer_auth" = []))
)]
pub async fn get_stats(
    State(service): State<CardService>,
    AuthExtractor(auth): AuthExtractor,
) -> ApiResult<Json<ProfileSnapshot>> {
    Ok(Json(service.stats(auth.user_id).await?))
}

// ============================================================================
// ROUTER
// ============================================================================

/// Create the card router. Handlers pull [`CardService`] out of [`AppState`].
pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/", get(get_new_words).post(create_card))
        .route("/review", get(get_review_words).patch(review_card))
        .route("/review/count", get(count_review_words))
        .route("/stats", get(get_stats))
}
