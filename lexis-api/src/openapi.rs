//! OpenAPI Specification for Lexis API
//!
//! Generated with utoipa from the route annotations and DTO schemas.

use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::error::{ApiError, ErrorCode};
use crate::routes::{cards, health, users};
use crate::telemetry::metrics;
use crate::types::*;

use lexis_core::{Card, ProfileSnapshot, Sentence, User, Word};

/// OpenAPI document for Lexis API.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Lexis API",
        version = "0.3.0",
        description = "Vocabulary cards and spaced-repetition reviews for the Lexis Telegram bot",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT"),
        contact(name = "Lexis", url = "https://lexis.app")
    ),
    servers(
        (url = "https://api.lexis.app", description = "Production"),
        (url = "http://localhost:3000", description = "Local Development")
    ),
    tags(
        (name = "Cards", description = "Card creation, new words and the review loop"),
        (name = "Users", description = "Learner registration"),
        (name = "Health", description = "Liveness and readiness probes"),
        (name = "Observability", description = "Prometheus metrics")
    ),
    paths(
        // === Card Routes ===
        cards::create_card,
        cards::get_new_words,
        cards::review_card,
        cards::get_review_words,
        cards::count_review_words,
        cards::get_stats,

        // === User Routes ===
        users::register_user,

        // === Health & Metrics ===
        health::ping,
        health::liveness,
        health::readiness,
        metrics::metrics_handler,
    ),
    components(
        schemas(
            ApiError, ErrorCode,

            // === Card Types ===
            NewCardRequest, NewCardResponse, ReviewRequest, ReviewResponse, ReviewStage,
            WordsResponse, DueCountResponse,

            // === User Types ===
            RegisterUserRequest, UserResponse,

            // === Health Types ===
            health::HealthResponse, health::HealthStatus, health::HealthDetails,
            health::ComponentHealth,

            // === Core Domain Types (from lexis-core) ===
            User, Card, Word, Sentence, ProfileSnapshot
        )
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

/// Security scheme modifier for OpenAPI document.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .description(Some("JWT Bearer token whose subject is the Telegram user id"))
                        .build(),
                ),
            );
        }
    }
}

impl ApiDoc {
    /// Generate OpenAPI spec as JSON string.
    pub fn to_json() -> Result<String, serde_json::Error> {
        let openapi = Self::openapi();
        serde_json::to_string_pretty(&openapi)
    }
}
