//! Prometheus Metrics Definitions
//!
//! Defines all Lexis metrics with their labels and exposes a /metrics
//! endpoint for Prometheus scraping.

use axum::{http::StatusCode, response::IntoResponse};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram_vec, CounterVec, Encoder, Gauge,
    HistogramVec, TextEncoder,
};

use crate::error::{ApiError, ApiResult};

/// HTTP request latency buckets (seconds)
/// Covers: 1ms, 5ms, 10ms, 25ms, 50ms, 100ms, 250ms, 500ms, 1s, 2.5s, 5s, 10s
const HTTP_LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0,
];

/// Store operation latency buckets (seconds)
const STORE_LATENCY_BUCKETS: &[f64] =
    &[0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0];

/// Global metrics instance - initialized once at startup
pub static METRICS: Lazy<ApiResult<LexisMetrics>> = Lazy::new(LexisMetrics::new);

/// Container for all Lexis metrics.
#[derive(Clone)]
pub struct LexisMetrics {
    /// HTTP request counter - labels: method, path, status
    pub http_requests_total: CounterVec,

    /// HTTP request duration histogram - labels: method, path
    pub http_request_duration_seconds: HistogramVec,

    /// Store operation counter - labels: operation, status
    pub store_operations_total: CounterVec,

    /// Store operation duration histogram - labels: operation
    pub store_operation_duration_seconds: HistogramVec,

    /// Cards created - labels: kind (known/new)
    pub cards_created_total: CounterVec,

    /// Reviews recorded - labels: outcome (rescheduled/retry/mastered)
    pub reviews_total: CounterVec,

    /// Responses served from an idempotency key - labels: layer (header/body)
    pub idempotent_replays_total: CounterVec,

    /// Profiles held in the review cache
    pub cached_profiles: Gauge,
}

impl LexisMetrics {
    /// Create and register all metrics with Prometheus.
    pub fn new() -> ApiResult<Self> {
        Ok(Self {
            http_requests_total: register_counter_vec!(
                "lexis_http_requests_total",
                "Total number of HTTP requests",
                &["method", "path", "status"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register http_requests_total: {}", e)))?,

            http_request_duration_seconds: register_histogram_vec!(
                "lexis_http_request_duration_seconds",
                "HTTP request duration in seconds",
                &["method", "path"],
                HTTP_LATENCY_BUCKETS.to_vec()
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register http_request_duration_seconds: {}", e)))?,

            store_operations_total: register_counter_vec!(
                "lexis_store_operations_total",
                "Total number of card store operations",
                &["operation", "status"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register store_operations_total: {}", e)))?,

            store_operation_duration_seconds: register_histogram_vec!(
                "lexis_store_operation_duration_seconds",
                "Card store operation duration in seconds",
                &["operation"],
                STORE_LATENCY_BUCKETS.to_vec()
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register store_operation_duration_seconds: {}", e)))?,

            cards_created_total: register_counter_vec!(
                "lexis_cards_created_total",
                "Total cards created",
                &["kind"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register cards_created_total: {}", e)))?,

            reviews_total: register_counter_vec!(
                "lexis_reviews_total",
                "Total reviews recorded",
                &["outcome"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register reviews_total: {}", e)))?,

            idempotent_replays_total: register_counter_vec!(
                "lexis_idempotent_replays_total",
                "Responses replayed for a repeated idempotency key",
                &["layer"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register idempotent_replays_total: {}", e)))?,

            cached_profiles: register_gauge!(
                "lexis_cached_profiles",
                "Review profiles held in memory"
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register cached_profiles: {}", e)))?,
        })
    }

    /// Record an HTTP request.
    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        let status_str = status.to_string();
        self.http_requests_total
            .with_label_values(&[method, path, &status_str])
            .inc();
        self.http_request_duration_seconds
            .with_label_values(&[method, path])
            .observe(duration_secs);
    }

    /// Record a card store operation.
    pub fn record_store_operation(&self, operation: &str, success: bool, duration_secs: f64) {
        let status = if success { "success" } else { "error" };
        self.store_operations_total
            .with_label_values(&[operation, status])
            .inc();
        self.store_operation_duration_seconds
            .with_label_values(&[operation])
            .observe(duration_secs);
    }

    pub fn record_card_created(&self, known: bool) {
        let kind = if known { "known" } else { "new" };
        self.cards_created_total.with_label_values(&[kind]).inc();
    }

    pub fn record_review(&self, outcome: &str) {
        self.reviews_total.with_label_values(&[outcome]).inc();
    }

    pub fn record_idempotent_replay(&self, layer: &str) {
        self.idempotent_replays_total.with_label_values(&[layer]).inc();
    }

    pub fn set_cached_profiles(&self, count: usize) {
        self.cached_profiles.set(count as f64);
    }
}

/// Handler for GET /metrics endpoint.
///
/// Returns Prometheus text format metrics.
#[utoipa::path(
    get,
    path = "/metrics",
    tag = "Observability",
    responses(
        (status = 200, description = "Prometheus metrics in text format", content_type = "text/plain"),
        (status = 500, description = "Failed to encode metrics"),
    ),
)]
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                format!("Failed to encode metrics: {}", e).into_bytes(),
            )
        }
    }
}
