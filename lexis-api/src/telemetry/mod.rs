//! Lexis Telemetry - Logging and Metrics
//!
//! Structured JSON logging through `tracing-subscriber` and Prometheus
//! metrics served on `/metrics`.

pub mod metrics;
pub mod middleware;
pub mod tracer;

pub use metrics::{metrics_handler, LexisMetrics, METRICS};
pub use middleware::observability_middleware;
pub use tracer::{init_tracing, TelemetryConfig};
