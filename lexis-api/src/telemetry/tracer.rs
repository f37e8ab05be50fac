//! Tracing subscriber initialization.
//!
//! JSON log lines filtered by `RUST_LOG`, falling back to the configured
//! default filter.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{ApiError, ApiResult};

/// Telemetry configuration from environment variables.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to every log line
    pub service_name: String,
    /// Service version
    pub service_version: String,
    /// Environment (production, staging, development)
    pub environment: String,
    /// Filter used when `RUST_LOG` is unset
    pub log_filter: String,
    /// Emit JSON (default) or human-readable lines
    pub json_logs: bool,
    /// Serve `/metrics`
    pub metrics_enabled: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: std::env::var("LEXIS_SERVICE_NAME")
                .unwrap_or_else(|_| "lexis-api".to_string()),
            service_version: std::env::var("LEXIS_SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            environment: std::env::var("LEXIS_ENVIRONMENT")
                .unwrap_or_else(|_| "development".to_string()),
            log_filter: std::env::var("LEXIS_LOG_FILTER")
                .unwrap_or_else(|_| "lexis_api=debug,lexis_storage=info,tower_http=info,info".to_string()),
            json_logs: std::env::var("LEXIS_LOG_FORMAT")
                .map(|s| s.to_lowercase() != "pretty")
                .unwrap_or(true),
            metrics_enabled: std::env::var("LEXIS_METRICS_ENABLED")
                .map(|s| s == "true" || s == "1")
                .unwrap_or(true),
        }
    }
}

/// Install the global tracing subscriber.
///
/// Call once at startup; a second call returns an error.
pub fn init_tracing(config: &TelemetryConfig) -> ApiResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_filter));

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = if config.json_logs {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };
    result.map_err(|e| ApiError::internal_error(format!("Failed to init subscriber: {}", e)))?;

    tracing::info!(
        service_name = config.service_name,
        service_version = config.service_version,
        environment = config.environment,
        metrics_enabled = config.metrics_enabled,
        "Telemetry initialized"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    struct EnvVarGuard {
        key: &'static str,
        original: Option<String>,
    }

    impl EnvVarGuard {
        fn set(key: &'static str, value: Option<&str>) -> Self {
            let original = std::env::var(key).ok();
            match value {
                Some(v) => std::env::set_var(key, v),
                None => std::env::remove_var(key),
            }
            Self { key, original }
        }
    }

    impl Drop for EnvVarGuard {
        fn drop(&mut self) {
            match self.original.as_deref() {
                Some(v) => std::env::set_var(self.key, v),
                None => std::env::remove_var(self.key),
            }
        }
    }

    #[test]
    fn test_telemetry_config_default() {
        let _lock = ENV_MUTEX.lock().expect("env mutex should not be poisoned");
        let _name = EnvVarGuard::set("LEXIS_SERVICE_NAME", None);
        let _format = EnvVarGuard::set("LEXIS_LOG_FORMAT", None);
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "lexis-api");
        assert!(config.json_logs);
        assert!(config.log_filter.contains("lexis_api"));
    }

    #[test]
    fn test_pretty_log_format() {
        let _lock = ENV_MUTEX.lock().expect("env mutex should not be poisoned");
        let _format = EnvVarGuard::set("LEXIS_LOG_FORMAT", Some("pretty"));
        assert!(!TelemetryConfig::default().json_logs);
    }

    #[test]
    fn test_metrics_flag() {
        let _lock = ENV_MUTEX.lock().expect("env mutex should not be poisoned");
        let _metrics = EnvVarGuard::set("LEXIS_METRICS_ENABLED", Some("0"));
        assert!(!TelemetryConfig::default().metrics_enabled);
    }
}
