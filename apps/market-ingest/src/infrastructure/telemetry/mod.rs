//! OpenTelemetry Tracing Integration
//!
//! Installs the global `tracing` subscriber: an `EnvFilter` (from `RUST_LOG`,
//! with `market_ingest=info` added), a fmt layer, and optionally an OTLP span
//! exporter.
//!
//! # Environment Variables
//!
//! - `OTEL_ENABLED`: Set to "true" to export spans (default: false)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: http://localhost:4317)
//! - `OTEL_SERVICE_NAME`: Service name for traces (default: market-ingest)
//!
//! # Usage
//!
//! ```ignore
//! use market_ingest::infrastructure::telemetry;
//!
//! // Keep the guard alive until shutdown
//! let _guard = telemetry::init();
//! ```

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Service name for OpenTelemetry traces.
const DEFAULT_SERVICE_NAME: &str = "market-ingest";

/// Default OTLP gRPC endpoint.
const DEFAULT_OTLP_ENDPOINT: &str = "http://localhost:4317";

/// Directives appended to whatever `RUST_LOG` provides.
const DEFAULT_DIRECTIVES: [&str; 4] = [
    "market_ingest=info",
    "hyper=warn",
    "reqwest=warn",
    "tungstenite=warn",
];

/// Guard that shuts down OpenTelemetry when dropped.
pub struct TelemetryGuard {
    tracer_provider: Option<SdkTracerProvider>,
}

impl TelemetryGuard {
    /// Whether spans are being exported.
    #[must_use]
    pub const fn is_exporting(&self) -> bool {
        self.tracer_provider.is_some()
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.tracer_provider.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("Failed to shutdown OpenTelemetry tracer provider: {e}");
        }
    }
}

/// Telemetry configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Whether OpenTelemetry is enabled.
    pub enabled: bool,
    /// OTLP exporter endpoint.
    pub otlp_endpoint: String,
    /// Service name for traces.
    pub service_name: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            otlp_endpoint: DEFAULT_OTLP_ENDPOINT.to_string(),
            service_name: DEFAULT_SERVICE_NAME.to_string(),
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let enabled = lookup("OTEL_ENABLED").map_or(defaults.enabled, |v| {
            matches!(v.trim().to_lowercase().as_str(), "true" | "1" | "yes")
        });
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Self {
            enabled,
            otlp_endpoint: non_empty("OTEL_EXPORTER_OTLP_ENDPOINT")
                .unwrap_or(defaults.otlp_endpoint),
            service_name: non_empty("OTEL_SERVICE_NAME").unwrap_or(defaults.service_name),
        }
    }
}

/// Initialize telemetry with default configuration from environment.
///
/// Returns a guard that must be kept alive for the duration of the program.
/// When the guard is dropped, OpenTelemetry will be properly shut down.
#[must_use]
pub fn init() -> TelemetryGuard {
    init_with_config(TelemetryConfig::from_env())
}

/// Initialize telemetry with custom configuration.
///
/// An exporter that cannot be built is reported and tracing continues with
/// the fmt layer only.
#[must_use]
pub fn init_with_config(config: TelemetryConfig) -> TelemetryGuard {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    let exporter = if config.enabled {
        opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_endpoint(&config.otlp_endpoint)
            .build()
            .map_err(|e| e.to_string())
    } else {
        Err(String::new())
    };

    match exporter {
        Ok(exporter) => {
            let tracer_provider = SdkTracerProvider::builder()
                .with_batch_exporter(exporter)
                .with_resource(
                    opentelemetry_sdk::Resource::builder()
                        .with_service_name(config.service_name.clone())
                        .build(),
                )
                .build();
            let tracer = tracer_provider.tracer(config.service_name.clone());
            let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);

            tracing_subscriber::registry()
                .with(env_filter())
                .with(fmt_layer)
                .with(otel_layer)
                .init();

            tracing::info!(
                endpoint = %config.otlp_endpoint,
                service = %config.service_name,
                "OpenTelemetry export enabled"
            );
            TelemetryGuard {
                tracer_provider: Some(tracer_provider),
            }
        }
        Err(reason) => {
            tracing_subscriber::registry()
                .with(env_filter())
                .with(fmt_layer)
                .init();

            if config.enabled {
                tracing::warn!(error = %reason, "OTLP exporter unavailable, logging only");
            }
            TelemetryGuard {
                tracer_provider: None,
            }
        }
    }
}

fn env_filter() -> EnvFilter {
    DEFAULT_DIRECTIVES
        .iter()
        .filter_map(|d| d.parse::<Directive>().ok())
        .fold(EnvFilter::from_default_env(), EnvFilter::add_directive)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = TelemetryConfig::default();
        assert!(!config.enabled);
        assert_eq!(config.otlp_endpoint, DEFAULT_OTLP_ENDPOINT);
        assert_eq!(config.service_name, DEFAULT_SERVICE_NAME);
    }

    #[test]
    fn config_from_lookup() {
        let config = TelemetryConfig::from_lookup(|key| match key {
            "OTEL_ENABLED" => Some("TRUE".to_string()),
            "OTEL_SERVICE_NAME" => Some("ingest-staging".to_string()),
            "OTEL_EXPORTER_OTLP_ENDPOINT" => Some(" ".to_string()),
            _ => None,
        });
        assert!(config.enabled);
        assert_eq!(config.service_name, "ingest-staging");
        assert_eq!(config.otlp_endpoint, DEFAULT_OTLP_ENDPOINT);
    }

    #[test]
    fn default_directives_parse() {
        for directive in DEFAULT_DIRECTIVES {
            assert!(directive.parse::<Directive>().is_ok());
        }
    }
}
