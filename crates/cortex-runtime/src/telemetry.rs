//! Tracing subscriber set-up for the `cortex` binary.
//!
//! Call [`init_tracing`] once at process startup and hold the returned guard
//! until exit.
//!
//! # Environment variables
//!
//! | Variable | Effect |
//! |---|---|
//! | `RUST_LOG` | Log filter (default `"info"`). Ignored when a level override is passed. |
//! | `CORTEX_LOG_FORMAT=json` | Emit newline-delimited JSON logs. |
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | OTLP/HTTP collector base URL. When set, every span is also exported. |
//!
//! # Example
//!
//! ```rust,no_run
//! let _guard = cortex_runtime::telemetry::init_tracing("cortex", None);
//! ```

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{Resource, trace::SdkTracerProvider};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber.
///
/// `level` (for example from `--log-level`) takes precedence over
/// `RUST_LOG`.  Calling this twice in one process leaves the first
/// subscriber in place.
pub fn init_tracing(service_name: &str, level: Option<&str>) -> TracerProviderGuard {
    let env_filter = build_filter(level);
    let use_json = std::env::var("CORTEX_LOG_FORMAT").as_deref() == Ok("json");
    let provider = build_provider(service_name);

    // `try_init` so a second call (tests, embedded use) is harmless.
    let result = match (&provider, use_json) {
        (Some(p), true) => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_opentelemetry::layer().with_tracer(p.tracer("cortex")))
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
        (Some(p), false) => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_opentelemetry::layer().with_tracer(p.tracer("cortex")))
            .with(tracing_subscriber::fmt::layer().compact())
            .try_init(),
        (None, true) => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
        (None, false) => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().compact())
            .try_init(),
    };
    if let Err(e) = result {
        eprintln!("[cortex] tracing subscriber already installed: {e}");
    }

    TracerProviderGuard(provider)
}

fn build_filter(level: Option<&str>) -> EnvFilter {
    match level {
        Some(level) => EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info")),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    }
}

/// Shuts the OpenTelemetry provider down on drop, flushing pending spans.
pub struct TracerProviderGuard(Option<SdkTracerProvider>);

impl TracerProviderGuard {
    /// `true` when spans are being exported over OTLP.
    pub fn is_exporting(&self) -> bool {
        self.0.is_some()
    }
}

impl Drop for TracerProviderGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.0.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("[cortex] OpenTelemetry provider shutdown error: {e}");
        }
    }
}

fn build_provider(service_name: &str) -> Option<SdkTracerProvider> {
    let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok()?;

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| eprintln!("[cortex] OTLP exporter init failed: {e}"))
        .ok()?;

    let resource = Resource::builder()
        .with_service_name(service_name.to_string())
        .build();

    // Simple exporter: the CLI installs tracing before its tokio runtime
    // exists, and the batch exporter spawns tasks.
    Some(
        SdkTracerProvider::builder()
            .with_resource(resource)
            .with_simple_exporter(exporter)
            .build(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_provider_without_endpoint() {
        // SAFETY: no other test in this crate reads this variable.
        unsafe { std::env::remove_var("OTEL_EXPORTER_OTLP_ENDPOINT") };
        assert!(build_provider("cortex-test").is_none());
    }

    #[test]
    fn empty_guard_drops_cleanly() {
        let guard = TracerProviderGuard(None);
        assert!(!guard.is_exporting());
        drop(guard);
    }

    #[test]
    fn explicit_level_wins() {
        assert_eq!(build_filter(Some("debug")).to_string(), "debug");
    }
}
