// Copyright (C) 2025 The mopsos Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tracing subscriber initialization with optional OpenTelemetry export.
//!
//! Logs always go to stderr through a fmt layer filtered by `RUST_LOG`
//! (default: `mopsos=info,tower_http=info`). When tracing is enabled, spans are
//! additionally exported to an OTLP gRPC collector and the W3C trace context
//! propagator is installed globally so envelopes can carry `traceparent`.
//!
//! ```rust,ignore
//! let _guard = mopsos::telemetry::init_subscriber(&TelemetryConfig::from(&config))?;
//! // Guard flushes and shuts the exporter down on drop
//! ```

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::{SpanExporter, WithExportConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::{SdkTracer, SdkTracerProvider};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;

use crate::config::Config;

/// Default filter when `RUST_LOG` is unset or invalid.
pub const DEFAULT_FILTER: &str = "mopsos=info,tower_http=info";

/// Service name reported to the collector.
pub const SERVICE_NAME: &str = "mopsos";

/// Telemetry settings.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Export spans over OTLP and propagate trace context.
    pub enable_tracing: bool,
    /// OTLP gRPC endpoint.
    pub collector_endpoint: String,
    /// Service name resource attribute.
    pub service_name: String,
}

impl From<&Config> for TelemetryConfig {
    fn from(config: &Config) -> Self {
        Self {
            enable_tracing: config.enable_tracing,
            collector_endpoint: config.tracing_target.clone(),
            service_name: SERVICE_NAME.to_string(),
        }
    }
}

/// Telemetry setup errors.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// The OTLP exporter could not be built.
    #[error("failed to create OTLP span exporter: {0}")]
    Exporter(#[from] opentelemetry_otlp::ExporterBuildError),

    /// A global subscriber was already installed.
    #[error("failed to install tracing subscriber: {0}")]
    Subscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Guard that flushes and shuts down the tracer provider on drop.
pub struct TelemetryGuard {
    trace_provider: Option<SdkTracerProvider>,
}

impl TelemetryGuard {
    /// Whether spans are being exported.
    pub fn is_exporting(&self) -> bool {
        self.trace_provider.is_some()
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.trace_provider.take() {
            if let Err(e) = provider.force_flush() {
                eprintln!("OTEL trace flush error: {:?}", e);
            }
            if let Err(e) = provider.shutdown() {
                eprintln!("OTEL trace shutdown error: {:?}", e);
            }
        }
    }
}

/// Install the global tracing subscriber.
///
/// Must be called once per process; the returned guard has to outlive the service.
pub fn init_subscriber(config: &TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let filter = build_filter(std::env::var("RUST_LOG").ok().as_deref());

    let (trace_layer, trace_provider) = if config.enable_tracing {
        let (layer, provider) = init_otel(config)?;
        (Some(layer), Some(provider))
    } else {
        (None, None)
    };

    tracing::subscriber::set_global_default(build_subscriber(trace_layer, filter))?;

    if trace_provider.is_some() {
        tracing::info!(
            endpoint = %config.collector_endpoint,
            service_name = %config.service_name,
            "OpenTelemetry tracing enabled"
        );
    }

    Ok(TelemetryGuard { trace_provider })
}

/// Registry with the optional OTLP layer, the stderr fmt layer and the filter.
fn build_subscriber(
    trace_layer: Option<OtelTraceLayer>,
    filter: EnvFilter,
) -> impl tracing::Subscriber + Send + Sync + 'static {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(true);

    tracing_subscriber::Registry::default()
        .with(trace_layer)
        .with(fmt_layer)
        .with(filter)
}

type OtelTraceLayer = tracing_opentelemetry::OpenTelemetryLayer<tracing_subscriber::Registry, SdkTracer>;

fn init_otel(config: &TelemetryConfig) -> Result<(OtelTraceLayer, SdkTracerProvider), TelemetryError> {
    let resource = Resource::builder()
        .with_service_name(config.service_name.clone())
        .with_attributes([opentelemetry::KeyValue::new(
            "service.version",
            env!("CARGO_PKG_VERSION"),
        )])
        .build();

    let span_exporter = SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&config.collector_endpoint)
        .build()?;

    let trace_provider = SdkTracerProvider::builder()
        .with_resource(resource)
        .with_batch_exporter(span_exporter)
        .build();

    opentelemetry::global::set_tracer_provider(trace_provider.clone());
    opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());

    let tracer = trace_provider.tracer(config.service_name.clone());
    let trace_layer = tracing_opentelemetry::layer().with_tracer(tracer);

    Ok((trace_layer, trace_provider))
}

/// Filter from a `RUST_LOG` value, falling back to [`DEFAULT_FILTER`].
fn build_filter(rust_log: Option<&str>) -> EnvFilter {
    rust_log
        .filter(|s| !s.trim().is_empty())
        .and_then(|s| EnvFilter::try_new(s).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_default(filter: EnvFilter) {
        let rendered = filter.to_string();
        assert!(rendered.contains("mopsos=info"), "{rendered}");
        assert!(rendered.contains("tower_http=info"), "{rendered}");
    }

    #[test]
    fn test_build_filter_default() {
        assert_default(build_filter(None));
        assert_default(build_filter(Some("  ")));
    }

    #[test]
    fn test_build_filter_from_rust_log() {
        let rendered = build_filter(Some("mopsos=debug")).to_string();
        assert!(rendered.contains("mopsos=debug"), "{rendered}");
        assert!(!rendered.contains("tower_http"), "{rendered}");
    }

    #[test]
    fn test_build_filter_invalid_falls_back() {
        assert_default(build_filter(Some("mopsos=notalevel")));
    }

    #[test]
    fn test_subscriber_without_otel_layer() {
        let subscriber = build_subscriber(None, build_filter(None));
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(exporting = false, "telemetry test event");
        });
    }

    #[test]
    fn test_subscriber_with_otel_layer() {
        use opentelemetry::trace::TracerProvider as _;

        let provider = SdkTracerProvider::builder().build();
        let layer = tracing_opentelemetry::layer().with_tracer(provider.tracer("mopsos-test"));

        let subscriber = build_subscriber(Some(layer), build_filter(None));
        tracing::subscriber::with_default(subscriber, || {
            let span = tracing::info_span!("telemetry_test");
            let _entered = span.enter();
            tracing::info!("inside span");
        });
    }

    #[test]
    fn test_guard_without_provider_is_noop() {
        let guard = TelemetryGuard {
            trace_provider: None,
        };
        assert!(!guard.is_exporting());
        drop(guard);
    }
}
