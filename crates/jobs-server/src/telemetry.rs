// Log subscriber and optional OTLP span export for the job server
//
// Decision: Console logs are always on; spans are exported only when an OTLP
// endpoint is configured, and an exporter failure never blocks startup

use std::time::Duration;

use anyhow::{Context, Result};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::KeyValue;
use opentelemetry_otlp::{SpanExporter, WithExportConfig};
use opentelemetry_sdk::trace::{Sampler, SdkTracerProvider, Tracer};
use opentelemetry_sdk::Resource;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const SERVICE_NAME: &str = "cvforge-jobs";
const DEFAULT_FILTER: &str = "info,cvforge_jobs=debug,cvforge_jobs_server=debug";
const EXPORT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryConfig {
    pub service_name: String,
    pub service_version: String,
    /// gRPC collector address, e.g. "http://localhost:4317"
    pub otlp_endpoint: Option<String>,
    /// Reported as `deployment.environment`
    pub environment: Option<String>,
    /// `EnvFilter` directives; falls back to the default on parse errors
    pub log_filter: Option<String>,
}

impl TelemetryConfig {
    /// Reads `OTEL_SERVICE_NAME`, `OTEL_EXPORTER_OTLP_ENDPOINT`,
    /// `OTEL_ENVIRONMENT` and `RUST_LOG` (or `LOG_LEVEL`)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            service_name: non_empty("OTEL_SERVICE_NAME").unwrap_or_else(|| SERVICE_NAME.to_string()),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            otlp_endpoint: non_empty("OTEL_EXPORTER_OTLP_ENDPOINT"),
            environment: non_empty("OTEL_ENVIRONMENT"),
            log_filter: non_empty("RUST_LOG").or_else(|| non_empty("LOG_LEVEL")),
        }
    }

    fn filter(&self) -> EnvFilter {
        self.log_filter
            .as_deref()
            .and_then(|directives| EnvFilter::try_new(directives).ok())
            .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
    }

    fn resource(&self) -> Resource {
        let mut attributes = vec![
            KeyValue::new("service.name", self.service_name.clone()),
            KeyValue::new("service.version", self.service_version.clone()),
        ];
        if let Some(environment) = &self.environment {
            attributes.push(KeyValue::new("deployment.environment", environment.clone()));
        }
        Resource::builder().with_attributes(attributes).build()
    }
}

/// Flushes and shuts down span export on drop
pub struct TelemetryGuard {
    provider: Option<SdkTracerProvider>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.provider.take() {
            if let Err(e) = provider.shutdown() {
                eprintln!("Failed to flush spans on shutdown: {e:?}");
            }
        }
    }
}

/// Install the global subscriber; hold the returned guard until exit
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let console = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_filter(config.filter());

    let export = config
        .otlp_endpoint
        .as_deref()
        .map(|endpoint| otlp_tracer(endpoint, config.resource()));

    let (provider, otel_layer, export_error) = match export {
        Some(Ok((provider, tracer))) => (
            Some(provider),
            Some(tracing_opentelemetry::layer().with_tracer(tracer)),
            None,
        ),
        Some(Err(e)) => (None, None, Some(format!("{e:#}"))),
        None => (None, None, None),
    };

    tracing_subscriber::registry()
        .with(console)
        .with(otel_layer)
        .init();

    match (&config.otlp_endpoint, export_error) {
        (Some(endpoint), None) => tracing::info!(endpoint = %endpoint, "Exporting spans over OTLP"),
        (Some(endpoint), Some(e)) => tracing::warn!(
            endpoint = %endpoint,
            error = %e,
            "OTLP export unavailable, logging to console only"
        ),
        (None, _) => tracing::debug!("OTEL_EXPORTER_OTLP_ENDPOINT not set, span export disabled"),
    }

    TelemetryGuard { provider }
}

fn otlp_tracer(endpoint: &str, resource: Resource) -> Result<(SdkTracerProvider, Tracer)> {
    let exporter = SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .with_timeout(EXPORT_TIMEOUT)
        .build()
        .context("failed to build OTLP span exporter")?;

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_sampler(Sampler::AlwaysOn)
        .with_resource(resource)
        .build();
    let tracer = provider.tracer(SERVICE_NAME);
    Ok((provider, tracer))
}
