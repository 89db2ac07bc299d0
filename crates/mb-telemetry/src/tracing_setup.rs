//! OpenTelemetry tracing setup.
//!
//! Spans are exported over OTLP through a batch processor. In `PROD` the
//! batch processor sits behind the selective processor so that only traces
//! elected with `force_trace` are exported.

use mb_03_selective_tracing::{SelectiveHandle, SelectiveProcessor};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    runtime,
    trace::{self, BatchSpanProcessor, RandomIdGenerator, Sampler, TracerProvider},
    Resource,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::{TelemetryConfig, TelemetryError};

/// Guard that shuts down the tracer provider on drop.
pub struct TracingGuard {
    provider: Option<TracerProvider>,
    selector: Option<SelectiveHandle>,
}

impl TracingGuard {
    pub fn selector(&self) -> Option<SelectiveHandle> {
        self.selector.clone()
    }
}

impl Drop for TracingGuard {
    fn drop(&mut self) {
        if let Some(provider) = &self.provider {
            if let Err(e) = provider.shutdown() {
                eprintln!("Error shutting down tracer provider: {:?}", e);
            }
        }
    }
}

fn trace_config(config: &TelemetryConfig) -> trace::Config {
    trace::Config::default()
        .with_sampler(Sampler::AlwaysOn)
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(Resource::new(vec![
            KeyValue::new("service.name", config.service_name.clone()),
            KeyValue::new("service.version", config.service_version.clone()),
            KeyValue::new("deployment.environment", config.deployment.clone()),
        ]))
}

fn build_provider(
    config: &TelemetryConfig,
    endpoint: &str,
) -> Result<(TracerProvider, Option<SelectiveHandle>), TelemetryError> {
    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(endpoint)
        .build_span_exporter()
        .map_err(|e| TelemetryError::TracerInit(e.to_string()))?;

    if !config.selective_tracing() {
        let provider = TracerProvider::builder()
            .with_batch_exporter(exporter, runtime::Tokio)
            .with_config(trace_config(config))
            .build();
        return Ok((provider, None));
    }

    let batch = BatchSpanProcessor::builder(exporter, runtime::Tokio).build();
    let selective = SelectiveProcessor::new(batch);
    let handle = selective.handle();
    let provider = TracerProvider::builder()
        .with_span_processor(selective)
        .with_config(trace_config(config))
        .build();
    Ok((provider, Some(handle)))
}

/// Initialize logging and, when an OTLP endpoint is configured, span export.
pub async fn init_tracing(config: &TelemetryConfig) -> Result<TracingGuard, TelemetryError> {
    let (provider, selector) = match config.otlp_endpoint.as_deref() {
        Some(endpoint) => {
            let (provider, selector) = build_provider(config, endpoint)?;
            (Some(provider), selector)
        }
        None => (None, None),
    };

    let otel_layer = provider.as_ref().map(|p| {
        tracing_opentelemetry::layer().with_tracer(p.tracer(config.service_name.clone()))
    });

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| TelemetryError::Config(e.to_string()))?;

    let fmt_layer = match (config.console_output, config.json_logs) {
        (false, _) => None,
        (true, true) => Some(
            tracing_subscriber::fmt::layer()
                .json()
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .boxed(),
        ),
        (true, false) => Some(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_ansi(true)
                .boxed(),
        ),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(otel_layer)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| TelemetryError::TracerInit(e.to_string()))?;

    tracing::info!(
        service = %config.service_name,
        otlp_endpoint = config.otlp_endpoint.as_deref().unwrap_or("-"),
        selective = selector.is_some(),
        "Telemetry initialized"
    );

    Ok(TracingGuard { provider, selector })
}
