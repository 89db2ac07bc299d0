//! # Microbus Telemetry
//!
//! Observability for connectors and the host binary.
//!
//! ## Components
//!
//! - **Logs**: `tracing-subscriber` with an env filter, pretty or JSON output
//! - **Traces**: OpenTelemetry OTLP export; in `PROD` spans pass through the
//!   selective processor and only elected traces leave the process
//! - **Context**: W3C `traceparent` parsing, formatting and propagation
//!   through message headers
//! - **Metrics**: Prometheus counters for connectors and caches
//!
//! ## Usage
//!
//! ```rust,ignore
//! use mb_telemetry::{init_telemetry, TelemetryConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = TelemetryConfig::from_env();
//!     let guard = init_telemetry(config).await.expect("telemetry");
//!     if let Some(selector) = guard.trace_selector() {
//!         connector.set_trace_selector(Arc::new(selector));
//!     }
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | unset | OTLP collector; tracing export is off when unset |
//! | `OTEL_SERVICE_NAME` | `microbus` | Service name in traces |
//! | `MB_LOG_LEVEL` / `RUST_LOG` | `info` | Log level filter |
//! | `MB_JSON_LOGS` | `false` | JSON formatted logs |
//! | `MB_CONSOLE_OUTPUT` | `true` | Write logs to stdout |
//! | `MICROBUS_DEPLOYMENT` | `LOCAL` | `PROD` turns on selective tracing |

pub mod config;
pub mod context;
pub mod metrics;
mod tracing_setup;

pub use config::TelemetryConfig;
pub use context::{current_trace_id, inject_current, set_remote_parent, TraceParent};
pub use metrics::{encode_metrics, register_metrics, HistogramTimer, MetricsHandle};
pub use mb_03_selective_tracing::SelectiveHandle;
pub use tracing_setup::{init_tracing, TracingGuard};

/// Errors raised while initialising telemetry.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("Failed to initialize OpenTelemetry tracer: {0}")]
    TracerInit(String),

    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Keeps telemetry alive. Dropping it flushes and shuts down the tracer
/// provider.
pub struct TelemetryGuard {
    tracing: TracingGuard,
    _metrics: MetricsHandle,
}

impl TelemetryGuard {
    /// Selection handle of the selective processor, present only when
    /// selective tracing is on.
    pub fn trace_selector(&self) -> Option<SelectiveHandle> {
        self.tracing.selector()
    }
}

/// Initialize logging, tracing export and metrics.
///
/// Fails if a global subscriber is already installed.
pub async fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let metrics = register_metrics()?;
    let tracing = init_tracing(&config).await?;
    Ok(TelemetryGuard {
        tracing,
        _metrics: metrics,
    })
}
