//! Prometheus metrics for connectors and distributed caches.
//!
//! All metrics follow the naming convention: `mb_<component>_<metric>_<unit>`
//!
//! ## Metric Types
//!
//! - **Counter**: Monotonically increasing value (e.g., requests_sent_total)
//! - **Gauge**: Value that can go up or down (e.g., pending_operations)
//! - **Histogram**: Distribution of values (e.g., handler_duration_seconds)

use lazy_static::lazy_static;
use prometheus::{
    exponential_buckets, Counter, CounterVec, Encoder, Gauge, Histogram, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // CONNECTOR METRICS
    // =========================================================================

    /// Outgoing requests by method and delivery mode
    pub static ref REQUESTS_SENT: CounterVec = CounterVec::new(
        Opts::new("mb_connector_requests_sent_total", "Requests published to the bus"),
        &["method", "mode"]
    ).expect("metric creation failed");

    /// Inbound requests handled, by response status
    pub static ref REQUESTS_HANDLED: CounterVec = CounterVec::new(
        Opts::new("mb_connector_requests_handled_total", "Requests dispatched to handlers"),
        &["status"]
    ).expect("metric creation failed");

    /// Requests that were not acknowledged within the network hop
    pub static ref ACK_TIMEOUTS: Counter = Counter::new(
        "mb_connector_ack_timeouts_total",
        "Requests that no responder acknowledged"
    ).expect("metric creation failed");

    /// Requests whose time budget ran out
    pub static ref TIMEOUTS: Counter = Counter::new(
        "mb_connector_timeouts_total",
        "Requests that ran out of time budget"
    ).expect("metric creation failed");

    /// Panics captured in handlers, tickers, tasks and callbacks
    pub static ref PANICS: Counter = Counter::new(
        "mb_connector_panics_total",
        "Panics captured and converted to errors"
    ).expect("metric creation failed");

    /// Fragments published for messages over the max fragment size
    pub static ref FRAGMENTS_SENT: Counter = Counter::new(
        "mb_connector_fragments_sent_total",
        "Message fragments published"
    ).expect("metric creation failed");

    /// Responses that arrived after their request completed
    pub static ref LATE_RESPONSES: Counter = Counter::new(
        "mb_connector_late_responses_total",
        "Responses with no request waiting for them"
    ).expect("metric creation failed");

    /// Handler dispatches in flight
    pub static ref PENDING_OPERATIONS: Gauge = Gauge::new(
        "mb_connector_pending_operations",
        "Handler dispatches and ticks in flight"
    ).expect("metric creation failed");

    /// Handler processing time
    pub static ref HANDLER_DURATION: Histogram = Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "mb_connector_handler_duration_seconds",
            "Time spent in request handlers"
        ).buckets(exponential_buckets(0.001, 2.0, 15).expect("buckets"))
    ).expect("metric creation failed");

    // =========================================================================
    // DISTRIBUTED CACHE METRICS
    // =========================================================================

    /// Loads answered with a value
    pub static ref CACHE_HITS: Counter = Counter::new(
        "mb_cache_hits_total",
        "Cache loads that found a value"
    ).expect("metric creation failed");

    /// Loads that found nothing or an inconsistent value
    pub static ref CACHE_MISSES: Counter = Counter::new(
        "mb_cache_misses_total",
        "Cache loads that found no value"
    ).expect("metric creation failed");

    /// Loads that found differing copies across peers
    pub static ref CACHE_INCONSISTENCIES: Counter = Counter::new(
        "mb_cache_inconsistencies_total",
        "Keys deleted because peers held different values"
    ).expect("metric creation failed");

    /// Elements handed over to a peer on shutdown
    pub static ref CACHE_RESCUED: Counter = Counter::new(
        "mb_cache_rescued_total",
        "Elements rescued to a peer on shutdown"
    ).expect("metric creation failed");
}

/// Handle for the registered metrics
pub struct MetricsHandle {
    _registry: Arc<Registry>,
}

/// Register all metrics with the global registry.
///
/// Registering twice is not an error.
pub fn register_metrics() -> Result<MetricsHandle, TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        // Connector
        Box::new(REQUESTS_SENT.clone()),
        Box::new(REQUESTS_HANDLED.clone()),
        Box::new(ACK_TIMEOUTS.clone()),
        Box::new(TIMEOUTS.clone()),
        Box::new(PANICS.clone()),
        Box::new(FRAGMENTS_SENT.clone()),
        Box::new(LATE_RESPONSES.clone()),
        Box::new(PENDING_OPERATIONS.clone()),
        Box::new(HANDLER_DURATION.clone()),
        // Distributed cache
        Box::new(CACHE_HITS.clone()),
        Box::new(CACHE_MISSES.clone()),
        Box::new(CACHE_INCONSISTENCIES.clone()),
        Box::new(CACHE_RESCUED.clone()),
    ];

    for metric in metrics {
        match REGISTRY.register(metric) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(TelemetryError::MetricsInit(e.to_string())),
        }
    }

    Ok(MetricsHandle {
        _registry: Arc::new(REGISTRY.clone()),
    })
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}

/// Timer guard for automatic histogram observation.
pub struct HistogramTimer {
    histogram: Histogram,
    start: std::time::Instant,
}

impl HistogramTimer {
    /// Start a new timer for the given histogram.
    pub fn new(histogram: &Histogram) -> Self {
        Self {
            histogram: histogram.clone(),
            start: std::time::Instant::now(),
        }
    }
}

impl Drop for HistogramTimer {
    fn drop(&mut self) {
        self.histogram.observe(self.start.elapsed().as_secs_f64());
    }
}
