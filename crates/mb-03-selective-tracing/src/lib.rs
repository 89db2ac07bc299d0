//! # MB-03 Selective Tracing
//!
//! Tail sampling for production fleets: every ended span is held in a
//! bounded ring, and only traces that someone explicitly selects are
//! exported. A selection also pulls the already buffered spans of the trace
//! out of the ring, so a trace chosen after the fact is still complete.
//!
//! ## Components
//!
//! - [`SelectiveBuffer`]: ring and selection sets, independent of any
//!   tracing SDK
//! - [`SelectiveProcessor`]: OpenTelemetry `SpanProcessor` over the buffer
//! - [`SelectiveHandle`]: cloneable [`TraceSelector`] for the connector
//!
//! ## Usage Example
//!
//! ```ignore
//! let batch = BatchSpanProcessor::builder(exporter, runtime::Tokio).build();
//! let selective = SelectiveProcessor::new(batch);
//! let handle = selective.handle();
//! let provider = TracerProvider::builder().with_span_processor(selective).build();
//!
//! connector.set_trace_selector(Arc::new(handle));
//! ```

pub mod buffer;
pub mod processor;

pub use buffer::{
    format_trace_id, parse_trace_id, BufferedSpan, SelectiveBuffer, DEFAULT_MAX_BUFFERED_SPANS,
    DEFAULT_MAX_SELECTED, DEFAULT_SELECTION_TTL,
};
pub use processor::{SelectiveHandle, SelectiveProcessor};

/// Elects traces for export.
pub trait TraceSelector: Send + Sync {
    /// Select a trace. Returns `false` when it was already selected.
    fn select(&self, trace_id: u128) -> bool;
}
