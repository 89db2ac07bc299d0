//! # OpenTelemetry Adapter
//!
//! [`SelectiveProcessor`] plugs the selective buffer into an OpenTelemetry
//! tracer provider in front of a downstream processor, usually the batch
//! OTLP exporter. [`SelectiveHandle`] is the cloneable side used to elect
//! traces.

use crate::buffer::{BufferedSpan, SelectiveBuffer};
use crate::TraceSelector;
use opentelemetry::trace::TraceResult;
use opentelemetry::Context;
use opentelemetry_sdk::export::trace::SpanData;
use opentelemetry_sdk::trace::{Span, SpanProcessor};
use std::sync::Arc;
use tracing::debug;

impl BufferedSpan for SpanData {
    fn trace_id(&self) -> u128 {
        u128::from_be_bytes(self.span_context.trace_id().to_bytes())
    }
}

/// Tail-sampling span processor.
#[derive(Debug)]
pub struct SelectiveProcessor {
    buffer: Arc<SelectiveBuffer<SpanData>>,
    downstream: Arc<dyn SpanProcessor>,
}

impl SelectiveProcessor {
    /// Wrap a downstream processor with the default buffer limits.
    pub fn new<P: SpanProcessor + 'static>(downstream: P) -> Self {
        Self::with_buffer(downstream, SelectiveBuffer::new())
    }

    pub fn with_buffer<P: SpanProcessor + 'static>(
        downstream: P,
        buffer: SelectiveBuffer<SpanData>,
    ) -> Self {
        Self {
            buffer: Arc::new(buffer),
            downstream: Arc::new(downstream),
        }
    }

    /// Handle used to select traces after the processor was handed to the
    /// tracer provider.
    #[must_use]
    pub fn handle(&self) -> SelectiveHandle {
        SelectiveHandle {
            buffer: self.buffer.clone(),
            downstream: self.downstream.clone(),
        }
    }
}

impl SpanProcessor for SelectiveProcessor {
    fn on_start(&self, span: &mut Span, cx: &Context) {
        self.downstream.on_start(span, cx);
    }

    fn on_end(&self, span: SpanData) {
        if let Some(selected) = self.buffer.on_end(span) {
            self.downstream.on_end(selected);
        }
    }

    fn force_flush(&self) -> TraceResult<()> {
        self.downstream.force_flush()
    }

    fn shutdown(&self) -> TraceResult<()> {
        self.downstream.shutdown()
    }
}

/// Cloneable handle onto a [`SelectiveProcessor`].
#[derive(Debug, Clone)]
pub struct SelectiveHandle {
    buffer: Arc<SelectiveBuffer<SpanData>>,
    downstream: Arc<dyn SpanProcessor>,
}

impl TraceSelector for SelectiveHandle {
    fn select(&self, trace_id: u128) -> bool {
        let (fresh, spans) = self.buffer.select(trace_id);
        if !spans.is_empty() {
            debug!(
                trace_id = %crate::format_trace_id(trace_id),
                spans = spans.len(),
                "Exporting buffered spans of selected trace"
            );
        }
        for span in spans {
            self.downstream.on_end(span);
        }
        fresh
    }
}
