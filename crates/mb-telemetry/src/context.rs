//! Trace context propagation through message headers.
//!
//! A request carries the W3C `Traceparent` and `Tracestate` headers of the
//! span that made it. The receiving connector makes its handler span a child
//! of that remote span, and outgoing requests made by the handler carry the
//! handler span's context in turn.
//!
//! ## Format
//!
//! `traceparent: 00-<32 hex trace id>-<16 hex span id>-<2 hex flags>`

use opentelemetry::trace::{
    SpanContext, SpanId, TraceContextExt, TraceFlags, TraceId, TraceState,
};
use opentelemetry::Context;
use shared_types::frame::{HEADER_TRACEPARENT, HEADER_TRACESTATE};
use shared_types::{FrameMut, Headers};
use std::fmt;
use std::str::FromStr;
use tracing_opentelemetry::OpenTelemetrySpanExt;

/// Parsed `traceparent` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceParent {
    pub trace_id: u128,
    pub span_id: u64,
    pub flags: u8,
}

impl TraceParent {
    #[must_use]
    pub fn is_sampled(&self) -> bool {
        self.flags & 0x01 != 0
    }

    /// Remote span context for this parent.
    pub fn to_span_context(&self, trace_state: TraceState) -> SpanContext {
        SpanContext::new(
            TraceId::from_bytes(self.trace_id.to_be_bytes()),
            SpanId::from_bytes(self.span_id.to_be_bytes()),
            TraceFlags::new(self.flags),
            true,
            trace_state,
        )
    }

    /// Build from a valid span context.
    pub fn from_span_context(cx: &SpanContext) -> Option<Self> {
        if !cx.is_valid() {
            return None;
        }
        Some(Self {
            trace_id: u128::from_be_bytes(cx.trace_id().to_bytes()),
            span_id: u64::from_be_bytes(cx.span_id().to_bytes()),
            flags: cx.trace_flags().to_u8(),
        })
    }
}

impl FromStr for TraceParent {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().split('-');
        let (Some(version), Some(trace), Some(span), Some(flags)) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(());
        };
        // Version ff is invalid; later versions may append fields.
        if version.len() != 2 || version.eq_ignore_ascii_case("ff") {
            return Err(());
        }
        if version == "00" && parts.next().is_some() {
            return Err(());
        }
        let hex = |v: &str, len: usize| v.len() == len && v.bytes().all(|b| b.is_ascii_hexdigit());
        if !hex(version, 2) || !hex(trace, 32) || !hex(span, 16) || !hex(flags, 2) {
            return Err(());
        }
        let trace_id = u128::from_str_radix(trace, 16).map_err(|_| ())?;
        let span_id = u64::from_str_radix(span, 16).map_err(|_| ())?;
        let flags = u8::from_str_radix(flags, 16).map_err(|_| ())?;
        if trace_id == 0 || span_id == 0 {
            return Err(());
        }
        Ok(Self {
            trace_id,
            span_id,
            flags,
        })
    }
}

impl fmt::Display for TraceParent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "00-{:032x}-{:016x}-{:02x}",
            self.trace_id, self.span_id, self.flags
        )
    }
}

/// OpenTelemetry context holding the remote parent found in the headers.
pub fn extract(headers: &Headers) -> Option<Context> {
    let parent: TraceParent = headers.get(HEADER_TRACEPARENT)?.parse().ok()?;
    let state = headers
        .get(HEADER_TRACESTATE)
        .and_then(|s| TraceState::from_str(s).ok())
        .unwrap_or_default();
    Some(Context::new().with_remote_span_context(parent.to_span_context(state)))
}

/// Write the span context of `cx` into the headers. Returns false, leaving
/// the headers untouched, when `cx` has no valid span.
pub fn inject(cx: &Context, headers: &mut Headers) -> bool {
    let span = cx.span();
    let span_context = span.span_context();
    let Some(parent) = TraceParent::from_span_context(span_context) else {
        return false;
    };
    let state = span_context.trace_state().header();
    if state.is_empty() {
        headers.remove(HEADER_TRACESTATE);
    }
    let mut frame = FrameMut::of(headers);
    frame.set_traceparent(&parent.to_string());
    if !state.is_empty() {
        frame.set_tracestate(&state);
    }
    true
}

/// Make `span` a child of the remote parent in the headers, if any.
pub fn set_remote_parent(span: &tracing::Span, headers: &Headers) {
    if let Some(cx) = extract(headers) {
        span.set_parent(cx);
    }
}

/// Inject the context of the current tracing span. A no-op when no
/// OpenTelemetry layer is installed.
pub fn inject_current(headers: &mut Headers) -> bool {
    inject(&tracing::Span::current().context(), headers)
}

/// Trace id of the current tracing span.
pub fn current_trace_id() -> Option<u128> {
    let cx = tracing::Span::current().context();
    let span = cx.span();
    TraceParent::from_span_context(span.span_context()).map(|p| p.trace_id)
}
