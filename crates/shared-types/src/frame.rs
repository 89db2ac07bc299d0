//! # Frame Headers
//!
//! The reserved `Microbus-*` headers carry everything the runtime needs to
//! route, correlate and budget a message. Handlers never set them directly;
//! the connector writes them through [`FrameMut`] and reads them through
//! [`Frame`].

use crate::headers::Headers;
use http::header::{HeaderName, HeaderValue};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Prefix shared by every reserved header.
pub const HEADER_PREFIX: &str = "microbus-";

pub const HEADER_MSG_ID: &str = "microbus-msg-id";
pub const HEADER_FROM_HOST: &str = "microbus-from-host";
pub const HEADER_FROM_ID: &str = "microbus-from-id";
pub const HEADER_FROM_VERSION: &str = "microbus-from-version";
pub const HEADER_QUEUE: &str = "microbus-queue";
pub const HEADER_OP_CODE: &str = "microbus-op-code";
pub const HEADER_CALL_DEPTH: &str = "microbus-call-depth";
pub const HEADER_TIME_BUDGET: &str = "microbus-time-budget";
pub const HEADER_FRAGMENT: &str = "microbus-fragment";

/// W3C trace context headers, passed through hops untouched.
pub const HEADER_TRACEPARENT: &str = "traceparent";
pub const HEADER_TRACESTATE: &str = "tracestate";

/// Errors raised when a reserved header is absent or malformed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("missing header {0}")]
    Missing(&'static str),

    #[error("invalid header {header}: {value:?}")]
    Invalid { header: &'static str, value: String },
}

/// Role of a message within the request/ack/response exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    Request,
    Ack,
    Response,
    Error,
}

impl OpCode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            OpCode::Request => "Req",
            OpCode::Ack => "Ack",
            OpCode::Response => "Res",
            OpCode::Error => "Err",
        }
    }

    /// Whether the op-code ends the exchange for a responder.
    #[must_use]
    pub fn is_final(self) -> bool {
        matches!(self, OpCode::Response | OpCode::Error)
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OpCode {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Req" => Ok(OpCode::Request),
            "Ack" => Ok(OpCode::Ack),
            "Res" => Ok(OpCode::Response),
            "Err" => Ok(OpCode::Error),
            other => Err(FrameError::Invalid {
                header: HEADER_OP_CODE,
                value: other.to_string(),
            }),
        }
    }
}

/// Read-only view over the reserved headers of a message.
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    headers: &'a Headers,
}

impl<'a> Frame<'a> {
    pub fn of(headers: &'a Headers) -> Self {
        Self { headers }
    }

    pub fn msg_id(&self) -> Option<&'a str> {
        self.headers.get(HEADER_MSG_ID)
    }

    pub fn from_host(&self) -> Option<&'a str> {
        self.headers.get(HEADER_FROM_HOST)
    }

    pub fn from_id(&self) -> Option<&'a str> {
        self.headers.get(HEADER_FROM_ID)
    }

    pub fn from_version(&self) -> u32 {
        self.headers
            .get(HEADER_FROM_VERSION)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    pub fn queue(&self) -> Option<&'a str> {
        self.headers.get(HEADER_QUEUE)
    }

    /// Op-code of the message. A missing header is treated as a request.
    pub fn op_code(&self) -> Result<OpCode, FrameError> {
        match self.headers.get(HEADER_OP_CODE) {
            None => Ok(OpCode::Request),
            Some(v) => v.parse(),
        }
    }

    /// Number of hops so far, zero when absent or malformed.
    pub fn call_depth(&self) -> u32 {
        self.headers
            .get(HEADER_CALL_DEPTH)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0)
    }

    /// Remaining time budget, if the sender declared one.
    pub fn time_budget(&self) -> Option<Duration> {
        self.headers
            .get(HEADER_TIME_BUDGET)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_millis)
    }

    /// Fragment `(index, max)`. An absent header means `(1, 1)`.
    pub fn fragment(&self) -> Result<(u32, u32), FrameError> {
        let Some(value) = self.headers.get(HEADER_FRAGMENT) else {
            return Ok((1, 1));
        };
        let invalid = || FrameError::Invalid {
            header: HEADER_FRAGMENT,
            value: value.to_string(),
        };
        let (index, max) = value.split_once('/').ok_or_else(invalid)?;
        let index: u32 = index.trim().parse().map_err(|_| invalid())?;
        let max: u32 = max.trim().parse().map_err(|_| invalid())?;
        if max == 0 || index == 0 || index > max {
            return Err(invalid());
        }
        Ok((index, max))
    }

    pub fn traceparent(&self) -> Option<&'a str> {
        self.headers.get(HEADER_TRACEPARENT)
    }

    pub fn tracestate(&self) -> Option<&'a str> {
        self.headers.get(HEADER_TRACESTATE)
    }

    /// Message id, failing when absent.
    pub fn require_msg_id(&self) -> Result<&'a str, FrameError> {
        self.msg_id().ok_or(FrameError::Missing(HEADER_MSG_ID))
    }

    /// Sender host, failing when absent.
    pub fn require_from_host(&self) -> Result<&'a str, FrameError> {
        self.from_host().ok_or(FrameError::Missing(HEADER_FROM_HOST))
    }

    /// Sender id, failing when absent.
    pub fn require_from_id(&self) -> Result<&'a str, FrameError> {
        self.from_id().ok_or(FrameError::Missing(HEADER_FROM_ID))
    }
}

/// Mutable view used by the connector to stamp outgoing messages.
#[derive(Debug)]
pub struct FrameMut<'a> {
    headers: &'a mut Headers,
}

impl<'a> FrameMut<'a> {
    pub fn of(headers: &'a mut Headers) -> Self {
        Self { headers }
    }

    /// Frame values are runtime identifiers and validated host names, so the
    /// only bytes a header value rejects (control characters) never occur.
    fn put(&mut self, name: &'static str, value: &str) {
        if let Ok(value) = HeaderValue::from_bytes(value.as_bytes()) {
            self.headers.insert(HeaderName::from_static(name), value);
        }
    }

    fn put_number(&mut self, name: &'static str, value: u64) {
        self.headers
            .insert(HeaderName::from_static(name), HeaderValue::from(value));
    }

    pub fn set_msg_id(&mut self, id: &str) -> &mut Self {
        self.put(HEADER_MSG_ID, id);
        self
    }

    pub fn set_from_host(&mut self, host: &str) -> &mut Self {
        self.put(HEADER_FROM_HOST, host);
        self
    }

    pub fn set_from_id(&mut self, id: &str) -> &mut Self {
        self.put(HEADER_FROM_ID, id);
        self
    }

    pub fn set_from_version(&mut self, version: u32) -> &mut Self {
        if version == 0 {
            self.headers.remove(HEADER_FROM_VERSION);
        } else {
            self.put_number(HEADER_FROM_VERSION, u64::from(version));
        }
        self
    }

    pub fn set_queue(&mut self, queue: &str) -> &mut Self {
        self.put(HEADER_QUEUE, queue);
        self
    }

    pub fn set_op_code(&mut self, op: OpCode) -> &mut Self {
        self.headers.insert(
            HeaderName::from_static(HEADER_OP_CODE),
            HeaderValue::from_static(op.as_str()),
        );
        self
    }

    pub fn set_call_depth(&mut self, depth: u32) -> &mut Self {
        if depth == 0 {
            self.headers.remove(HEADER_CALL_DEPTH);
        } else {
            self.put_number(HEADER_CALL_DEPTH, u64::from(depth));
        }
        self
    }

    pub fn set_time_budget(&mut self, budget: Duration) -> &mut Self {
        let millis = u64::try_from(budget.as_millis()).unwrap_or(u64::MAX);
        self.put_number(HEADER_TIME_BUDGET, millis);
        self
    }

    /// Set the fragment header. `max <= 1` removes it.
    pub fn set_fragment(&mut self, index: u32, max: u32) -> &mut Self {
        if max <= 1 {
            self.headers.remove(HEADER_FRAGMENT);
        } else {
            self.put(HEADER_FRAGMENT, &format!("{index}/{max}"));
        }
        self
    }

    pub fn set_traceparent(&mut self, value: &str) -> &mut Self {
        self.put(HEADER_TRACEPARENT, value);
        self
    }

    pub fn set_tracestate(&mut self, value: &str) -> &mut Self {
        self.put(HEADER_TRACESTATE, value);
        self
    }
}

/// Whether a header name is reserved to the runtime.
pub fn is_reserved(name: &str) -> bool {
    name.get(..HEADER_PREFIX.len())
        .is_some_and(|p| p.eq_ignore_ascii_case(HEADER_PREFIX))
        || name.eq_ignore_ascii_case(HEADER_TRACEPARENT)
        || name.eq_ignore_ascii_case(HEADER_TRACESTATE)
}

/// Remove every reserved header. Ingress boundaries call this on requests
/// coming from outside the fabric and on responses returned to outside
/// clients.
pub fn strip_reserved(headers: &mut Headers) {
    headers.retain_names(|name| !is_reserved(name.as_str()));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragment_defaults_when_absent() {
        let h = Headers::new();
        assert_eq!(Frame::of(&h).fragment().unwrap(), (1, 1));
    }

    #[test]
    fn test_fragment_roundtrip_and_validation() {
        let mut h = Headers::new();
        FrameMut::of(&mut h).set_fragment(2, 5);
        assert_eq!(h.get("microbus-fragment"), Some("2/5"));
        assert_eq!(Frame::of(&h).fragment().unwrap(), (2, 5));

        for bad in ["0/3", "4/3", "x/3", "3", "1/0"] {
            h.set(HEADER_FRAGMENT, bad).unwrap();
            assert!(Frame::of(&h).fragment().is_err(), "{bad} should fail");
        }

        FrameMut::of(&mut h).set_fragment(1, 1);
        assert!(!h.contains(HEADER_FRAGMENT));
    }

    #[test]
    fn test_op_code_parsing() {
        let mut h = Headers::new();
        assert_eq!(Frame::of(&h).op_code().unwrap(), OpCode::Request);
        FrameMut::of(&mut h).set_op_code(OpCode::Error);
        assert_eq!(Frame::of(&h).op_code().unwrap(), OpCode::Error);
        h.set(HEADER_OP_CODE, "Bogus").unwrap();
        assert!(Frame::of(&h).op_code().is_err());
    }

    #[test]
    fn test_call_depth_and_budget() {
        let mut h = Headers::new();
        assert_eq!(Frame::of(&h).call_depth(), 0);
        assert_eq!(Frame::of(&h).time_budget(), None);

        FrameMut::of(&mut h)
            .set_call_depth(7)
            .set_time_budget(Duration::from_millis(1500));
        assert_eq!(Frame::of(&h).call_depth(), 7);
        assert_eq!(
            Frame::of(&h).time_budget(),
            Some(Duration::from_millis(1500))
        );
    }

    #[test]
    fn test_require_reports_missing_header() {
        let h = Headers::new();
        assert_eq!(
            Frame::of(&h).require_msg_id(),
            Err(FrameError::Missing(HEADER_MSG_ID))
        );
    }

    #[test]
    fn test_strip_reserved() {
        let mut h = Headers::new();
        FrameMut::of(&mut h)
            .set_msg_id("abcdefgh")
            .set_from_host("www.example.com")
            .set_call_depth(3)
            .set_traceparent("00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01")
            .set_tracestate("k=v");
        h.set("Microbus-Custom", "x").unwrap();
        h.set("Content-Type", "text/plain").unwrap();

        strip_reserved(&mut h);
        assert_eq!(h.len(), 1);
        assert_eq!(h.get("content-type"), Some("text/plain"));
    }
}
