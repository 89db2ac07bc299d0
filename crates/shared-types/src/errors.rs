//! # Traced Errors
//!
//! The error type that crosses connector boundaries. A `TracedError` carries a
//! message, an HTTP status code and a bounded stack of source locations. It is
//! serialised as JSON in `Error` responses and reconstituted by the caller.

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::Location;

/// Maximum number of stack frames retained by a traced error.
pub const MAX_STACK_DEPTH: usize = 16;

/// A source location recorded while an error propagates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackFrame {
    pub file: String,
    pub line: u32,
    #[serde(default)]
    pub column: u32,
}

impl StackFrame {
    fn from_location(location: &Location<'_>) -> Self {
        Self {
            file: location.file().to_string(),
            line: location.line(),
            column: location.column(),
        }
    }
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// Error with an HTTP status code and the locations it travelled through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TracedError {
    #[serde(rename = "error")]
    message: String,
    #[serde(rename = "statusCode", default = "default_status")]
    status_code: u16,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    stack: Vec<StackFrame>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    properties: BTreeMap<String, String>,
}

fn default_status() -> u16 {
    500
}

impl TracedError {
    /// New error with status 500, annotated with the caller's location.
    #[track_caller]
    pub fn new(message: impl Into<String>) -> Self {
        Self::with_code(500, message)
    }

    /// New error with an explicit HTTP status code.
    #[track_caller]
    pub fn with_code(status_code: u16, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status_code,
            stack: vec![StackFrame::from_location(Location::caller())],
            properties: BTreeMap::new(),
        }
    }

    /// Wrap any error, keeping its message.
    #[track_caller]
    pub fn wrap<E: std::error::Error + ?Sized>(err: &E) -> Self {
        Self::new(err.to_string())
    }

    /// Convert a panic payload caught at a task boundary into an error.
    #[track_caller]
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "panic".to_string()
        };
        Self::new(message)
    }

    /// Record the caller's location as an additional stack frame.
    #[must_use]
    #[track_caller]
    pub fn trace(mut self) -> Self {
        if self.stack.len() < MAX_STACK_DEPTH {
            self.stack.push(StackFrame::from_location(Location::caller()));
        }
        self
    }

    /// Attach a key/value property.
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn stack(&self) -> &[StackFrame] {
        &self.stack
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// Whether this error reports an elapsed time budget.
    pub fn is_timeout(&self) -> bool {
        self.status_code == 408
    }

    /// JSON body used in `Error` responses: `{"err": {...}}`.
    pub fn to_response_body(&self) -> Vec<u8> {
        serde_json::to_vec_pretty(&ErrorBody { err: self.clone() }).unwrap_or_else(|_| {
            format!("{{\"err\":{{\"error\":{:?},\"statusCode\":500}}}}", self.message).into_bytes()
        })
    }

    /// Reconstitute an error from an `Error` response body.
    pub fn from_response_body(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice::<ErrorBody>(body).map(|b| b.err)
    }
}

#[derive(Serialize, Deserialize)]
struct ErrorBody {
    err: TracedError,
}

impl fmt::Display for TracedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for TracedError {}

impl From<serde_json::Error> for TracedError {
    #[track_caller]
    fn from(err: serde_json::Error) -> Self {
        Self::with_code(400, err.to_string())
    }
}

impl From<std::io::Error> for TracedError {
    #[track_caller]
    fn from(err: std::io::Error) -> Self {
        Self::new(err.to_string())
    }
}
