//! # Messages
//!
//! HTTP-shaped requests and responses, and the bincode wire codec that carries
//! them over the bus.

use crate::errors::TracedError;
use crate::frame::{Frame, FrameError};
use crate::headers::Headers;
use crate::url::{ParsedUrl, UrlError};
use http::header::{HeaderName, HeaderValue};
use http::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

pub use http::header::{CONTENT_LENGTH, CONTENT_TYPE};

pub const JSON_CONTENT_TYPE: &str = "application/json";

/// An HTTP-shaped request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    #[serde(with = "method_serde")]
    pub method: Method,
    pub url: String,
    pub headers: Headers,
    pub body: Vec<u8>,
    /// Arguments extracted from path placeholders by the receiving connector.
    #[serde(skip)]
    pub path_args: BTreeMap<String, String>,
}

impl Request {
    #[must_use]
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Headers::new(),
            body: Vec::new(),
            path_args: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn parsed_url(&self) -> Result<ParsedUrl, UrlError> {
        ParsedUrl::parse(&self.url)
    }

    /// A query argument of the request URL.
    pub fn query_arg(&self, name: &str) -> Option<String> {
        self.parsed_url().ok()?.query_arg(name)
    }

    /// A path argument captured by a `{name}` placeholder.
    pub fn path_arg(&self, name: &str) -> Option<&str> {
        self.path_args.get(name).map(String::as_str)
    }

    pub fn frame(&self) -> Frame<'_> {
        Frame::of(&self.headers)
    }

    /// Deserialize a JSON body.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, TracedError> {
        serde_json::from_slice(&self.body).map_err(|e| TracedError::with_code(400, e.to_string()))
    }
}

/// An HTTP-shaped response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    #[serde(with = "status_serde")]
    pub status: StatusCode,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl Default for Response {
    fn default() -> Self {
        Self::new(StatusCode::OK)
    }
}

impl Response {
    #[must_use]
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Vec::new(),
        }
    }

    /// 200 OK with a raw body.
    #[must_use]
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self::new(StatusCode::OK).with_body(body)
    }

    /// 200 OK with a JSON body.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, TracedError> {
        let body = serde_json::to_vec(value).map_err(|e| TracedError::new(e.to_string()))?;
        Ok(Self::ok(body).with_header(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE)))
    }

    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Deserialize a JSON body.
    pub fn parse_json<T: DeserializeOwned>(&self) -> Result<T, TracedError> {
        serde_json::from_slice(&self.body).map_err(|e| TracedError::new(e.to_string()))
    }

    pub fn frame(&self) -> Frame<'_> {
        Frame::of(&self.headers)
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

mod method_serde {
    use http::Method;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(method: &Method, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(method.as_str())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Method, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Method::from_bytes(raw.as_bytes()).map_err(D::Error::custom)
    }
}

mod status_serde {
    use http::StatusCode;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(status: &StatusCode, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u16(status.as_u16())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<StatusCode, D::Error> {
        StatusCode::from_u16(u16::deserialize(deserializer)?).map_err(D::Error::custom)
    }
}

/// What travels on the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WireMessage {
    Request(Request),
    Response(Response),
}

impl WireMessage {
    pub fn headers(&self) -> &Headers {
        match self {
            WireMessage::Request(r) => &r.headers,
            WireMessage::Response(r) => &r.headers,
        }
    }

    pub fn frame(&self) -> Frame<'_> {
        Frame::of(self.headers())
    }
}

#[derive(Debug, Error)]
pub enum WireError {
    #[error("failed to encode message: {0}")]
    Encode(bincode::Error),

    #[error("failed to decode message: {0}")]
    Decode(bincode::Error),

    #[error("expected a {expected}")]
    UnexpectedKind { expected: &'static str },

    #[error(transparent)]
    Frame(#[from] FrameError),
}

pub fn encode(msg: &WireMessage) -> Result<Vec<u8>, WireError> {
    bincode::serialize(msg).map_err(WireError::Encode)
}

pub fn decode(bytes: &[u8]) -> Result<WireMessage, WireError> {
    bincode::deserialize(bytes).map_err(WireError::Decode)
}
