//! # Headers
//!
//! [`http::HeaderMap`] with string-friendly accessors and a serde form for the
//! wire codec.

use http::header::{AsHeaderName, HeaderName, HeaderValue, InvalidHeaderName, InvalidHeaderValue};
use http::HeaderMap;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HeaderError {
    #[error("invalid header name {0:?}")]
    InvalidName(String, #[source] InvalidHeaderName),

    #[error("invalid value for header {0}")]
    InvalidValue(String, #[source] InvalidHeaderValue),
}

/// Header collection of a request or response.
///
/// Names are case-insensitive. Values are exposed as UTF-8 strings; a value
/// that is not valid UTF-8 reads as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(HeaderMap);

impl Headers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// First value of a header.
    pub fn get<K: AsHeaderName>(&self, name: K) -> Option<&str> {
        self.0.get(name).and_then(value_str)
    }

    /// All values of a header, in insertion order.
    pub fn get_all<K: AsHeaderName>(&self, name: K) -> impl Iterator<Item = &str> {
        self.0.get_all(name).into_iter().filter_map(value_str)
    }

    /// Replace every value of a header with a single value.
    pub fn insert(&mut self, name: HeaderName, value: HeaderValue) {
        self.0.insert(name, value);
    }

    /// Add a value without removing existing ones.
    pub fn append(&mut self, name: HeaderName, value: HeaderValue) {
        self.0.append(name, value);
    }

    /// Parse and replace a header given as strings.
    pub fn set(&mut self, name: &str, value: &str) -> Result<(), HeaderError> {
        let (name, value) = parse_pair(name, value)?;
        self.0.insert(name, value);
        Ok(())
    }

    /// Remove every value of a header. Returns whether anything was removed.
    pub fn remove<K: AsHeaderName>(&mut self, name: K) -> bool {
        self.0.remove(name).is_some()
    }

    pub fn contains<K: AsHeaderName>(&self, name: K) -> bool {
        self.0.contains_key(name)
    }

    /// Keep only the headers whose name satisfies the predicate.
    pub fn retain_names(&mut self, mut keep: impl FnMut(&HeaderName) -> bool) {
        let dropped: Vec<HeaderName> = self.0.keys().filter(|k| !keep(k)).cloned().collect();
        for name in dropped {
            self.0.remove(&name);
        }
    }

    /// Iterate over `(name, value)` pairs with UTF-8 values.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0
            .iter()
            .filter_map(|(k, v)| value_str(v).map(|v| (k.as_str(), v)))
    }

    /// Number of values (a repeated header counts once per value).
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &HeaderMap {
        &self.0
    }

    #[must_use]
    pub fn into_map(self) -> HeaderMap {
        self.0
    }
}

impl From<HeaderMap> for Headers {
    fn from(map: HeaderMap) -> Self {
        Self(map)
    }
}

fn value_str(value: &HeaderValue) -> Option<&str> {
    std::str::from_utf8(value.as_bytes()).ok()
}

fn parse_pair(name: &str, value: &str) -> Result<(HeaderName, HeaderValue), HeaderError> {
    let header = HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| HeaderError::InvalidName(name.to_string(), e))?;
    let value = HeaderValue::from_bytes(value.as_bytes())
        .map_err(|e| HeaderError::InvalidValue(name.to_string(), e))?;
    Ok((header, value))
}

impl Serialize for Headers {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.0.iter().map(|(k, v)| (k.as_str(), v.as_bytes())))
    }
}

impl<'de> Deserialize<'de> for Headers {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let pairs = Vec::<(String, Vec<u8>)>::deserialize(deserializer)?;
        let mut map = HeaderMap::with_capacity(pairs.len());
        for (name, value) in pairs {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(D::Error::custom)?;
            let value = HeaderValue::from_bytes(&value).map_err(D::Error::custom)?;
            map.append(name, value);
        }
        Ok(Self(map))
    }
}
