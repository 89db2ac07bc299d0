//! Options of `subscribe` and `publish`.

use serde::Serialize;
use shared_types::header::{HeaderName, HeaderValue};
use shared_types::message::{CONTENT_TYPE, JSON_CONTENT_TYPE};
use shared_types::{percent_encode, Headers, Method, TracedError};
use std::time::Duration;

/// Queue group a subscription joins.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Queue {
    /// Load balanced across all replicas of the host.
    #[default]
    Default,
    /// Every replica receives every request.
    None,
    /// Load balanced within an explicit queue group.
    Named(String),
}

/// Options of a subscription.
#[derive(Debug, Clone, Default)]
pub struct SubscribeOptions {
    pub(crate) method: Option<Method>,
    pub(crate) queue: Queue,
}

impl SubscribeOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Only accept requests with this method. Without one, any method is
    /// accepted.
    #[must_use]
    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    #[must_use]
    pub fn default_queue(mut self) -> Self {
        self.queue = Queue::Default;
        self
    }

    #[must_use]
    pub fn no_queue(mut self) -> Self {
        self.queue = Queue::None;
        self
    }

    #[must_use]
    pub fn queue(mut self, name: &str) -> Self {
        self.queue = Queue::Named(name.to_string());
        self
    }

    pub fn method_filter(&self) -> Option<&Method> {
        self.method.as_ref()
    }

    pub fn queue_kind(&self) -> &Queue {
        &self.queue
    }
}

/// Describes an outgoing request.
#[derive(Debug, Clone)]
pub struct PublishOptions {
    pub(crate) method: Method,
    pub(crate) url: String,
    pub(crate) headers: Headers,
    pub(crate) body: Vec<u8>,
    pub(crate) query: Vec<(String, String)>,
    pub(crate) time_budget: Option<Duration>,
    pub(crate) multicast: bool,
}

impl PublishOptions {
    /// A request with an explicit method. Multicast unless changed.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Headers::new(),
            body: Vec::new(),
            query: Vec::new(),
            time_budget: None,
            multicast: true,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self::new(Method::POST, url).body(body)
    }

    pub fn put(url: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self::new(Method::PUT, url).body(body)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::DELETE, url)
    }

    #[must_use]
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    #[must_use]
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    #[must_use]
    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Serialize `value` as the JSON body.
    pub fn json<T: Serialize + ?Sized>(mut self, value: &T) -> Result<Self, TracedError> {
        self.body = serde_json::to_vec(value).map_err(|e| TracedError::wrap(&e))?;
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
        Ok(self)
    }

    /// Append a query argument, encoded.
    #[must_use]
    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Time budget when the context has no deadline.
    #[must_use]
    pub fn time_budget(mut self, budget: Duration) -> Self {
        self.time_budget = Some(budget);
        self
    }

    #[must_use]
    pub fn multicast(mut self) -> Self {
        self.multicast = true;
        self
    }

    #[must_use]
    pub fn unicast(mut self) -> Self {
        self.multicast = false;
        self
    }

    pub fn is_multicast(&self) -> bool {
        self.multicast
    }

    /// The URL with the query arguments appended.
    pub(crate) fn full_url(&self) -> String {
        if self.query.is_empty() {
            return self.url.clone();
        }
        let encoded: Vec<String> = self
            .query
            .iter()
            .map(|(k, v)| format!("{}={}", percent_encode(k), percent_encode(v)))
            .collect();
        let separator = if self.url.contains('?') { '&' } else { '?' };
        format!("{}{separator}{}", self.url, encoded.join("&"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_defaults() {
        let opts = SubscribeOptions::new();
        assert_eq!(opts.method_filter(), None);
        assert_eq!(opts.queue_kind(), &Queue::Default);
        let opts = opts.method(Method::GET).no_queue();
        assert_eq!(opts.method_filter(), Some(&Method::GET));
        assert_eq!(opts.queue_kind(), &Queue::None);
    }

    #[test]
    fn test_full_url_encodes_query() {
        let opts = PublishOptions::get("https://cache.example:888/dcache/all?do=load")
            .query("key", "a b&c");
        assert_eq!(
            opts.full_url(),
            "https://cache.example:888/dcache/all?do=load&key=a%20b%26c"
        );
        assert!(opts.is_multicast());
        assert!(!opts.unicast().is_multicast());
    }

    #[test]
    fn test_json_body() {
        let opts = PublishOptions::post("https://h/x", Vec::new())
            .json(&serde_json::json!({"x": 1}))
            .unwrap();
        assert_eq!(opts.body, br#"{"x":1}"#);
        assert_eq!(opts.headers.get(CONTENT_TYPE), Some(JSON_CONTENT_TYPE));
    }

    #[test]
    fn test_header_and_method_builders() {
        let opts = PublishOptions::get("https://h/x")
            .method(Method::PATCH)
            .header(HeaderName::from_static("x-a"), HeaderValue::from_static("1"))
            .header(HeaderName::from_static("x-a"), HeaderValue::from_static("2"));
        assert_eq!(opts.method, Method::PATCH);
        assert_eq!(opts.headers.get("X-A"), Some("2"));
    }
}
