//! # Shared Bus - Subject-Based Message Bus
//!
//! Every connector talks to every other connector through this bus and
//! nothing else.
//!
//! ## Semantics
//!
//! - Subjects are dot-separated tokens; subscriptions may use `*` (one token)
//!   and a trailing `>` (one or more tokens).
//! - Subscribers in the same queue group share the load: each message goes to
//!   exactly one of them.
//! - Delivery is at-most-once and unordered across publishers.
//!
//! ## Attachments
//!
//! ```text
//! ┌──────────────┐                    ┌──────────────┐
//! │ Connector A  │                    │ Connector B  │
//! │              │    publish()       │              │
//! │              │ ──────┐            │              │
//! └──────────────┘       │            └──────────────┘
//!                        ▼                    ↑
//!                  ┌──────────────┐          │
//!                  │  InMemoryBus │          │
//!                  │  or NatsBus  │ ─────────┘
//!                  └──────────────┘  subscribe()
//! ```

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod nats;
pub mod publisher;
pub mod subject;
pub mod subscriber;

pub use nats::{NatsBus, NatsOptions, NATS_SCHEMES};
pub use publisher::{Bus, InMemoryBus};
pub use subject::{subject_matches, validate_subject};
pub use subscriber::{BusMessage, BusSubscription};

use std::sync::Arc;
use thiserror::Error;

/// Default maximum payload, matching the NATS server default.
pub const DEFAULT_MAX_PAYLOAD: usize = 1024 * 1024;

/// Errors from bus operations.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus closed")]
    Closed,

    #[error("payload of {size} bytes exceeds max payload of {max}")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("invalid subject {0:?}")]
    InvalidSubject(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Open a bus attachment from a URL.
///
/// An empty URL or `mem://name` attaches to a process-local broker (named
/// `default` when no name is given); any of [`NATS_SCHEMES`] connects to a
/// NATS server.
pub async fn connect(url: &str, options: NatsOptions) -> Result<Arc<dyn Bus>, BusError> {
    let url = url.trim();
    if url.is_empty() {
        return Ok(Arc::new(InMemoryBus::named("default")));
    }
    if let Some(name) = url.strip_prefix("mem://") {
        let name = name.trim_end_matches('/');
        let name = if name.is_empty() { "default" } else { name };
        return Ok(Arc::new(InMemoryBus::named(name)));
    }
    Ok(Arc::new(NatsBus::connect(url, options).await?))
}
