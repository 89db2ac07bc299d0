//! # Connector
//!
//! The runtime core of a microservice: a [`Connector`] gives a service an
//! identity on the bus, serves its endpoints and makes HTTP-shaped requests
//! to other services through the bus alone.
//!
//! ## Request Flow
//!
//! ```text
//! caller                        bus                        responder
//!   │ publish(first fragment) ──► shared subject ──► (queue picks one)
//!   │ ◄── ack 202 / 100 ───────── response subject ◄───────┤
//!   │ remaining fragments ──────► instance subject ───────►│ (on 100)
//!   │                                                      │ handler
//!   │ ◄── response / error ────── response subject ◄───────┤
//! ```
//!
//! ## Guarantees
//!
//! - **Bounded**: every request carries its remaining time budget and its
//!   call depth; both are enforced before a request leaves.
//! - **Drained**: shutdown waits for handlers and ticks in flight.
//! - **Contained**: a panicking handler becomes a 500 error response.
//!
//! ## Example
//!
//! ```rust,ignore
//! let con = Connector::new("hello.example");
//! con.subscribe("/echo", |_ctx, req: Request| async move {
//!     Ok(Response::ok(req.body))
//! }, SubscribeOptions::new()).await?;
//! con.startup().await?;
//! let res = con.request(&ctx, PublishOptions::post("https://hello.example/echo", "hi")).await?;
//! ```

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod config;
pub mod connector;
pub mod control;
pub mod domain;
pub mod error;
pub mod lifecycle;
pub mod ports;
pub mod publish;
pub mod resources;
pub mod subscribe;
pub mod tasks;
pub mod tickers;

mod inbound;
mod ops;

pub use config::{ConfigSpec, EnvSource, Validation};
pub use connector::{
    Connector, DEFAULT_CALLBACK_TIMEOUT, DEFAULT_MAX_CALL_DEPTH, DEFAULT_NETWORK_HOP,
    DEFAULT_TIME_BUDGET, DRAIN_TIMEOUT,
};
pub use domain::{
    Deployment, Handler, HandlerResult, Job, OpContext, PublishOptions, Queue, SubscribeOptions,
};
pub use error::{ConfigError, ConnectorError};
pub use ports::{Identity, Publisher, Service, Subscriber};
pub use publish::ResponseStream;
pub use shared_types::{header, Headers, Method, Request, Response, StatusCode, TracedError};
