//! Domain layer for the connector
//!
//! Contains the operation context, handler traits, subscription and publish
//! options, deployments and the in-flight request store.

pub mod context;
pub mod deployment;
pub mod handler;
pub mod options;
pub mod pending;

pub use context::OpContext;
pub use deployment::Deployment;
pub use handler::{Handler, HandlerResult, Job};
pub(crate) use handler::run_guarded;
pub use options::{PublishOptions, Queue, SubscribeOptions};
pub use pending::{InFlightRequests, KnownResponders, Registration};
