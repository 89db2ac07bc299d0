//! # Capability Ports
//!
//! Narrow views of a connector for components built on top of it. A
//! component asks for the capabilities it uses, e.g. `Arc<dyn Service>`,
//! rather than the concrete [`Connector`], which keeps it testable against
//! any implementation.

use crate::connector::Connector;
use crate::domain::{Deployment, Handler, OpContext, PublishOptions, SubscribeOptions};
use crate::error::ConnectorError;
use crate::publish::ResponseStream;
use async_trait::async_trait;
use shared_types::{Response, TracedError};
use std::sync::Arc;

/// Who a service is.
pub trait Identity: Send + Sync {
    fn id(&self) -> &str;
    fn host(&self) -> String;
    fn plane(&self) -> String;
    fn deployment(&self) -> Deployment;
}

/// Sending requests.
#[async_trait]
pub trait Publisher: Send + Sync {
    fn publish(&self, ctx: &OpContext, options: PublishOptions) -> ResponseStream;

    async fn request(&self, ctx: &OpContext, options: PublishOptions) -> Result<Response, TracedError>;
}

/// Serving requests.
#[async_trait]
pub trait Subscriber: Send + Sync {
    async fn subscribe(
        &self,
        path: &str,
        handler: Arc<dyn Handler>,
        options: SubscribeOptions,
    ) -> Result<(), ConnectorError>;

    async fn unsubscribe(&self, path: &str) -> Result<(), ConnectorError>;
}

/// Everything a distributed component needs from its connector.
pub trait Service: Identity + Publisher + Subscriber {}

impl<T: Identity + Publisher + Subscriber> Service for T {}

impl Identity for Connector {
    fn id(&self) -> &str {
        Connector::id(self)
    }

    fn host(&self) -> String {
        Connector::host(self)
    }

    fn plane(&self) -> String {
        Connector::plane(self)
    }

    fn deployment(&self) -> Deployment {
        Connector::deployment(self)
    }
}

#[async_trait]
impl Publisher for Connector {
    fn publish(&self, ctx: &OpContext, options: PublishOptions) -> ResponseStream {
        Connector::publish(self, ctx, options)
    }

    async fn request(&self, ctx: &OpContext, options: PublishOptions) -> Result<Response, TracedError> {
        Connector::request(self, ctx, options).await
    }
}

#[async_trait]
impl Subscriber for Connector {
    async fn subscribe(
        &self,
        path: &str,
        handler: Arc<dyn Handler>,
        options: SubscribeOptions,
    ) -> Result<(), ConnectorError> {
        self.subscribe_arc(path, handler, options).await
    }

    async fn unsubscribe(&self, path: &str) -> Result<(), ConnectorError> {
        Connector::unsubscribe(self, path).await
    }
}
