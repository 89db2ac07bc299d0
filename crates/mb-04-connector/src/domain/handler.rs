//! Handler traits and panic capture.

use super::context::OpContext;
use async_trait::async_trait;
use mb_telemetry::metrics::PANICS;
use shared_types::{Request, Response, TracedError};
use std::future::Future;

pub type HandlerResult = Result<Response, TracedError>;

/// Serves requests delivered to a subscription.
///
/// Implemented for every `Fn(OpContext, Request) -> impl Future<Output =
/// HandlerResult>`, so plain async closures can be subscribed.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn handle(&self, ctx: OpContext, req: Request) -> HandlerResult;
}

#[async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(OpContext, Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn handle(&self, ctx: OpContext, req: Request) -> HandlerResult {
        (self)(ctx, req).await
    }
}

/// Work that only needs a context: ticks, background tasks and lifecycle
/// callbacks.
#[async_trait]
pub trait Job: Send + Sync + 'static {
    async fn run(&self, ctx: OpContext) -> Result<(), TracedError>;
}

#[async_trait]
impl<F, Fut> Job for F
where
    F: Fn(OpContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), TracedError>> + Send + 'static,
{
    async fn run(&self, ctx: OpContext) -> Result<(), TracedError> {
        (self)(ctx).await
    }
}

/// Run `fut` on its own task so that a panic becomes an error, giving up
/// when `ctx` is cancelled.
///
/// The task is aborted on cancellation.
pub(crate) async fn run_guarded<F, T>(ctx: &OpContext, fut: F) -> Result<T, TracedError>
where
    F: Future<Output = Result<T, TracedError>> + Send + 'static,
    T: Send + 'static,
{
    let mut task = tokio::spawn(fut);
    tokio::select! {
        joined = &mut task => match joined {
            Ok(result) => result,
            Err(e) if e.is_panic() => {
                PANICS.inc();
                Err(TracedError::from_panic(e.into_panic()).trace())
            }
            Err(_) => Err(TracedError::with_code(503, "cancelled")),
        },
        () = ctx.cancelled() => {
            task.abort();
            Err(ctx.cancellation_error())
        }
    }
}
