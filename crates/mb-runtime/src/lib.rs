//! # Microbus Runtime
//!
//! Hosts one microservice: a [`Connector`] with a [`DistribCache`] shared by
//! its replicas.
//!
//! ## Endpoints
//!
//! | Path             | Methods            | Effect                          |
//! |------------------|--------------------|---------------------------------|
//! | `/cache/{key}`   | GET, PUT, DELETE   | Load, store or delete a key     |
//! | `:888/metrics`   | GET                | Prometheus text exposition      |
//!
//! ## Startup Sequence
//!
//! 1. Create the connector and apply the environment
//! 2. Create the distributed cache and subscribe the endpoints
//! 3. Start the connector, which activates every subscription
//! 4. Start the stats ticker
//!
//! Shutdown reverses it: the cache is rescued to the peers first, then the
//! connector drains and detaches.

use anyhow::{Context, Result};
use mb_04_connector::header::{HeaderValue, CONTENT_TYPE};
use mb_04_connector::{
    Connector, Method, OpContext, Request, Response, StatusCode, SubscribeOptions, TracedError,
};
use mb_05_distributed_cache::{DistribCache, LoadOptions};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Host name used when `MB_HOST` is unset.
pub const DEFAULT_HOST: &str = "runtime.example";

/// How often the cache stats are logged.
pub const STATS_INTERVAL: Duration = Duration::from_secs(60);

/// A running microservice.
pub struct Runtime {
    con: Connector,
    cache: DistribCache,
}

impl Runtime {
    /// Wire the endpoints onto `con`. Nothing is served until [`Runtime::start`].
    pub async fn new(con: Connector) -> Result<Self> {
        info!(host = %con.host(), id = %con.id(), "Creating microservice runtime");

        let cache = DistribCache::new(Arc::new(con.clone()))
            .await
            .context("creating distributed cache")?;

        let endpoint_cache = cache.clone();
        con.subscribe(
            "/cache/{key}",
            move |ctx: OpContext, req: Request| {
                let cache = endpoint_cache.clone();
                async move { serve_cache(&cache, &ctx, req).await }
            },
            SubscribeOptions::new(),
        )
        .await
        .context("subscribing cache endpoint")?;

        con.subscribe(
            ":888/metrics",
            |_ctx: OpContext, _req: Request| async move {
                let text = mb_telemetry::encode_metrics().map_err(|e| TracedError::wrap(&e))?;
                Ok(Response::ok(text).with_header(
                    CONTENT_TYPE,
                    HeaderValue::from_static("text/plain; version=0.0.4"),
                ))
            },
            SubscribeOptions::new().method(Method::GET).no_queue(),
        )
        .await
        .context("subscribing metrics endpoint")?;

        Ok(Self { con, cache })
    }

    pub async fn start(&self) -> Result<()> {
        self.con.startup().await.context("starting connector")?;

        let cache = self.cache.clone();
        self.con
            .start_ticker("cache-stats", STATS_INTERVAL, move |_ctx: OpContext| {
                let stats = cache.stats();
                async move {
                    info!(
                        entries = stats.entries,
                        weight = stats.weight,
                        max_weight = stats.max_weight,
                        "Cache stats"
                    );
                    Ok::<_, TracedError>(())
                }
            })
            .context("starting stats ticker")?;

        info!(
            host = %self.con.host(),
            deployment = %self.con.deployment().as_str(),
            plane = %self.con.plane(),
            "Microservice is running"
        );
        Ok(())
    }

    /// Hand the cache over to the peers, then shut the connector down.
    pub async fn shutdown(&self) -> Result<()> {
        info!("Initiating graceful shutdown...");
        let ctx = self.con.lifetime_context();
        if let Err(e) = self.cache.close(&ctx).await {
            tracing::warn!(error = %e, "Cache rescue failed");
        }
        self.con.shutdown().await.context("shutting down connector")?;
        info!("Shutdown complete");
        Ok(())
    }

    pub fn connector(&self) -> &Connector {
        &self.con
    }

    pub fn cache(&self) -> &DistribCache {
        &self.cache
    }
}

async fn serve_cache(cache: &DistribCache, ctx: &OpContext, req: Request) -> Result<Response, TracedError> {
    let key = req.path_arg("key").unwrap_or_default().to_string();
    match req.method {
        Method::GET => {
            let found = cache
                .load(ctx, &key, LoadOptions::new())
                .await
                .map_err(|e| e.into_traced())?;
            found
                .map(Response::ok)
                .ok_or_else(|| TracedError::with_code(404, format!("{key} is not cached")))
        }
        Method::PUT | Method::POST => {
            cache.store(ctx, &key, req.body).await.map_err(|e| e.into_traced())?;
            Ok(Response::new(StatusCode::OK))
        }
        Method::DELETE => {
            cache.delete(ctx, &key).await.map_err(|e| e.into_traced())?;
            Ok(Response::new(StatusCode::OK))
        }
        ref other => Err(TracedError::with_code(405, format!("method {other} not allowed"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mb_04_connector::{Deployment, PublishOptions};
    use shared_bus::InMemoryBus;

    #[tokio::test]
    async fn test_cache_endpoint_round_trip() {
        let bus = InMemoryBus::new();
        let con = Connector::new("runtime.example");
        con.set_deployment(Deployment::Testing).unwrap();
        con.set_bus(Arc::new(bus.attach())).unwrap();
        let runtime = Runtime::new(con).await.unwrap();
        runtime.start().await.unwrap();

        let client = Connector::new("client.example");
        client.set_deployment(Deployment::Testing).unwrap();
        client.set_bus(Arc::new(bus.attach())).unwrap();
        client.startup().await.unwrap();

        let ctx = OpContext::background();
        client
            .request(&ctx, PublishOptions::put("https://runtime.example/cache/greeting", "hello"))
            .await
            .unwrap();
        let res = client
            .request(&ctx, PublishOptions::get("https://runtime.example/cache/greeting"))
            .await
            .unwrap();
        assert_eq!(res.body, b"hello");

        client
            .request(&ctx, PublishOptions::delete("https://runtime.example/cache/greeting"))
            .await
            .unwrap();
        let err = client
            .request(&ctx, PublishOptions::get("https://runtime.example/cache/greeting"))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 404);

        client.shutdown().await.unwrap();
        runtime.shutdown().await.unwrap();
    }
}
