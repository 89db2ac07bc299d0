//! # Distributed Cache
//!
//! A [`DistribCache`] keeps a [`LocalCache`] on each replica of a host and
//! coordinates the replicas through broadcasts on the bus:
//!
//! - **store** invalidates every copy, then offers the value to the peers.
//!   A peer admits it only while it stays under half of its max weight, so
//!   that the writer's own copy is the likeliest to survive.
//! - **load** asks the peers for their copies. All copies must agree;
//!   a disagreement removes the key everywhere and counts as a miss.
//! - **close** ships the local elements to the remaining peers before
//!   clearing them.

use crate::domain::{CacheStats, LoadOptions, LocalCache};
use crate::error::CacheError;
use crate::peer::{Endpoint, PeerHandler};
use futures::StreamExt;
use mb_04_connector::{Method, OpContext, PublishOptions, Service, StatusCode, SubscribeOptions};
use mb_telemetry::metrics::{CACHE_HITS, CACHE_INCONSISTENCIES, CACHE_MISSES, CACHE_RESCUED};
use parking_lot::Mutex;
use shared_types::{TracedError, ALL_HOSTS, CONTROL_PORT};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Where the peer endpoints are served, relative to the service host.
pub const DEFAULT_BASE_PATH: &str = ":888/dcache";

/// Bound on the whole rescue operation.
pub const RESCUE_TIMEOUT: Duration = Duration::from_secs(2);

/// Rescue requests in flight per peer.
const RESCUE_CONCURRENCY: usize = 64;

pub(crate) struct CacheInner {
    svc: Arc<dyn Service>,
    pub(crate) host: String,
    pub(crate) id: String,
    base: String,
    pub(crate) local: Mutex<LocalCache>,
}

impl CacheInner {
    /// Take in a value offered by a peer.
    pub(crate) fn admit(&self, key: &str, value: Vec<u8>) -> bool {
        let mut local = self.local.lock();
        local.delete(key);
        if local.weight() + value.len() <= local.max_weight() / 2 {
            local.store(key, value)
        } else {
            false
        }
    }

    fn all_path(&self) -> String {
        format!("{}/all", self.base)
    }

    fn rescue_path(&self) -> String {
        format!("{}/rescue", self.base)
    }

    fn broadcast(&self, method: Method, action: &str, key: &str) -> PublishOptions {
        let options = PublishOptions::new(method, self.all_path()).query("do", action);
        if key.is_empty() {
            options
        } else {
            options.query("key", key)
        }
    }

    /// Wait for every peer to answer a broadcast. Nobody answering is fine.
    async fn drain(&self, ctx: &OpContext, options: PublishOptions) -> Result<(), TracedError> {
        let mut responses = self.svc.publish(ctx, options);
        while let Some(result) = responses.recv().await {
            match result {
                Ok(_) => {}
                Err(e) if e.status_code() == 404 => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

/// LRU cache shared by the replicas of a microservice.
#[derive(Clone)]
pub struct DistribCache {
    inner: Arc<CacheInner>,
}

impl DistribCache {
    /// Create a cache on [`DEFAULT_BASE_PATH`].
    ///
    /// The service's host name must be set already. The peer endpoints go
    /// live with the service's other subscriptions.
    pub async fn new(svc: Arc<dyn Service>) -> Result<Self, CacheError> {
        Self::with_base_path(svc, DEFAULT_BASE_PATH).await
    }

    pub async fn with_base_path(svc: Arc<dyn Service>, base: &str) -> Result<Self, CacheError> {
        let base = base.trim_end_matches('/');
        if base.is_empty() || base.contains('?') {
            return Err(CacheError::InvalidBasePath { path: base.to_string() });
        }
        let inner = Arc::new(CacheInner {
            host: svc.host(),
            id: svc.id().to_string(),
            svc,
            base: base.to_string(),
            local: Mutex::new(LocalCache::default()),
        });

        let broadcast = PeerHandler {
            cache: Arc::downgrade(&inner),
            endpoint: Endpoint::Broadcast,
        };
        inner
            .svc
            .subscribe(&inner.all_path(), Arc::new(broadcast), SubscribeOptions::new().no_queue())
            .await?;
        let rescue = PeerHandler {
            cache: Arc::downgrade(&inner),
            endpoint: Endpoint::Rescue,
        };
        inner
            .svc
            .subscribe(&inner.rescue_path(), Arc::new(rescue), SubscribeOptions::new().default_queue())
            .await?;

        debug!(host = %inner.host, base = %inner.base, "Distributed cache created");
        Ok(Self { inner })
    }

    /// Store `value` under `key`.
    ///
    /// Copies on the peers are invalidated before the local copy is
    /// written, so a concurrent load never sees two different values agree.
    pub async fn store(&self, ctx: &OpContext, key: &str, value: impl Into<Vec<u8>>) -> Result<(), CacheError> {
        check_key(key)?;
        let value = value.into();
        self.inner.local.lock().delete(key);
        let options = self.inner.broadcast(Method::PUT, "store", key).body(value.clone());
        self.inner.drain(ctx, options).await?;
        self.inner.local.lock().store(key, value);
        Ok(())
    }

    /// Load the value of `key`, `None` on a miss.
    pub async fn load(&self, ctx: &OpContext, key: &str, options: LoadOptions) -> Result<Option<Vec<u8>>, CacheError> {
        check_key(key)?;
        let local = self.inner.local.lock().load(key, options.bump);
        if !options.peer_check {
            return Ok(record(local));
        }

        let mut copies: Vec<Vec<u8>> = local.into_iter().collect();
        let mut responses = self.inner.svc.publish(ctx, self.inner.broadcast(Method::GET, "load", key));
        while let Some(result) = responses.recv().await {
            match result {
                Ok(res) if res.status == StatusCode::OK => copies.push(res.body),
                Ok(_) => {}
                Err(e) if e.status_code() == 404 => {}
                Err(e) => return Err(e.into()),
            }
        }

        let Some((first, rest)) = copies.split_first() else {
            return Ok(record(None));
        };
        if rest.iter().any(|copy| copy != first) {
            CACHE_INCONSISTENCIES.inc();
            warn!(key = %key, copies = copies.len(), "Inconsistent cache copies, deleting");
            self.delete(ctx, key).await?;
            return Ok(record(None));
        }
        Ok(record(Some(first.clone())))
    }

    /// Remove `key` from every replica.
    pub async fn delete(&self, ctx: &OpContext, key: &str) -> Result<(), CacheError> {
        check_key(key)?;
        self.inner.local.lock().delete(key);
        self.inner.drain(ctx, self.inner.broadcast(Method::DELETE, "delete", key)).await?;
        Ok(())
    }

    /// Empty the cache on every replica.
    pub async fn clear(&self, ctx: &OpContext) -> Result<(), CacheError> {
        self.inner.local.lock().clear();
        self.inner.drain(ctx, self.inner.broadcast(Method::DELETE, "clear", "")).await?;
        Ok(())
    }

    /// Stop serving the peers and hand the local elements over to them.
    ///
    /// Elements that cannot be shipped within [`RESCUE_TIMEOUT`] are lost.
    /// The local cache is empty afterwards.
    pub async fn close(&self, ctx: &OpContext) -> Result<(), CacheError> {
        self.inner.svc.unsubscribe(&self.inner.all_path()).await?;
        self.inner.svc.unsubscribe(&self.inner.rescue_path()).await?;

        let elements = self.inner.local.lock().elements();
        if elements.is_empty() {
            return Ok(());
        }

        let peers = self.count_peers(ctx).await;
        if peers == 0 {
            debug!(elements = elements.len(), "No peers to rescue the cache to");
            self.inner.local.lock().clear();
            return Ok(());
        }

        let total = elements.len();
        let rescue_ctx = ctx.with_timeout(RESCUE_TIMEOUT);
        let rescue_path = self.inner.rescue_path();
        let shipped = futures::stream::iter(elements)
            .map(|(key, value)| {
                let svc = Arc::clone(&self.inner.svc);
                let ctx = rescue_ctx.clone();
                let options = PublishOptions::put(rescue_path.clone(), value).query("key", key);
                async move { svc.request(&ctx, options).await.is_ok() }
            })
            .buffer_unordered(RESCUE_CONCURRENCY * peers)
            .filter(|ok| futures::future::ready(*ok))
            .count()
            .await;

        CACHE_RESCUED.inc_by(shipped as f64);
        info!(shipped, total, peers, "Rescued cache elements");
        self.inner.local.lock().clear();
        Ok(())
    }

    /// Other replicas of this host answering a ping.
    async fn count_peers(&self, ctx: &OpContext) -> usize {
        let url = format!("https://{ALL_HOSTS}:{CONTROL_PORT}/ping");
        let mut responses = self.inner.svc.publish(ctx, PublishOptions::get(url));
        let mut peers = 0;
        while let Some(result) = responses.recv().await {
            let Ok(res) = result else { continue };
            let frame = res.frame();
            let same_host = frame
                .from_host()
                .is_some_and(|h| h.eq_ignore_ascii_case(&self.inner.host));
            if same_host && frame.from_id() != Some(self.inner.id.as_str()) {
                peers += 1;
            }
        }
        peers
    }

    /// Number of elements held by this replica.
    pub fn local_len(&self) -> usize {
        self.inner.local.lock().len()
    }

    pub fn local_weight(&self) -> usize {
        self.inner.local.lock().weight()
    }

    pub fn max_weight(&self) -> usize {
        self.inner.local.lock().max_weight()
    }

    pub fn set_max_weight(&self, max_weight: usize) {
        self.inner.local.lock().set_max_weight(max_weight);
    }

    pub fn max_age(&self) -> Duration {
        self.inner.local.lock().max_age()
    }

    pub fn set_max_age(&self, max_age: Duration) {
        self.inner.local.lock().set_max_age(max_age);
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.local.lock().stats()
    }

    #[cfg(test)]
    pub(crate) fn store_local(&self, key: &str, value: &[u8]) {
        self.inner.local.lock().store(key, value.to_vec());
    }
}

fn check_key(key: &str) -> Result<(), CacheError> {
    if key.is_empty() {
        return Err(CacheError::EmptyKey);
    }
    Ok(())
}

fn record(found: Option<Vec<u8>>) -> Option<Vec<u8>> {
    if found.is_some() {
        CACHE_HITS.inc();
    } else {
        CACHE_MISSES.inc();
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use mb_04_connector::{Connector, Deployment};
    use shared_bus::InMemoryBus;

    const HOST: &str = "cache.example";

    struct Replica {
        con: Connector,
        cache: DistribCache,
    }

    async fn replica(bus: &InMemoryBus) -> Replica {
        let con = Connector::new(HOST);
        con.set_deployment(Deployment::Testing).unwrap();
        con.set_bus(Arc::new(bus.attach())).unwrap();
        let cache = DistribCache::new(Arc::new(con.clone())).await.unwrap();
        con.startup().await.unwrap();
        Replica { con, cache }
    }

    async fn cluster(n: usize) -> (InMemoryBus, Vec<Replica>) {
        let bus = InMemoryBus::new();
        let mut replicas = Vec::new();
        for _ in 0..n {
            replicas.push(replica(&bus).await);
        }
        (bus, replicas)
    }

    async fn shutdown(replicas: Vec<Replica>) {
        for r in replicas {
            r.con.shutdown().await.unwrap();
        }
    }

    fn ctx() -> OpContext {
        OpContext::background()
    }

    #[tokio::test]
    async fn test_store_replicates_and_load_agrees() {
        let (_bus, replicas) = cluster(3).await;
        replicas[0].cache.store(&ctx(), "a", "alpha").await.unwrap();

        for r in &replicas {
            assert_eq!(r.cache.local_len(), 1);
        }
        for r in &replicas {
            let got = r.cache.load(&ctx(), "a", LoadOptions::new()).await.unwrap();
            assert_eq!(got.as_deref(), Some(&b"alpha"[..]));
        }
        shutdown(replicas).await;
    }

    #[tokio::test]
    async fn test_delete_and_clear_everywhere() {
        let (_bus, replicas) = cluster(3).await;
        replicas[0].cache.store(&ctx(), "a", "alpha").await.unwrap();
        replicas[1].cache.store(&ctx(), "b", "beta").await.unwrap();

        replicas[2].cache.delete(&ctx(), "a").await.unwrap();
        for r in &replicas {
            assert!(r.cache.load(&ctx(), "a", LoadOptions::new().no_peer_check()).await.unwrap().is_none());
            assert_eq!(r.cache.local_len(), 1);
        }

        replicas[2].cache.clear(&ctx()).await.unwrap();
        for r in &replicas {
            assert_eq!(r.cache.local_len(), 0);
        }
        shutdown(replicas).await;
    }

    #[tokio::test]
    async fn test_inconsistent_copies_are_deleted() {
        let (_bus, replicas) = cluster(3).await;
        replicas[0].cache.store(&ctx(), "a", "alpha").await.unwrap();
        replicas[1].cache.store_local("a", b"tampered");

        // Without the peer check the local copy is served as is
        let got = replicas[1]
            .cache
            .load(&ctx(), "a", LoadOptions::new().no_peer_check())
            .await
            .unwrap();
        assert_eq!(got.as_deref(), Some(&b"tampered"[..]));

        let got = replicas[0].cache.load(&ctx(), "a", LoadOptions::new()).await.unwrap();
        assert!(got.is_none());
        for r in &replicas {
            assert_eq!(r.cache.local_len(), 0);
        }
        shutdown(replicas).await;
    }

    #[tokio::test]
    async fn test_peer_admission_limited_to_half() {
        let (_bus, replicas) = cluster(3).await;
        let max = 4096;
        for r in &replicas {
            r.cache.set_max_weight(max);
        }

        replicas[0].cache.store(&ctx(), "k1", vec![1u8; max / 4]).await.unwrap();
        replicas[0].cache.store(&ctx(), "k2", vec![2u8; max / 4]).await.unwrap();
        for r in &replicas {
            assert_eq!(r.cache.local_weight(), max / 2);
        }

        replicas[0].cache.store(&ctx(), "k3", vec![3u8; max / 4]).await.unwrap();
        assert_eq!(replicas[0].cache.local_weight(), max / 2 + max / 4);
        assert_eq!(replicas[1].cache.local_weight(), max / 2);
        assert_eq!(replicas[2].cache.local_weight(), max / 2);

        // The writer's copy alone is a consistent hit
        let got = replicas[1].cache.load(&ctx(), "k3", LoadOptions::new()).await.unwrap();
        assert_eq!(got.map(|v| v.len()), Some(max / 4));
        shutdown(replicas).await;
    }

    #[tokio::test]
    async fn test_close_rescues_to_peers() {
        let (_bus, mut replicas) = cluster(2).await;
        replicas[0].cache.set_max_weight(0);
        for i in 0..10 {
            replicas[1].cache.store(&ctx(), &format!("k{i}"), format!("v{i}")).await.unwrap();
        }
        replicas[0].cache.set_max_weight(1024 * 1024);
        assert_eq!(replicas[0].cache.local_len(), 0);

        let leaving = replicas.pop().unwrap();
        leaving.cache.close(&ctx()).await.unwrap();
        assert_eq!(leaving.cache.local_len(), 0);
        leaving.con.shutdown().await.unwrap();

        assert_eq!(replicas[0].cache.local_len(), 10);
        let got = replicas[0].cache.load(&ctx(), "k7", LoadOptions::new()).await.unwrap();
        assert_eq!(got.as_deref(), Some(&b"v7"[..]));
        shutdown(replicas).await;
    }

    #[tokio::test]
    async fn test_close_without_peers_clears() {
        let (_bus, replicas) = cluster(1).await;
        replicas[0].cache.store(&ctx(), "a", "alpha").await.unwrap();
        replicas[0].cache.close(&ctx()).await.unwrap();
        assert_eq!(replicas[0].cache.local_len(), 0);
        shutdown(replicas).await;
    }

    #[tokio::test]
    async fn test_other_hosts_are_not_peers() {
        let bus = InMemoryBus::new();
        let mine = replica(&bus).await;

        let other = Connector::new("other.example");
        other.set_deployment(Deployment::Testing).unwrap();
        other.set_bus(Arc::new(bus.attach())).unwrap();
        other.startup().await.unwrap();

        // A foreign store aimed at our endpoint is ignored
        let options = PublishOptions::put("https://cache.example:888/dcache/all", "x")
            .query("do", "store")
            .query("key", "a");
        let mut responses = other.publish(&ctx(), options);
        while responses.recv().await.is_some() {}
        assert_eq!(mine.cache.local_len(), 0);

        other.shutdown().await.unwrap();
        mine.con.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_key_rejected() {
        let (_bus, replicas) = cluster(1).await;
        assert!(matches!(
            replicas[0].cache.store(&ctx(), "", "x").await,
            Err(CacheError::EmptyKey)
        ));
        shutdown(replicas).await;
    }
}
