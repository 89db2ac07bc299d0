//! # Distributed Cache
//!
//! Cache properties across the replicas of one host.

#[cfg(test)]
mod tests {
    use crate::integration::fixtures::{ctx, shutdown_all, testing_connector};
    use mb_04_connector::{Connector, PublishOptions};
    use mb_05_distributed_cache::{DistribCache, LoadOptions};
    use shared_bus::InMemoryBus;
    use std::sync::Arc;

    const HOST: &str = "dcache.example";

    async fn peers(bus: &InMemoryBus, n: usize) -> (Vec<Connector>, Vec<DistribCache>) {
        let mut cons = Vec::new();
        let mut caches = Vec::new();
        for _ in 0..n {
            let con = testing_connector(HOST, bus);
            let cache = DistribCache::new(Arc::new(con.clone())).await.unwrap();
            con.startup().await.unwrap();
            cons.push(con);
            caches.push(cache);
        }
        (cons, caches)
    }

    async fn load(cache: &DistribCache, key: &str) -> Option<Vec<u8>> {
        cache.load(&ctx(), key, LoadOptions::new()).await.unwrap()
    }

    #[tokio::test]
    async fn test_store_visible_from_every_peer() {
        let bus = InMemoryBus::new();
        let (cons, caches) = peers(&bus, 3).await;

        caches[1].store(&ctx(), "k", "v").await.unwrap();
        for cache in &caches {
            assert_eq!(load(cache, "k").await.as_deref(), Some(&b"v"[..]));
        }

        caches[2].delete(&ctx(), "k").await.unwrap();
        for cache in &caches {
            assert!(load(cache, "k").await.is_none());
        }

        shutdown_all(&cons).await;
    }

    #[tokio::test]
    async fn test_restore_after_inconsistency() {
        let bus = InMemoryBus::new();
        let (mut cons, caches) = peers(&bus, 3).await;

        caches[0].store(&ctx(), "k", "v").await.unwrap();

        // A rogue replica of the same host overwrites one peer's copy
        let rogue = testing_connector(HOST, &bus);
        rogue.startup().await.unwrap();
        let url = format!("https://{}.{HOST}:888/dcache/all", cons[1].id());
        rogue
            .request(
                &ctx(),
                PublishOptions::put(url, "corrupt").query("do", "store").query("key", "k"),
            )
            .await
            .unwrap();

        assert!(load(&caches[2], "k").await.is_none());
        for cache in &caches {
            assert_eq!(cache.local_len(), 0);
        }

        caches[0].store(&ctx(), "k", "v2").await.unwrap();
        for cache in &caches {
            assert_eq!(load(cache, "k").await.as_deref(), Some(&b"v2"[..]));
        }

        cons.push(rogue);
        shutdown_all(&cons).await;
    }

    #[tokio::test]
    async fn test_admission_quarter_beyond_half() {
        let bus = InMemoryBus::new();
        let (cons, caches) = peers(&bus, 3).await;
        let w = 64 * 1024;
        for cache in &caches {
            cache.set_max_weight(w);
        }

        caches[0].store(&ctx(), "a", vec![1u8; w / 4]).await.unwrap();
        caches[0].store(&ctx(), "b", vec![2u8; w / 4]).await.unwrap();
        for cache in &caches {
            assert_eq!(cache.local_len(), 2);
        }

        caches[0].store(&ctx(), "c", vec![3u8; w / 4]).await.unwrap();
        assert_eq!(caches[0].local_len(), 3);
        assert_eq!(caches[1].local_len(), 2);
        assert_eq!(caches[2].local_len(), 2);

        shutdown_all(&cons).await;
    }

    #[tokio::test]
    async fn test_rescue_lands_on_exactly_one_survivor() {
        let bus = InMemoryBus::new();
        let (mut cons, mut caches) = peers(&bus, 3).await;

        // Only the last peer keeps the elements
        caches[0].set_max_weight(0);
        caches[1].set_max_weight(0);
        for i in 0..20 {
            caches[2].store(&ctx(), &format!("k{i}"), format!("v{i}")).await.unwrap();
        }
        caches[0].set_max_weight(1024 * 1024);
        caches[1].set_max_weight(1024 * 1024);
        assert_eq!(caches[0].local_len() + caches[1].local_len(), 0);

        let leaving = caches.pop().unwrap();
        let leaving_con = cons.pop().unwrap();
        leaving.close(&ctx()).await.unwrap();
        leaving_con.shutdown().await.unwrap();

        assert_eq!(caches[0].local_len() + caches[1].local_len(), 20);
        for i in 0..20 {
            let key = format!("k{i}");
            let mut holders = 0;
            for cache in &caches {
                let local = cache
                    .load(&ctx(), &key, LoadOptions::new().no_peer_check().no_bump())
                    .await
                    .unwrap();
                if local.is_some() {
                    holders += 1;
                }
            }
            assert_eq!(holders, 1, "{key} held by {holders} survivors");
        }

        shutdown_all(&cons).await;
    }
}
