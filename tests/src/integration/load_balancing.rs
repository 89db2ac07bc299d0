//! # Load Balancing
//!
//! Replicas subscribed on the default queue share the requests to their
//! host; each request is served by exactly one of them.

#[cfg(test)]
mod tests {
    use crate::integration::fixtures::{ctx, shutdown_all, testing_connector};
    use mb_04_connector::{OpContext, PublishOptions, Request, Response, StatusCode, SubscribeOptions};
    use shared_bus::InMemoryBus;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_default_queue_splits_requests() {
        let bus = InMemoryBus::new();
        let mut replicas = Vec::new();
        let mut counters = Vec::new();
        for _ in 0..2 {
            let con = testing_connector("balanced.example", &bus);
            let served = Arc::new(AtomicUsize::new(0));
            let counter = Arc::clone(&served);
            con.subscribe(
                "/work",
                move |_ctx: OpContext, _req: Request| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async move { Ok(Response::new(StatusCode::OK)) }
                },
                SubscribeOptions::new(),
            )
            .await
            .unwrap();
            con.startup().await.unwrap();
            replicas.push(con);
            counters.push(served);
        }
        let client = testing_connector("client.example", &bus);
        client.startup().await.unwrap();

        let total = 1024;
        for _ in 0..total {
            client
                .request(&ctx(), PublishOptions::get("https://balanced.example/work"))
                .await
                .unwrap();
        }

        let a = counters[0].load(Ordering::SeqCst);
        let b = counters[1].load(Ordering::SeqCst);
        assert_eq!(a + b, total);
        assert!(a >= 256, "first replica served {a}");
        assert!(b >= 256, "second replica served {b}");

        replicas.push(client);
        shutdown_all(&replicas).await;
    }

    #[tokio::test]
    async fn test_instance_subject_reaches_one_replica() {
        let bus = InMemoryBus::new();
        let first = testing_connector("pinned.example", &bus);
        let second = testing_connector("pinned.example", &bus);
        for con in [&first, &second] {
            let id = con.id().to_string();
            con.subscribe(
                "/id",
                move |_ctx: OpContext, _req: Request| {
                    let id = id.clone();
                    async move { Ok(Response::ok(id)) }
                },
                SubscribeOptions::new(),
            )
            .await
            .unwrap();
            con.startup().await.unwrap();
        }

        let url = format!("https://{}.pinned.example/id", second.id());
        for _ in 0..16 {
            let res = first.request(&ctx(), PublishOptions::get(url.clone())).await.unwrap();
            assert_eq!(res.body, second.id().as_bytes());
        }

        shutdown_all(&[first, second]).await;
    }
}
