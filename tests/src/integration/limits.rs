//! # Call Depth and Time Budget
//!
//! Both limits travel with the request and are enforced before a request
//! leaves the caller.

#[cfg(test)]
mod tests {
    use crate::integration::fixtures::{ctx, shutdown_all, testing_connector};
    use mb_04_connector::{Connector, OpContext, PublishOptions, Request, Response, SubscribeOptions};
    use shared_bus::InMemoryBus;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    #[tokio::test]
    async fn test_recursion_stops_at_max_call_depth() {
        let bus = InMemoryBus::new();
        let con = testing_connector("deep.example", &bus);
        con.set_max_call_depth(8).unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let caller = con.clone();
        con.subscribe(
            "/recurse",
            move |ctx: OpContext, _req: Request| {
                let counter = Arc::clone(&counter);
                let caller: Connector = caller.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    caller
                        .request(&ctx, PublishOptions::get("https://deep.example/recurse"))
                        .await
                }
            },
            SubscribeOptions::new(),
        )
        .await
        .unwrap();
        con.startup().await.unwrap();

        let err = con
            .request(&ctx(), PublishOptions::get("https://deep.example/recurse"))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 508);
        assert_eq!(err.message(), "call depth overflow");
        assert_eq!(calls.load(Ordering::SeqCst), 8);

        shutdown_all(&[con]).await;
    }

    #[tokio::test]
    async fn test_time_budget_times_out_slow_handler() {
        let bus = InMemoryBus::new();
        let server = testing_connector("slow.example", &bus);
        server
            .subscribe(
                "/slow",
                |ctx: OpContext, _req: Request| async move {
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                        _ = ctx.cancelled() => {}
                    }
                    Ok(Response::ok("late"))
                },
                SubscribeOptions::new(),
            )
            .await
            .unwrap();
        let client = testing_connector("client.example", &bus);
        server.startup().await.unwrap();
        client.startup().await.unwrap();

        let started = Instant::now();
        let err = client
            .request(
                &ctx(),
                PublishOptions::get("https://slow.example/slow").time_budget(Duration::from_millis(500)),
            )
            .await
            .unwrap_err();
        let elapsed = started.elapsed();

        assert_eq!(err.status_code(), 408);
        assert!(elapsed >= Duration::from_millis(500), "returned after {elapsed:?}");
        assert!(elapsed < Duration::from_millis(600), "returned after {elapsed:?}");

        shutdown_all(&[client, server]).await;
    }

    #[tokio::test]
    async fn test_budget_below_network_hop_fails_fast() {
        let bus = InMemoryBus::new();
        let client = testing_connector("client.example", &bus);
        client.startup().await.unwrap();

        let started = Instant::now();
        let err = client
            .request(
                &ctx(),
                PublishOptions::get("https://any.example/x").time_budget(Duration::from_millis(10)),
            )
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 408);
        assert!(started.elapsed() < Duration::from_millis(100));

        shutdown_all(&[client]).await;
    }
}
