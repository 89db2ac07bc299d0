//! # Fragmentation
//!
//! Bodies larger than the max fragment size travel as several bus messages
//! in both directions.

#[cfg(test)]
mod tests {
    use crate::integration::fixtures::{ctx, shutdown_all, testing_connector};
    use mb_04_connector::{Method, OpContext, PublishOptions, Request, Response, SubscribeOptions};
    use mb_telemetry::metrics::FRAGMENTS_SENT;
    use shared_bus::InMemoryBus;

    #[tokio::test]
    async fn test_large_bodies_round_trip_in_fragments() {
        let bus = InMemoryBus::new();
        let server = testing_connector("big.example", &bus);
        server.set_max_fragment_size(1024).unwrap();
        server
            .subscribe(
                "/reverse",
                |_ctx: OpContext, req: Request| async move {
                    let mut body = req.body;
                    body.reverse();
                    Ok(Response::ok(body))
                },
                SubscribeOptions::new().method(Method::POST),
            )
            .await
            .unwrap();
        let client = testing_connector("client.example", &bus);
        client.set_max_fragment_size(1000).unwrap();
        server.startup().await.unwrap();
        client.startup().await.unwrap();

        let body: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let before = FRAGMENTS_SENT.get();
        let res = client
            .request(&ctx(), PublishOptions::post("https://big.example/reverse", body.clone()))
            .await
            .unwrap();

        let mut expected = body;
        expected.reverse();
        assert_eq!(res.body, expected);
        // 10 request fragments plus 10 response fragments at least
        assert!(FRAGMENTS_SENT.get() - before >= 20.0);

        shutdown_all(&[client, server]).await;
    }

    #[tokio::test]
    async fn test_small_body_is_single_fragment() {
        let bus = InMemoryBus::new();
        let server = testing_connector("small.example", &bus);
        server
            .subscribe(
                "/echo",
                |_ctx: OpContext, req: Request| async move { Ok(Response::ok(req.body)) },
                SubscribeOptions::new(),
            )
            .await
            .unwrap();
        server.set_max_fragment_size(1024).unwrap();
        server.startup().await.unwrap();

        let res = server
            .request(&ctx(), PublishOptions::post("https://small.example/echo", vec![7u8; 1024]))
            .await
            .unwrap();
        assert_eq!(res.body.len(), 1024);

        shutdown_all(&[server]).await;
    }

    #[tokio::test]
    async fn test_too_many_fragments_is_refused() {
        let bus = InMemoryBus::new();
        let server = testing_connector("capped.example", &bus);
        server.set_max_fragments(4).unwrap();
        server
            .subscribe(
                "/echo",
                |_ctx: OpContext, req: Request| async move { Ok(Response::ok(req.body)) },
                SubscribeOptions::new(),
            )
            .await
            .unwrap();
        let client = testing_connector("client.example", &bus);
        client.set_max_fragment_size(1000).unwrap();
        server.startup().await.unwrap();
        client.startup().await.unwrap();

        let err = client
            .request(&ctx(), PublishOptions::post("https://capped.example/echo", vec![1u8; 10_000]))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 413);

        // Within the limit the endpoint still serves
        let res = client
            .request(&ctx(), PublishOptions::post("https://capped.example/echo", vec![2u8; 3_000]))
            .await
            .unwrap();
        assert_eq!(res.body, vec![2u8; 3_000]);

        shutdown_all(&[client, server]).await;
    }
}
