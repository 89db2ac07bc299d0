//! # Request Correlation
//!
//! Unicast and multicast requests between connectors, handler failures and
//! the ping control endpoint.

#[cfg(test)]
mod tests {
    use crate::integration::fixtures::{ctx, shutdown_all, testing_connector};
    use mb_04_connector::{
        Connector, Method, OpContext, PublishOptions, Request, Response, StatusCode,
        SubscribeOptions, TracedError,
    };
    use shared_bus::InMemoryBus;
    use std::collections::HashSet;
    use std::time::Duration;
    use tokio::time::{timeout, Instant};

    // =========================================================================
    // UNICAST
    // =========================================================================

    #[tokio::test]
    async fn test_unicast_returns_handler_output() {
        let bus = InMemoryBus::new();
        let server = testing_connector("echo.example", &bus);
        server
            .subscribe(
                "/echo",
                |_ctx: OpContext, req: Request| async move {
                    let mut body = b"echo: ".to_vec();
                    body.extend_from_slice(&req.body);
                    Ok(Response::ok(body))
                },
                SubscribeOptions::new().method(Method::POST),
            )
            .await
            .unwrap();
        let client = testing_connector("client.example", &bus);
        server.startup().await.unwrap();
        client.startup().await.unwrap();

        let res = client
            .request(&ctx(), PublishOptions::post("https://echo.example/echo", "hi"))
            .await
            .unwrap();
        assert_eq!(res.status, StatusCode::OK);
        assert_eq!(res.body, b"echo: hi");

        // Wrong method is not served
        let err = client
            .request(&ctx(), PublishOptions::get("https://echo.example/echo"))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 404);

        shutdown_all(&[client, server]).await;
    }

    #[tokio::test]
    async fn test_empty_path_segment_reaches_prefix_subscription() {
        let bus = InMemoryBus::new();
        let server = testing_connector("x.example", &bus);
        server
            .subscribe(
                "/a/",
                |_ctx: OpContext, req: Request| async move {
                    let path = req.parsed_url().map_err(|e| TracedError::wrap(&e))?.path;
                    Ok(Response::ok(path))
                },
                SubscribeOptions::new(),
            )
            .await
            .unwrap();
        server.startup().await.unwrap();

        let res = server
            .request(&ctx(), PublishOptions::get("https://x.example/a//b"))
            .await
            .unwrap();
        assert_eq!(res.body, b"/a//b");

        shutdown_all(&[server]).await;
    }

    #[tokio::test]
    async fn test_unknown_host_is_ack_timeout() {
        let bus = InMemoryBus::new();
        let client = testing_connector("client.example", &bus);
        client.startup().await.unwrap();

        let err = client
            .request(&ctx(), PublishOptions::get("https://nobody.example/anything"))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 404);

        shutdown_all(&[client]).await;
    }

    // =========================================================================
    // MULTICAST
    // =========================================================================

    #[tokio::test]
    async fn test_multicast_receives_every_replica() {
        let bus = InMemoryBus::new();
        let k = 3;
        let mut replicas = Vec::new();
        for _ in 0..k {
            let con = testing_connector("multi.example", &bus);
            let id = con.id().to_string();
            con.subscribe(
                "/who",
                move |_ctx: OpContext, _req: Request| {
                    let id = id.clone();
                    async move { Ok(Response::ok(id)) }
                },
                SubscribeOptions::new().no_queue(),
            )
            .await
            .unwrap();
            con.startup().await.unwrap();
            replicas.push(con);
        }
        let client = testing_connector("client.example", &bus);
        client.startup().await.unwrap();

        let mut responses = client.publish(&ctx(), PublishOptions::get("https://multi.example/who"));
        let mut ids = HashSet::new();
        let collect = async {
            while let Some(res) = responses.recv().await {
                ids.insert(String::from_utf8(res.unwrap().body).unwrap());
            }
        };
        timeout(Duration::from_secs(5), collect).await.expect("multicast terminates");

        let expected: HashSet<String> = replicas.iter().map(|c| c.id().to_string()).collect();
        assert_eq!(ids.len(), k);
        assert_eq!(ids, expected);

        replicas.push(client);
        shutdown_all(&replicas).await;
    }

    /// Multicast `/who` once and return how long the stream took to end and
    /// how many replicas answered.
    async fn multicast_round(client: &Connector) -> (Duration, usize) {
        let started = Instant::now();
        let mut responses = client.publish(&ctx(), PublishOptions::get("https://known.example/who"));
        let mut answered = 0;
        let collect = async {
            while let Some(res) = responses.recv().await {
                res.unwrap();
                answered += 1;
            }
        };
        timeout(Duration::from_secs(5), collect).await.expect("multicast terminates");
        (started.elapsed(), answered)
    }

    #[tokio::test]
    async fn test_multicast_known_responders_skip_ack_wait() {
        let bus = InMemoryBus::new();
        let mut replicas = Vec::new();
        for _ in 0..3 {
            let con = testing_connector("known.example", &bus);
            con.subscribe(
                "/who",
                |_ctx: OpContext, _req: Request| async move { Ok(Response::ok("here")) },
                SubscribeOptions::new().no_queue(),
            )
            .await
            .unwrap();
            con.startup().await.unwrap();
            replicas.push(con);
        }
        let client = testing_connector("client.example", &bus);
        client.startup().await.unwrap();
        let hop = client.network_hop();

        // The first round learns the responders by waiting out the ack window
        let (elapsed, answered) = multicast_round(&client).await;
        assert_eq!(answered, 3);
        assert!(elapsed >= hop, "first round took {elapsed:?}");

        // Later rounds end as soon as every known responder answered
        for round in 1..3 {
            let (elapsed, answered) = multicast_round(&client).await;
            assert_eq!(answered, 3);
            assert!(elapsed < hop / 2, "round {round} took {elapsed:?}");
        }

        // A missing responder makes the next round wait again and refresh the set
        let gone = replicas.pop().unwrap();
        gone.shutdown().await.unwrap();
        let (elapsed, answered) = multicast_round(&client).await;
        assert_eq!(answered, 2);
        assert!(elapsed >= hop, "round after removal took {elapsed:?}");

        let (elapsed, answered) = multicast_round(&client).await;
        assert_eq!(answered, 2);
        assert!(elapsed < hop / 2, "refreshed round took {elapsed:?}");

        replicas.push(client);
        shutdown_all(&replicas).await;
    }

    #[tokio::test]
    async fn test_ping_answered_by_every_connector() {
        let bus = InMemoryBus::new();
        let a = testing_connector("a.example", &bus);
        let b = testing_connector("b.example", &bus);
        let c = testing_connector("c.example", &bus);
        for con in [&a, &b, &c] {
            con.startup().await.unwrap();
        }

        let mut responses = a.publish(&ctx(), PublishOptions::get("https://all:888/ping"));
        let mut hosts = HashSet::new();
        while let Some(res) = responses.recv().await {
            let res = res.unwrap();
            assert_eq!(res.body, br#"{"pong":0}"#);
            hosts.insert(res.frame().from_host().unwrap().to_string());
        }
        assert_eq!(hosts.len(), 3);

        let res = b
            .request(&ctx(), PublishOptions::get("https://c.example:888/ping"))
            .await
            .unwrap();
        let pong: serde_json::Value = res.parse_json().unwrap();
        assert_eq!(pong["pong"], 0);

        shutdown_all(&[a, b, c]).await;
    }

    // =========================================================================
    // FAILURES
    // =========================================================================

    #[tokio::test]
    async fn test_panic_becomes_error_and_service_survives() {
        let bus = InMemoryBus::new();
        let server = testing_connector("fragile.example", &bus);
        server
            .subscribe(
                "/panic",
                |_ctx: OpContext, _req: Request| async move {
                    if true {
                        panic!("really bad");
                    }
                    Ok(Response::new(StatusCode::OK))
                },
                SubscribeOptions::new(),
            )
            .await
            .unwrap();
        server
            .subscribe(
                "/fine",
                |_ctx: OpContext, _req: Request| async move { Ok(Response::ok("fine")) },
                SubscribeOptions::new(),
            )
            .await
            .unwrap();
        let client = testing_connector("client.example", &bus);
        server.startup().await.unwrap();
        client.startup().await.unwrap();

        let err = client
            .request(&ctx(), PublishOptions::get("https://fragile.example/panic"))
            .await
            .unwrap_err();
        assert_eq!(err.message(), "really bad");
        assert_eq!(err.status_code(), 500);

        let res = client
            .request(&ctx(), PublishOptions::get("https://fragile.example/fine"))
            .await
            .unwrap();
        assert_eq!(res.body, b"fine");

        shutdown_all(&[client, server]).await;
    }

    #[tokio::test]
    async fn test_handler_error_keeps_status() {
        let bus = InMemoryBus::new();
        let server = testing_connector("strict.example", &bus);
        server
            .subscribe(
                "/teapot",
                |_ctx: OpContext, _req: Request| async move {
                    Err::<Response, _>(TracedError::with_code(418, "short and stout"))
                },
                SubscribeOptions::new(),
            )
            .await
            .unwrap();
        server.startup().await.unwrap();

        let err = server
            .request(&ctx(), PublishOptions::get("https://strict.example/teapot"))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 418);
        assert_eq!(err.message(), "short and stout");

        shutdown_all(&[server]).await;
    }
}
