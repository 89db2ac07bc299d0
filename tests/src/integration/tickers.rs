//! # Tickers
//!
//! Recurring jobs run while the connector is started, outside of the
//! `TESTING` deployment.

#[cfg(test)]
mod tests {
    use crate::integration::fixtures::{local_connector, shutdown_all, testing_connector};
    use mb_04_connector::{OpContext, TracedError};
    use shared_bus::InMemoryBus;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    type Tick = futures::future::Ready<Result<(), TracedError>>;

    fn counting_job(count: &Arc<AtomicUsize>) -> impl Fn(OpContext) -> Tick + Send + Sync + 'static {
        let count = Arc::clone(count);
        move |_ctx: OpContext| {
            count.fetch_add(1, Ordering::SeqCst);
            futures::future::ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_ticker_runs_until_shutdown() {
        let bus = InMemoryBus::new();
        let con = local_connector("tick.example", &bus);
        let ticks = Arc::new(AtomicUsize::new(0));
        con.start_ticker("count", Duration::from_millis(50), counting_job(&ticks))
            .unwrap();
        con.startup().await.unwrap();

        tokio::time::sleep(Duration::from_millis(400)).await;
        shutdown_all(&[con]).await;
        let at_shutdown = ticks.load(Ordering::SeqCst);
        assert!(at_shutdown >= 3, "ticked {at_shutdown} times");

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), at_shutdown);
    }

    #[tokio::test]
    async fn test_slow_tick_is_not_overlapped() {
        let bus = InMemoryBus::new();
        let con = local_connector("slowtick.example", &bus);
        let running = Arc::new(AtomicUsize::new(0));
        let max_running = Arc::new(AtomicUsize::new(0));
        let (r, m) = (Arc::clone(&running), Arc::clone(&max_running));
        con.start_ticker("slow", Duration::from_millis(20), move |_ctx: OpContext| {
            let (r, m) = (Arc::clone(&r), Arc::clone(&m));
            async move {
                let now = r.fetch_add(1, Ordering::SeqCst) + 1;
                m.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(15)).await;
                r.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, TracedError>(())
            }
        })
        .unwrap();
        con.startup().await.unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        shutdown_all(&[con]).await;
        assert_eq!(max_running.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_tickers_idle_in_testing_deployment() {
        let bus = InMemoryBus::new();
        let con = testing_connector("quiet.example", &bus);
        let ticks = Arc::new(AtomicUsize::new(0));
        con.start_ticker("count", Duration::from_millis(10), counting_job(&ticks))
            .unwrap();
        con.startup().await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 0);
        assert_eq!(con.tickers(), vec!["count".to_string()]);

        shutdown_all(&[con]).await;
    }
}
