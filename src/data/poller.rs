use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};
use crate::data::forecast_api::{select_forecast, ForecastClient, ForecastError};
use crate::data::types::ForecastSelection;
use crate::monitoring::metrics::PollMetrics;
use crate::monitoring::store::ForecastStore;

/// Fetches the forecast on a fixed interval and writes it into the store.
pub struct Poller {
    client: ForecastClient,
    store: Arc<ForecastStore>,
    metrics: PollMetrics,
    interval: Duration,
}

impl Poller {
    pub fn new(
        client: ForecastClient,
        store: Arc<ForecastStore>,
        metrics: PollMetrics,
        interval: Duration,
    ) -> Self {
        Self {
            client,
            store,
            metrics,
            interval,
        }
    }

    /// One fetch-decode-update cycle. On error the store is not touched.
    pub async fn poll_once(&self) -> Result<ForecastSelection, ForecastError> {
        let response = self.client.fetch_estimate().await?;
        let selection = select_forecast(&response.result.watt_hours_day)?;
        self.store.apply(&selection);
        Ok(selection)
    }

    /// Poll until `shutdown` fires, waiting `interval` after every attempt
    /// whatever its outcome.
    pub async fn run(self, mut shutdown: watch::Receiver<()>) {
        info!(
            "Polling {} every {}s",
            self.client.url(),
            self.interval.as_secs()
        );

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                result = self.poll_once() => self.record(result),
            }

            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        info!("Forecast poller stopped");
    }

    fn record(&self, result: Result<ForecastSelection, ForecastError>) {
        match result {
            Ok(selection) => {
                self.metrics.record_success();
                info!(
                    "Forecast updated: today={:?} tomorrow={:?}",
                    selection.today, selection.tomorrow
                );
            }
            Err(e) => {
                self.metrics.record_error(&e);
                warn!("Forecast poll failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::data::types::{ForecastPoint, ForecastSnapshot};
    use crate::monitoring::metrics::Metrics;
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::Router;
    use chrono::NaiveDate;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Canned upstream: answers every path with the configured status/body.
    #[derive(Clone)]
    struct Upstream {
        reply: Arc<Mutex<(StatusCode, String)>>,
        hits: Arc<AtomicUsize>,
    }

    impl Upstream {
        fn set(&self, status: StatusCode, body: &str) {
            *self.reply.lock().unwrap() = (status, body.to_string());
        }

        fn hits(&self) -> usize {
            self.hits.load(Ordering::SeqCst)
        }
    }

    async fn reply(State(upstream): State<Upstream>) -> (StatusCode, String) {
        upstream.hits.fetch_add(1, Ordering::SeqCst);
        upstream.reply.lock().unwrap().clone()
    }

    async fn start_upstream(status: StatusCode, body: &str) -> (Upstream, SocketAddr) {
        let upstream = Upstream {
            reply: Arc::new(Mutex::new((status, body.to_string()))),
            hits: Arc::new(AtomicUsize::new(0)),
        };
        let router = Router::new().fallback(reply).with_state(upstream.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        (upstream, addr)
    }

    fn poller(addr: SocketAddr, interval: Duration) -> (Poller, Arc<ForecastStore>, PollMetrics) {
        let mut config = Config::default();
        config.polling.api_url = format!("http://{}", addr);

        let store = Arc::new(ForecastStore::new());
        let metrics = Metrics::new(Arc::clone(&store)).unwrap().poll_metrics();
        let client = ForecastClient::new(&config).unwrap();

        (
            Poller::new(client, Arc::clone(&store), metrics.clone(), interval),
            store,
            metrics,
        )
    }

    fn point(y: i32, m: u32, d: u32, wh: i64) -> ForecastPoint {
        ForecastPoint::from_watt_hours(NaiveDate::from_ymd_opt(y, m, d).unwrap(), wh)
    }

    const TWO_DAYS: &str =
        r#"{"result": {"watt_hours_day": {"2025-01-01": 2000, "2024-12-31": 1000}}}"#;

    #[tokio::test]
    async fn test_poll_updates_both_points() {
        let (_upstream, addr) = start_upstream(StatusCode::OK, TWO_DAYS).await;
        let (poller, store, _) = poller(addr, Duration::from_secs(60));

        poller.poll_once().await.unwrap();

        let snapshot = store.snapshot();
        assert_eq!(snapshot.today, point(2024, 12, 31, 1000));
        assert_eq!(snapshot.tomorrow, point(2025, 1, 1, 2000));
    }

    #[tokio::test]
    async fn test_single_day_leaves_tomorrow() {
        let (upstream, addr) = start_upstream(StatusCode::OK, TWO_DAYS).await;
        let (poller, store, _) = poller(addr, Duration::from_secs(60));
        poller.poll_once().await.unwrap();

        upstream.set(
            StatusCode::OK,
            r#"{"result": {"watt_hours_day": {"2025-01-02": 3500}}}"#,
        );
        poller.poll_once().await.unwrap();

        let snapshot = store.snapshot();
        assert_eq!(snapshot.today, point(2025, 1, 2, 3500));
        assert_eq!(snapshot.tomorrow, point(2025, 1, 1, 2000));
    }

    #[tokio::test]
    async fn test_failures_leave_state_unchanged() {
        let (upstream, addr) = start_upstream(StatusCode::OK, TWO_DAYS).await;
        let (poller, store, _) = poller(addr, Duration::from_secs(60));
        poller.poll_once().await.unwrap();
        let before = store.snapshot();

        let cases = [
            (StatusCode::TOO_MANY_REQUESTS, TWO_DAYS, "http_status"),
            (StatusCode::OK, "{not json", "decode"),
            (
                StatusCode::OK,
                r#"{"result": {"watt_hours_day": {"2025-01-02": 1, "2025-01-03": 2, "2025-01-04": 3}}}"#,
                "unexpected_shape",
            ),
            (
                StatusCode::OK,
                r#"{"result": {"watt_hours_day": {"2025-01-02": 1, "01/03/2025": 2}}}"#,
                "date_parse",
            ),
        ];

        for (status, body, kind) in cases {
            upstream.set(status, body);
            let err = poller.poll_once().await.unwrap_err();
            assert_eq!(err.kind(), kind);
            assert_eq!(store.snapshot(), before);
        }
    }

    #[tokio::test]
    async fn test_connection_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (poller, store, _) = poller(addr, Duration::from_secs(60));
        let err = poller.poll_once().await.unwrap_err();

        assert_eq!(err.kind(), "network");
        assert_eq!(store.snapshot(), ForecastSnapshot::default());
    }

    #[tokio::test]
    async fn test_loop_retries_after_failure_and_stops_on_shutdown() {
        let (upstream, addr) = start_upstream(StatusCode::INTERNAL_SERVER_ERROR, "").await;
        let (poller, store, metrics) = poller(addr, Duration::from_millis(50));

        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let handle = tokio::spawn(poller.run(shutdown_rx));

        while upstream.hits() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(store.snapshot(), ForecastSnapshot::default());
        assert!(metrics.error_count("http_status") >= 1);

        upstream.set(StatusCode::OK, TWO_DAYS);
        while store.snapshot().today.date.is_none() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(store.snapshot().tomorrow, point(2025, 1, 1, 2000));

        shutdown_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("poller did not stop")
            .unwrap();
    }
}
