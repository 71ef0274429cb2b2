// Live dashboard refresh and HTTP API tests

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use futures::{SinkExt, StreamExt};
use storefront_e2e::config::StoreConfig;
use storefront_e2e::reporting::{
    ChangeEvent, ChangeNotification, DashboardSnapshot, DashboardSource, LiveDashboard,
    RealtimeListener,
};
use storefront_e2e::server;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

/// Counts full snapshot fetches
#[derive(Default)]
struct CountingSource {
    fetches: AtomicU64,
}

#[async_trait]
impl DashboardSource for CountingSource {
    async fn snapshot(&self) -> DashboardSnapshot {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        DashboardSnapshot {
            generated_at: Some(chrono::Utc::now()),
            in_progress_runs: vec![format!("run-{}", self.fetches.load(Ordering::SeqCst))],
            ..Default::default()
        }
    }
}

fn change(table: &str, event: ChangeEvent) -> ChangeNotification {
    ChangeNotification {
        table: table.to_string(),
        event,
        commit_timestamp: None,
    }
}

#[tokio::test]
async fn test_one_refresh_per_notification() {
    let live = Arc::new(LiveDashboard::new(CountingSource::default()));
    let (tx, rx) = mpsc::channel(16);

    let runner = {
        let live = live.clone();
        tokio::spawn(async move { live.run(rx).await })
    };

    // Initial fetch
    let mut waited = 0;
    while live.refresh_count().await == 0 && waited < 100 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        waited += 1;
    }
    assert_eq!(live.refresh_count().await, 1);
    let first = live.last_updated().await.unwrap();

    tokio::time::sleep(Duration::from_millis(5)).await;
    tx.send(change("steps", ChangeEvent::Insert)).await.unwrap();
    tx.send(change("steps", ChangeEvent::Insert)).await.unwrap();
    tx.send(change("test_runs", ChangeEvent::Update)).await.unwrap();
    drop(tx);
    runner.await.unwrap();

    assert_eq!(live.refresh_count().await, 4);
    assert!(live.last_updated().await.unwrap() > first);
    assert_eq!(
        live.current().await.unwrap().in_progress_runs,
        vec!["run-4".to_string()]
    );
}

fn step_inserted() -> String {
    serde_json::json!({
        "topic": "realtime:storefront-e2e",
        "event": "postgres_changes",
        "payload": {
            "data": {
                "table": "steps",
                "type": "INSERT",
                "commit_timestamp": "2026-10-18T09:00:00Z"
            }
        },
        "ref": null
    })
    .to_string()
}

#[tokio::test]
async fn test_heartbeats_continue_while_consumer_is_busy() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut socket = tokio_tungstenite::accept_async(stream).await.unwrap();

        let join = socket.next().await.unwrap().unwrap().into_text().unwrap();
        assert!(join.contains("phx_join"));

        for _ in 0..3 {
            socket.send(Message::Text(step_inserted())).await.unwrap();
        }

        // Nobody drains the changes yet, heartbeats must still arrive
        let mut heartbeats = 0;
        while heartbeats < 2 {
            let text = tokio::time::timeout(Duration::from_secs(2), socket.next())
                .await
                .expect("heartbeat while the consumer is blocked")
                .unwrap()
                .unwrap()
                .into_text()
                .unwrap();
            if text.contains("\"heartbeat\"") {
                heartbeats += 1;
            }
        }
        socket
    });

    let config = StoreConfig::new(format!("http://127.0.0.1:{}", port), "anon-key");
    let (tx, mut rx) = mpsc::channel(1);
    let handle = RealtimeListener::new(&config)
        .with_heartbeat_interval(Duration::from_millis(50))
        .spawn(tx);

    let _socket = server.await.unwrap();

    // Every change is delivered once the consumer catches up
    for _ in 0..3 {
        let change = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(change, change_with_timestamp("steps", ChangeEvent::Insert));
    }

    drop(rx);
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .unwrap()
        .unwrap();
}

fn change_with_timestamp(table: &str, event: ChangeEvent) -> ChangeNotification {
    ChangeNotification {
        commit_timestamp: Some("2026-10-18T09:00:00Z".to_string()),
        ..change(table, event)
    }
}

#[tokio::test]
async fn test_serves_cached_snapshot() {
    let live = LiveDashboard::new(CountingSource::default());

    // First request fills the cache, later ones reuse it
    let a = live.snapshot().await;
    let b = live.snapshot().await;

    assert_eq!(a, b);
    assert_eq!(live.refresh_count().await, 1);
}

#[tokio::test]
async fn test_health_route() {
    let dir = tempfile::tempdir().unwrap();
    let routes = server::routes(Arc::new(CountingSource::default()), dir.path().to_path_buf());

    let response = warp::test::request().path("/health").reply(&routes).await;

    assert_eq!(response.status(), 200);
    let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_results_route_returns_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(CountingSource::default());
    let routes = server::routes(source.clone(), dir.path().to_path_buf());

    let response = warp::test::request()
        .path("/api/test-results")
        .reply(&routes)
        .await;

    assert_eq!(response.status(), 200);
    let snapshot: DashboardSnapshot = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(snapshot.in_progress_runs, vec!["run-1".to_string()]);
    assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_screenshots_route() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("checkout_003_failure.png"), [0x89, 0x50, 0x4E, 0x47]).unwrap();
    std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
    let routes = server::routes(Arc::new(CountingSource::default()), dir.path().to_path_buf());

    let response = warp::test::request()
        .path("/api/screenshots?inline=false")
        .reply(&routes)
        .await;

    assert_eq!(response.status(), 200);
    let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(body["count"], 1);
    assert_eq!(body["screenshots"][0]["name"], "checkout_003_failure.png");
    assert!(body["screenshots"][0].get("data_uri").is_none());

    let response = warp::test::request()
        .path("/api/screenshots")
        .reply(&routes)
        .await;
    let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
    let data_uri = body["screenshots"][0]["data_uri"].as_str().unwrap();
    assert!(data_uri.starts_with("data:image/png;base64,"));
}

#[tokio::test]
async fn test_missing_screenshot_directory_is_empty_list() {
    let dir = tempfile::tempdir().unwrap();
    let routes = server::routes(
        Arc::new(CountingSource::default()),
        dir.path().join("never-created"),
    );

    let response = warp::test::request()
        .path("/api/screenshots")
        .reply(&routes)
        .await;

    assert_eq!(response.status(), 200);
    let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(body["count"], 0);
}
