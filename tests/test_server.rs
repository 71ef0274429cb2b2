//! Local HTTP servers for tests
//!
//! `TestServer` serves a tiny storefront for driving real Chrome without
//! relying on external websites. `MockPostgrest` answers the REST calls the
//! reporting store makes, backed by in-memory tables.
//!
//! Each server instance runs on a random available port for test isolation.

#![allow(dead_code)]

use chrono::DateTime;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use storefront_e2e::config::StoreConfig;
use tokio::sync::oneshot;
use warp::http::StatusCode;
use warp::reply::Reply;
use warp::Filter;

/// Test server that serves storefront pages
pub struct TestServer {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl TestServer {
    /// Start a new test server on a random available port
    pub async fn start() -> Self {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let index = warp::path::end().map(|| {
            warp::reply::html(
                r#"<!DOCTYPE html>
<html lang="en">
<head><title>Flower Shop</title></head>
<body>
    <div id="cookie-banner"><button id="accept-cookies" onclick="this.parentNode.remove()">Accept cookies</button></div>
    <h1>Flower Shop</h1>
    <a id="product-link" href="/product">Red Roses</a>
</body>
</html>"#,
            )
        });

        let product = warp::path("product").map(|| {
            warp::reply::html(
                r#"<!DOCTYPE html>
<html lang="en">
<head><title>Red Roses</title></head>
<body>
    <h1>Red Roses</h1>
    <div class="calendar">
        <button data-day="15" disabled>15</button>
        <button data-day="20" onclick="document.getElementById('slot').textContent = 'Delivery on the 20th'">20</button>
        <button data-day="25" onclick="document.getElementById('slot').textContent = 'Delivery on the 25th'">25</button>
    </div>
    <p id="slot"></p>
    <input id="message" placeholder="Gift message">
    <button id="add-to-cart" onclick="window.location.href = '/checkout'">Add to cart</button>
</body>
</html>"#,
            )
        });

        let checkout = warp::path("checkout").map(|| {
            warp::reply::html(
                r#"<!DOCTYPE html>
<html lang="en">
<head><title>Checkout</title></head>
<body>
    <h1>Order summary</h1>
    <button class="place-order">Place order</button>
</body>
</html>"#,
            )
        });

        let routes = index.or(product).or(checkout);

        let (addr, server) =
            warp::serve(routes).bind_with_graceful_shutdown(([127, 0, 0, 1], 0), async {
                shutdown_rx.await.ok();
            });

        tokio::spawn(server);

        Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Get the base URL for this server (e.g., "http://127.0.0.1:12345")
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Wait for the server to be ready by making a test request
    pub async fn wait_ready(&self) -> anyhow::Result<()> {
        wait_for(&self.url()).await
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

async fn wait_for(url: &str) -> anyhow::Result<()> {
    let max_attempts = 10;

    for attempt in 1..=max_attempts {
        match reqwest::get(url).await {
            Ok(response) if response.status().is_success() => return Ok(()),
            Ok(response) => {
                println!("⚠️ Attempt {}: Server returned status {}", attempt, response.status());
            }
            Err(e) => {
                println!("⚠️ Attempt {}: Server not ready - {}", attempt, e);
            }
        }

        if attempt < max_attempts {
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
        }
    }

    anyhow::bail!("Server did not become ready after {} attempts", max_attempts)
}

#[derive(Default)]
struct MockState {
    tables: HashMap<String, Vec<Value>>,
    /// Views and RPC functions that exist, keyed by path (`v_x`, `rpc/get_x`)
    objects: HashMap<String, Value>,
    requests: Vec<String>,
    next_id: u64,
}

/// PostgREST stand-in under `/rest/v1`
///
/// Views and RPC functions answer 404 unless registered with `serve_object`.
pub struct MockPostgrest {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    state: Arc<Mutex<MockState>>,
}

impl MockPostgrest {
    pub async fn start() -> Self {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let state = Arc::new(Mutex::new(MockState::default()));
        let shared = state.clone();

        let health = warp::path::end().map(|| "ok");

        let rest = warp::path("rest")
            .and(warp::path("v1"))
            .and(warp::path::tail())
            .and(warp::method())
            .and(warp::query::<Vec<(String, String)>>())
            .and(warp::body::bytes())
            .map(
                move |tail: warp::path::Tail,
                      method: warp::http::Method,
                      query: Vec<(String, String)>,
                      body: warp::hyper::body::Bytes| {
                    handle(&shared, method.as_str(), tail.as_str(), query, &body)
                },
            );

        let (addr, server) = warp::serve(health.or(rest))
            .bind_with_graceful_shutdown(([127, 0, 0, 1], 0), async {
                shutdown_rx.await.ok();
            });
        tokio::spawn(server);

        let mock = Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
            state,
        };
        mock.wait_ready().await.expect("mock PostgREST did not start");
        mock
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn config(&self) -> StoreConfig {
        StoreConfig::new(self.url(), "anon-key")
    }

    pub async fn wait_ready(&self) -> anyhow::Result<()> {
        wait_for(&self.url()).await
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    /// Replace the rows of a table
    pub fn set_rows(&self, table: &str, rows: Value) {
        let rows = rows.as_array().cloned().unwrap_or_default();
        self.lock().tables.insert(table.to_string(), rows);
    }

    pub fn rows(&self, table: &str) -> Vec<Value> {
        self.lock().tables.get(table).cloned().unwrap_or_default()
    }

    /// Make a view (`v_daily_metrics`) or function (`rpc/get_x`) exist
    pub fn serve_object(&self, path: &str, body: Value) {
        self.lock().objects.insert(path.to_string(), body);
    }

    /// Every request as `METHOD path`
    pub fn requests(&self) -> Vec<String> {
        self.lock().requests.clone()
    }

    pub fn request_count(&self, request: &str) -> usize {
        self.lock().requests.iter().filter(|r| *r == request).count()
    }
}

impl Drop for MockPostgrest {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

fn handle(
    state: &Mutex<MockState>,
    method: &str,
    path: &str,
    query: Vec<(String, String)>,
    body: &[u8],
) -> warp::reply::Response {
    let mut state = state.lock().unwrap();
    state.requests.push(format!("{} {}", method, path));

    if path.starts_with("rpc/") || path.starts_with("v_") {
        return match state.objects.get(path) {
            Some(body) => warp::reply::json(body).into_response(),
            None => {
                let code = if path.starts_with("rpc/") { "PGRST202" } else { "42P01" };
                warp::reply::with_status(
                    warp::reply::json(&json!({ "code": code, "message": format!("{} not found", path) })),
                    StatusCode::NOT_FOUND,
                )
                .into_response()
            }
        };
    }

    match method {
        "GET" => {
            let rows = state.tables.get(path).cloned().unwrap_or_default();
            warp::reply::json(&select(path, rows, &query)).into_response()
        }
        "POST" => {
            let incoming: Value = serde_json::from_slice(body).unwrap_or(Value::Null);
            let incoming = match incoming {
                Value::Array(rows) => rows,
                row => vec![row],
            };

            let mut stored = Vec::new();
            for mut row in incoming {
                state.next_id += 1;
                let id = format!("{}-{}", path, state.next_id);
                if let Some(object) = row.as_object_mut() {
                    object.entry("id").or_insert(Value::String(id));
                }
                stored.push(row);
            }
            state
                .tables
                .entry(path.to_string())
                .or_default()
                .extend(stored.iter().cloned());

            warp::reply::with_status(warp::reply::json(&stored), StatusCode::CREATED).into_response()
        }
        "PATCH" => {
            let patch: Value = serde_json::from_slice(body).unwrap_or(Value::Null);
            let id = filter_value(&query, "id", "eq.");
            for row in state.tables.entry(path.to_string()).or_default() {
                if id.is_some() && row.get("id").and_then(Value::as_str) != id.as_deref() {
                    continue;
                }
                if let (Some(row), Some(patch)) = (row.as_object_mut(), patch.as_object()) {
                    for (key, value) in patch {
                        row.insert(key.clone(), value.clone());
                    }
                }
            }
            StatusCode::NO_CONTENT.into_response()
        }
        _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
    }
}

fn filter_value(query: &[(String, String)], column: &str, operator: &str) -> Option<String> {
    query
        .iter()
        .find(|(key, _)| key == column)
        .and_then(|(_, value)| value.strip_prefix(operator))
        .map(str::to_string)
}

/// The filters the store uses: `run_id=in.(...)`, `executed_at=gte.`,
/// `id=eq.`, `order` on `executed_at` and `limit`
fn select(table: &str, mut rows: Vec<Value>, query: &[(String, String)]) -> Vec<Value> {
    if let Some(ids) = filter_value(query, "run_id", "in.") {
        let ids: HashSet<String> = ids
            .trim_start_matches('(')
            .trim_end_matches(')')
            .split(',')
            .map(str::to_string)
            .collect();
        rows.retain(|row| {
            row.get("run_id")
                .and_then(Value::as_str)
                .is_some_and(|id| ids.contains(id))
        });
    }

    if let Some(since) = filter_value(query, "executed_at", "gte.")
        .and_then(|since| DateTime::parse_from_rfc3339(&since).ok())
    {
        rows.retain(|row| {
            row.get("executed_at")
                .and_then(Value::as_str)
                .and_then(|at| DateTime::parse_from_rfc3339(at).ok())
                .is_some_and(|at| at >= since)
        });
    }

    if let Some(id) = filter_value(query, "id", "eq.") {
        rows.retain(|row| row.get("id").and_then(Value::as_str) == Some(id.as_str()));
    }

    if table == "test_runs" {
        // RFC 3339 timestamps in UTC sort lexically
        rows.sort_by(|a, b| {
            let a = a.get("executed_at").and_then(Value::as_str).unwrap_or_default();
            let b = b.get("executed_at").and_then(Value::as_str).unwrap_or_default();
            b.cmp(a)
        });
    }

    if let Some(limit) = query
        .iter()
        .find(|(key, _)| key == "limit")
        .and_then(|(_, value)| value.parse::<usize>().ok())
    {
        rows.truncate(limit);
    }

    rows
}
