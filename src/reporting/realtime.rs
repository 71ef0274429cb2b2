//! Realtime updates.
//!
//! `RealtimeListener` joins a Supabase Realtime channel (Phoenix protocol over
//! a websocket) for row changes on `test_runs` and `steps` and forwards each
//! change into an mpsc channel. `LiveDashboard` consumes that channel and
//! re-fetches the complete snapshot once per change; it never patches rows.

use super::dashboard::{DashboardSnapshot, DashboardSource};
use super::store::{STEPS, TEST_RUNS};
use crate::config::StoreConfig;
use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const CHANNEL_TOPIC: &str = "realtime:storefront-e2e";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeEvent {
    Insert,
    Update,
    Delete,
}

/// A row change on a watched table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeNotification {
    pub table: String,
    pub event: ChangeEvent,
    pub commit_timestamp: Option<String>,
}

#[derive(Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    payload: serde_json::Value,
}

#[derive(Deserialize)]
struct ChangeData {
    table: String,
    #[serde(rename = "type")]
    event: ChangeEvent,
    #[serde(default)]
    commit_timestamp: Option<String>,
}

/// Decode a channel message; anything but a change on a watched table is `None`
pub fn parse_change(text: &str) -> Option<ChangeNotification> {
    let envelope: Envelope = serde_json::from_str(text).ok()?;
    if envelope.event != "postgres_changes" {
        return None;
    }

    let data: ChangeData = serde_json::from_value(envelope.payload.get("data")?.clone()).ok()?;
    if data.table != TEST_RUNS && data.table != STEPS {
        return None;
    }

    Some(ChangeNotification {
        table: data.table,
        event: data.event,
        commit_timestamp: data.commit_timestamp,
    })
}

/// `phx_join` for row changes on both watched tables
pub fn join_message(access_token: &str, msg_ref: u64) -> String {
    let changes: Vec<serde_json::Value> = [TEST_RUNS, STEPS]
        .iter()
        .map(|table| serde_json::json!({ "event": "*", "schema": "public", "table": table }))
        .collect();

    serde_json::json!({
        "topic": CHANNEL_TOPIC,
        "event": "phx_join",
        "payload": {
            "config": {
                "broadcast": { "ack": false, "self": false },
                "presence": { "key": "" },
                "postgres_changes": changes,
            },
            "access_token": access_token,
        },
        "ref": msg_ref.to_string(),
        "join_ref": msg_ref.to_string(),
    })
    .to_string()
}

pub fn heartbeat_message(msg_ref: u64) -> String {
    serde_json::json!({
        "topic": "phoenix",
        "event": "heartbeat",
        "payload": {},
        "ref": msg_ref.to_string(),
    })
    .to_string()
}

/// Websocket subscription to the realtime endpoint
pub struct RealtimeListener {
    url: String,
    api_key: String,
    heartbeat_interval: Duration,
}

impl RealtimeListener {
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            url: config.realtime_url(),
            api_key: config.api_key.clone(),
            heartbeat_interval: HEARTBEAT_INTERVAL,
        }
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Run one connection until it drops (`Err`) or the receiver goes away (`Ok`)
    pub async fn run(&self, tx: &mpsc::Sender<ChangeNotification>) -> Result<(), StoreError> {
        let (socket, _) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| StoreError::Realtime(format!("connect failed: {}", e)))?;
        let (mut write, mut read) = socket.split();

        let mut msg_ref = 1;
        write
            .send(Message::Text(join_message(&self.api_key, msg_ref)))
            .await
            .map_err(|e| StoreError::Realtime(format!("join failed: {}", e)))?;
        log::info!("Subscribed to changes on {} and {}", TEST_RUNS, STEPS);

        let mut heartbeat = tokio::time::interval(self.heartbeat_interval);
        heartbeat.tick().await;

        // Changes wait here while the consumer is busy so heartbeats keep flowing
        let mut pending: VecDeque<ChangeNotification> = VecDeque::new();

        loop {
            tokio::select! {
                permit = tx.reserve(), if !pending.is_empty() => {
                    let Ok(permit) = permit else {
                        return Ok(());
                    };
                    if let Some(change) = pending.pop_front() {
                        permit.send(change);
                    }
                }
                _ = tx.closed() => return Ok(()),
                _ = heartbeat.tick() => {
                    msg_ref += 1;
                    write
                        .send(Message::Text(heartbeat_message(msg_ref)))
                        .await
                        .map_err(|e| StoreError::Realtime(format!("heartbeat failed: {}", e)))?;
                }
                message = read.next() => {
                    let text = match message {
                        Some(Ok(Message::Text(text))) => text,
                        Some(Ok(Message::Close(frame))) => {
                            return Err(StoreError::Realtime(format!("server closed the channel: {:?}", frame)));
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => return Err(StoreError::Realtime(e.to_string())),
                        None => return Err(StoreError::Realtime("connection ended".to_string())),
                    };

                    if text.contains("\"phx_error\"") || text.contains("\"status\":\"error\"") {
                        log::error!("Realtime channel reported an error: {}", text);
                        continue;
                    }

                    if let Some(change) = parse_change(&text) {
                        log::debug!("{:?} on {}", change.event, change.table);
                        pending.push_back(change);
                    }
                }
            }
        }
    }

    /// Keep a subscription alive in the background, reconnecting after drops
    pub fn spawn(self, tx: mpsc::Sender<ChangeNotification>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match self.run(&tx).await {
                    Ok(()) => {
                        log::debug!("Change receiver closed, stopping realtime listener");
                        return;
                    }
                    Err(e) => {
                        log::warn!("Realtime subscription lost: {}", e);
                        tokio::time::sleep(RECONNECT_DELAY).await;
                        if tx.is_closed() {
                            return;
                        }
                    }
                }
            }
        })
    }
}

#[derive(Debug, Default)]
struct LiveState {
    snapshot: Option<DashboardSnapshot>,
    last_updated: Option<DateTime<Utc>>,
    refreshes: u64,
}

/// Dashboard state kept current by change notifications
pub struct LiveDashboard<S> {
    source: S,
    state: RwLock<LiveState>,
}

impl<S: DashboardSource> LiveDashboard<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            state: RwLock::new(LiveState::default()),
        }
    }

    /// Fetch the full snapshot and stamp `last_updated`
    pub async fn refresh(&self) -> DateTime<Utc> {
        let snapshot = self.source.snapshot().await;
        let now = Utc::now();

        let mut state = self.state.write().await;
        state.snapshot = Some(snapshot);
        state.last_updated = Some(now);
        state.refreshes += 1;
        now
    }

    pub async fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.state.read().await.last_updated
    }

    /// Number of full re-fetches so far
    pub async fn refresh_count(&self) -> u64 {
        self.state.read().await.refreshes
    }

    pub async fn current(&self) -> Option<DashboardSnapshot> {
        self.state.read().await.snapshot.clone()
    }

    /// Initial fetch, then exactly one re-fetch per notification until the
    /// channel closes
    pub async fn run(&self, mut changes: mpsc::Receiver<ChangeNotification>) {
        self.refresh().await;

        while let Some(change) = changes.recv().await {
            log::info!("{:?} on {}, refreshing dashboard", change.event, change.table);
            self.refresh().await;
        }
    }
}

#[async_trait]
impl<S: DashboardSource> DashboardSource for LiveDashboard<S> {
    async fn snapshot(&self) -> DashboardSnapshot {
        if let Some(snapshot) = self.current().await {
            return snapshot;
        }
        self.refresh().await;
        self.current().await.unwrap_or_default()
    }
}
