//! PostgREST client for the reporting tables, views and RPC functions.
//!
//! Whether each view or RPC exists is probed on first use and remembered for
//! the lifetime of the store. Missing ones are served by manual queries over
//! the raw tables, computed by the `analytics` module.

use super::analytics::{
    self, CorrelatedRun, DailyMetric, FailureHotspot, RealtimeHealth, RecentFailure,
    SystemHealth, TabPerformance,
};
use super::model::{Journey, Platform, Step, TestRun};
use crate::config::StoreConfig;
use crate::error::StoreError;
use chrono::{DateTime, Duration, NaiveTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;

pub const TEST_RUNS: &str = "test_runs";
pub const JOURNEYS: &str = "journeys";
pub const STEPS: &str = "steps";

pub const V_REALTIME_HEALTH: &str = "v_realtime_health";
pub const V_DAILY_METRICS: &str = "v_daily_metrics";
pub const V_FAILURE_HOTSPOTS: &str = "v_failure_hotspots";

pub const RPC_SYSTEM_HEALTH: &str = "get_system_health_24h";
pub const RPC_CORRELATED_RUNS: &str = "get_correlated_runs";
pub const RPC_TAB_PERFORMANCE: &str = "get_tab_performance";
pub const RPC_RECENT_FAILURES: &str = "get_recent_failures";

/// How far back history-based aggregates look
pub const HISTORY_DAYS: i64 = 30;

/// Midnight UTC of the first day in the daily metrics window; whole days
/// only, so the boundary day is complete
pub fn daily_window_start(now: DateTime<Utc>) -> DateTime<Utc> {
    (now - Duration::days(HISTORY_DAYS))
        .date_naive()
        .and_time(NaiveTime::MIN)
        .and_utc()
}

/// Run ids per `in.(...)` filter, keeps request URLs short
const ID_CHUNK: usize = 100;

pub struct SupabaseStore {
    client: reqwest::Client,
    rest_url: String,
    capabilities: Mutex<HashMap<String, bool>>,
}

impl SupabaseStore {
    pub fn new(config: &StoreConfig) -> Result<Self, StoreError> {
        if config.url.trim().is_empty() {
            return Err(StoreError::Config("datastore URL is empty".to_string()));
        }

        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(&config.api_key)
            .map_err(|_| StoreError::Config("API key is not a valid header value".to_string()))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", config.api_key))
            .map_err(|_| StoreError::Config("API key is not a valid header value".to_string()))?;
        headers.insert("apikey", key);
        headers.insert(AUTHORIZATION, bearer);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .map_err(|e| StoreError::Config(e.to_string()))?;

        Ok(Self {
            client,
            rest_url: config.rest_url(),
            capabilities: Mutex::new(HashMap::new()),
        })
    }

    /// `GET /<relation>` with PostgREST query parameters
    pub async fn select<T: DeserializeOwned>(
        &self,
        relation: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>, StoreError> {
        let request = self
            .client
            .get(format!("{}/{}", self.rest_url, relation))
            .query(query);
        let response = self.send(relation, request).await?;
        decode(relation, response).await
    }

    /// `POST /rpc/<function>`
    pub async fn rpc<T: DeserializeOwned>(
        &self,
        function: &str,
        params: &serde_json::Value,
    ) -> Result<T, StoreError> {
        let path = format!("rpc/{}", function);
        let request = self
            .client
            .post(format!("{}/{}", self.rest_url, path))
            .json(params);
        let response = self.send(&path, request).await?;
        decode(&path, response).await
    }

    /// Insert rows and return them as stored (with generated ids)
    pub async fn insert<B, R>(&self, table: &str, rows: &B) -> Result<Vec<R>, StoreError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let request = self
            .client
            .post(format!("{}/{}", self.rest_url, table))
            .header("Prefer", "return=representation")
            .json(rows);
        let response = self.send(table, request).await?;
        decode(table, response).await
    }

    /// `PATCH` the rows matching `filter`
    pub async fn update<B>(
        &self,
        table: &str,
        filter: &[(&str, String)],
        patch: &B,
    ) -> Result<(), StoreError>
    where
        B: Serialize + ?Sized,
    {
        let request = self
            .client
            .patch(format!("{}/{}", self.rest_url, table))
            .query(filter)
            .header("Prefer", "return=minimal")
            .json(patch);
        self.send(table, request).await?;
        Ok(())
    }

    async fn send(
        &self,
        path: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, StoreError> {
        let response = request.send().await.map_err(|source| StoreError::Http {
            path: path.to_string(),
            source,
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        log::debug!("{} returned {}: {}", path, status, body);
        Err(StoreError::Status {
            path: path.to_string(),
            status: status.as_u16(),
            body,
        })
    }

    /// Probe result for a view or RPC, `None` until first use
    pub fn capability(&self, name: &str) -> Option<bool> {
        self.lock_capabilities().get(name).copied()
    }

    fn remember(&self, name: &str, available: bool) {
        self.lock_capabilities().insert(name.to_string(), available);
    }

    fn lock_capabilities(&self) -> std::sync::MutexGuard<'_, HashMap<String, bool>> {
        self.capabilities
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Serve from `primary` while the object exists, from `manual` once it is
    /// known to be missing. Other errors are returned and not remembered.
    async fn with_fallback<T, P, M>(&self, name: &str, primary: P, manual: M) -> Result<T, StoreError>
    where
        P: Future<Output = Result<T, StoreError>>,
        M: Future<Output = Result<T, StoreError>>,
    {
        if self.capability(name) == Some(false) {
            return manual.await;
        }

        match primary.await {
            Ok(rows) => {
                if self.capability(name).is_none() {
                    log::debug!("{} is available", name);
                    self.remember(name, true);
                }
                Ok(rows)
            }
            Err(e) if e.is_missing_relation() => {
                log::warn!("{} is unavailable ({}), using manual queries for this session", name, e);
                self.remember(name, false);
                manual.await
            }
            Err(e) => Err(e),
        }
    }

    /// Runs executed since `since`, newest first
    pub async fn runs_since(
        &self,
        since: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> Result<Vec<TestRun>, StoreError> {
        let mut query = vec![
            ("select", "*".to_string()),
            ("order", "executed_at.desc".to_string()),
        ];
        if let Some(since) = since {
            query.push(("executed_at", format!("gte.{}", since.to_rfc3339())));
        }
        if let Some(limit) = limit {
            query.push(("limit", limit.to_string()));
        }
        self.select(TEST_RUNS, &query).await
    }

    pub async fn journeys_for(&self, run_ids: &[String]) -> Result<Vec<Journey>, StoreError> {
        self.select_by_runs(JOURNEYS, run_ids, "journey_number.asc").await
    }

    pub async fn steps_for(&self, run_ids: &[String]) -> Result<Vec<Step>, StoreError> {
        self.select_by_runs(STEPS, run_ids, "started_at.asc").await
    }

    async fn select_by_runs<T: DeserializeOwned>(
        &self,
        table: &str,
        run_ids: &[String],
        order: &str,
    ) -> Result<Vec<T>, StoreError> {
        let mut rows = Vec::new();
        for chunk in run_ids.chunks(ID_CHUNK) {
            let query = [
                ("select", "*".to_string()),
                ("run_id", format!("in.({})", chunk.join(","))),
                ("order", order.to_string()),
            ];
            rows.extend(self.select::<T>(table, &query).await?);
        }
        Ok(rows)
    }

    /// Runs since `since` plus their journeys and steps
    pub async fn history(&self, since: DateTime<Utc>) -> Result<History, StoreError> {
        let runs = self.runs_since(Some(since), None).await?;
        let ids: Vec<String> = runs.iter().map(|r| r.id.clone()).collect();
        let journeys = self.journeys_for(&ids).await?;
        let steps = self.steps_for(&ids).await?;
        Ok(History { runs, journeys, steps })
    }

    async fn recent_history(&self) -> Result<History, StoreError> {
        self.history(Utc::now() - Duration::days(HISTORY_DAYS)).await
    }

    pub async fn system_health(&self) -> Result<Vec<SystemHealth>, StoreError> {
        self.with_fallback(
            RPC_SYSTEM_HEALTH,
            self.rpc(RPC_SYSTEM_HEALTH, &serde_json::json!({})),
            async {
                let now = Utc::now();
                let history = self.history(now - Duration::hours(24)).await?;
                Ok(analytics::system_health_manual(&history.runs, &history.steps, now))
            },
        )
        .await
    }

    pub async fn daily_metrics(&self) -> Result<Vec<DailyMetric>, StoreError> {
        let since = daily_window_start(Utc::now());
        let query = [
            ("select", "*".to_string()),
            ("day", format!("gte.{}", since.date_naive())),
            ("order", "day.desc,system.asc".to_string()),
        ];
        self.with_fallback(V_DAILY_METRICS, self.select(V_DAILY_METRICS, &query), async {
            let history = self.history(since).await?;
            Ok(analytics::daily_metrics_manual(&history.runs, &history.steps))
        })
        .await
    }

    pub async fn failure_hotspots(&self, limit: usize) -> Result<Vec<FailureHotspot>, StoreError> {
        let query = [
            ("select", "*".to_string()),
            ("order", "failures.desc,step_name.asc".to_string()),
            ("limit", limit.to_string()),
        ];
        self.with_fallback(V_FAILURE_HOTSPOTS, self.select(V_FAILURE_HOTSPOTS, &query), async {
            let history = self.recent_history().await?;
            let mut rows = analytics::failure_hotspots_manual(&history.steps);
            rows.truncate(limit);
            Ok(rows)
        })
        .await
    }

    pub async fn realtime_health(&self) -> Result<Vec<RealtimeHealth>, StoreError> {
        let query = [("select", "*".to_string())];
        self.with_fallback(V_REALTIME_HEALTH, self.select(V_REALTIME_HEALTH, &query), async {
            let history = self.recent_history().await?;
            Ok(analytics::realtime_health_manual(&history.runs, &history.steps))
        })
        .await
    }

    pub async fn correlated_runs(&self, limit: usize) -> Result<Vec<CorrelatedRun>, StoreError> {
        self.with_fallback(
            RPC_CORRELATED_RUNS,
            self.rpc(RPC_CORRELATED_RUNS, &serde_json::json!({ "limit_count": limit })),
            async {
                let history = self.recent_history().await?;
                Ok(analytics::correlated_runs_manual(
                    &history.runs,
                    &history.journeys,
                    &history.steps,
                    limit,
                ))
            },
        )
        .await
    }

    pub async fn tab_performance(&self, system: Platform) -> Result<Vec<TabPerformance>, StoreError> {
        self.with_fallback(
            RPC_TAB_PERFORMANCE,
            self.rpc(RPC_TAB_PERFORMANCE, &serde_json::json!({ "system_name": system })),
            async {
                let history = self.recent_history().await?;
                Ok(analytics::tab_performance_manual(&history.runs, &history.steps, system))
            },
        )
        .await
    }

    pub async fn recent_failures(&self, limit: usize) -> Result<Vec<RecentFailure>, StoreError> {
        self.with_fallback(
            RPC_RECENT_FAILURES,
            self.rpc(RPC_RECENT_FAILURES, &serde_json::json!({ "limit_count": limit })),
            async {
                let history = self.recent_history().await?;
                Ok(analytics::recent_failures_manual(
                    &history.runs,
                    &history.journeys,
                    &history.steps,
                    limit,
                ))
            },
        )
        .await
    }
}

/// Raw rows of a time window
#[derive(Debug, Clone, Default)]
pub struct History {
    pub runs: Vec<TestRun>,
    pub journeys: Vec<Journey>,
    pub steps: Vec<Step>,
}

async fn decode<T: DeserializeOwned>(path: &str, response: reqwest::Response) -> Result<T, StoreError> {
    let bytes = response.bytes().await.map_err(|source| StoreError::Http {
        path: path.to_string(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|e| StoreError::Decode {
        path: path.to_string(),
        message: e.to_string(),
    })
}
