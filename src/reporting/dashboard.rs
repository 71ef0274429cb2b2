//! Dashboard data service.
//!
//! Every query goes through the store and any error is logged and turned into
//! an empty list or `None`, so rendering only deals with missing data.

use super::analytics::{
    CorrelatedRun, FailureHotspot, RealtimeHealth, RecentFailure, SystemHealth, TabPerformance,
};
use super::model::{Platform, Step, TestRun};
use super::stats::{chart_series, platform_summaries, ChartSeries, PlatformSummary};
use super::store::{SupabaseStore, HISTORY_DAYS};
use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

const HOTSPOT_LIMIT: usize = 20;
const FAILURE_LIMIT: usize = 25;
const CORRELATED_LIMIT: usize = 20;

/// Everything the dashboard renders, served by `/api/test-results`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DashboardSnapshot {
    pub generated_at: Option<DateTime<Utc>>,
    pub platforms: Vec<PlatformSummary>,
    pub charts: ChartSeries,
    pub latest_run: Option<TestRun>,
    /// Runs with no `completed_at`
    pub in_progress_runs: Vec<String>,
    pub system_health: Vec<SystemHealth>,
    pub realtime_health: Vec<RealtimeHealth>,
    pub failure_hotspots: Vec<FailureHotspot>,
    pub recent_failures: Vec<RecentFailure>,
    pub correlated_runs: Vec<CorrelatedRun>,
    /// Partner panel tabs
    pub tab_performance: Vec<TabPerformance>,
}

/// Produces full dashboard snapshots
#[async_trait]
pub trait DashboardSource: Send + Sync {
    async fn snapshot(&self) -> DashboardSnapshot;
}

pub struct DashboardService {
    store: SupabaseStore,
}

fn or_empty<T: Default>(what: &str, result: Result<T, StoreError>) -> T {
    result.unwrap_or_else(|e| {
        log::error!("Failed to load {}: {}", what, e);
        T::default()
    })
}

impl DashboardService {
    pub fn new(store: SupabaseStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &SupabaseStore {
        &self.store
    }

    pub async fn recent_runs(&self) -> Vec<TestRun> {
        let since = Utc::now() - Duration::days(HISTORY_DAYS);
        or_empty("test runs", self.store.runs_since(Some(since), None).await)
    }

    pub async fn steps_for(&self, runs: &[TestRun]) -> Vec<Step> {
        if runs.is_empty() {
            return Vec::new();
        }
        let ids: Vec<String> = runs.iter().map(|r| r.id.clone()).collect();
        or_empty("steps", self.store.steps_for(&ids).await)
    }

    pub async fn latest_run(&self) -> Option<TestRun> {
        match self.store.runs_since(None, Some(1)).await {
            Ok(runs) => runs.into_iter().next(),
            Err(e) => {
                log::error!("Failed to load latest run: {}", e);
                None
            }
        }
    }

    pub async fn system_health(&self) -> Vec<SystemHealth> {
        or_empty("system health", self.store.system_health().await)
    }

    pub async fn realtime_health(&self) -> Vec<RealtimeHealth> {
        or_empty("realtime health", self.store.realtime_health().await)
    }

    pub async fn failure_hotspots(&self) -> Vec<FailureHotspot> {
        or_empty("failure hotspots", self.store.failure_hotspots(HOTSPOT_LIMIT).await)
    }

    pub async fn recent_failures(&self) -> Vec<RecentFailure> {
        or_empty("recent failures", self.store.recent_failures(FAILURE_LIMIT).await)
    }

    pub async fn correlated_runs(&self) -> Vec<CorrelatedRun> {
        or_empty("correlated runs", self.store.correlated_runs(CORRELATED_LIMIT).await)
    }

    pub async fn tab_performance(&self) -> Vec<TabPerformance> {
        or_empty(
            "tab performance",
            self.store.tab_performance(Platform::PartnerPanel).await,
        )
    }

    pub async fn build_snapshot(&self) -> DashboardSnapshot {
        let runs = self.recent_runs().await;
        let steps = self.steps_for(&runs).await;
        let daily = or_empty("daily metrics", self.store.daily_metrics().await);
        let hotspots = self.failure_hotspots().await;

        let platforms = platform_summaries(&runs, &steps);
        let charts = chart_series(&platforms, &daily, &hotspots);
        let latest_run = match runs.iter().max_by_key(|r| r.executed_at) {
            Some(run) => Some(run.clone()),
            None => self.latest_run().await,
        };

        DashboardSnapshot {
            generated_at: Some(Utc::now()),
            in_progress_runs: runs
                .iter()
                .filter(|r| !r.is_complete())
                .map(|r| r.id.clone())
                .collect(),
            platforms,
            charts,
            latest_run,
            system_health: self.system_health().await,
            realtime_health: self.realtime_health().await,
            failure_hotspots: hotspots,
            recent_failures: self.recent_failures().await,
            correlated_runs: self.correlated_runs().await,
            tab_performance: self.tab_performance().await,
        }
    }
}

#[async_trait]
impl DashboardSource for DashboardService {
    async fn snapshot(&self) -> DashboardSnapshot {
        self.build_snapshot().await
    }
}
