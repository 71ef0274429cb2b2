//! Aggregations behind the dashboard's views and RPC functions.
//!
//! Each type is the row shape of one view or RPC. The `*_manual` functions
//! compute the same rows from raw `test_runs`/`journeys`/`steps` when the
//! database object is missing, so callers cannot tell which path served them.

use super::model::{Journey, JourneyStatus, Platform, Step, StepStatus, TestRun};
use super::stats::{average_ms, success_rate};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap, HashSet};

/// `get_system_health_24h`: one row per system with runs in the last day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemHealth {
    pub system: Platform,
    pub total_runs: u64,
    pub completed_runs: u64,
    pub total_steps: u64,
    pub passed_steps: u64,
    pub failed_steps: u64,
    pub success_rate: u32,
    pub avg_duration_ms: u64,
    pub last_run_at: Option<DateTime<Utc>>,
}

/// `v_daily_metrics`: one row per (day, system)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyMetric {
    pub day: NaiveDate,
    pub system: Platform,
    pub runs: u64,
    pub total_steps: u64,
    pub passed_steps: u64,
    pub failed_steps: u64,
    pub success_rate: u32,
    pub avg_duration_ms: u64,
}

/// `v_failure_hotspots`: steps that fail, grouped by name and category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureHotspot {
    pub step_name: String,
    pub category: Option<String>,
    pub failures: u64,
    pub occurrences: u64,
    pub failure_rate: u32,
    pub avg_duration_ms: u64,
    pub last_failed_at: Option<DateTime<Utc>>,
}

/// `v_realtime_health`: latest run per system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeHealth {
    pub system: Platform,
    pub latest_run_id: String,
    pub latest_executed_at: DateTime<Utc>,
    pub in_progress: bool,
    pub running_steps: u64,
    pub failed_steps: u64,
    pub success_rate: u32,
}

/// `get_correlated_runs`: runs joined with their journey and step outcomes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelatedRun {
    pub run_id: String,
    pub system: Platform,
    pub executed_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub total_journeys: u64,
    pub failed_journeys: u64,
    pub total_steps: u64,
    pub failed_steps: u64,
    pub success_rate: u32,
    pub total_runtime_ms: u64,
}

/// `get_tab_performance`: step outcomes per category ("tab") for one system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TabPerformance {
    pub tab: String,
    pub total_steps: u64,
    pub passed_steps: u64,
    pub failed_steps: u64,
    pub success_rate: u32,
    pub avg_duration_ms: u64,
}

/// `get_recent_failures`: newest failed steps first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentFailure {
    pub step_id: String,
    pub run_id: String,
    pub system: Platform,
    pub journey_name: Option<String>,
    pub step_name: String,
    pub category: Option<String>,
    pub error_message: Option<String>,
    pub error_type: Option<String>,
    pub failed_at: Option<DateTime<Utc>>,
}

/// Steps without a category are grouped under this tab
pub const UNCATEGORIZED: &str = "uncategorized";

#[derive(Default)]
struct Tally {
    total: u64,
    passed: u64,
    failed: u64,
    running: u64,
    duration_ms: u64,
}

impl Tally {
    fn add(&mut self, step: &Step) {
        self.total += 1;
        self.duration_ms += step.duration_ms;
        match step.status {
            StepStatus::Passed => self.passed += 1,
            StepStatus::Failed => self.failed += 1,
            StepStatus::Running => self.running += 1,
            StepStatus::Pending => {}
        }
    }

    fn success_rate(&self) -> u32 {
        success_rate(self.passed, self.total)
    }

    fn avg_ms(&self) -> u64 {
        average_ms(self.duration_ms, self.total)
    }
}

fn steps_by_run(steps: &[Step]) -> HashMap<&str, Vec<&Step>> {
    let mut by_run: HashMap<&str, Vec<&Step>> = HashMap::new();
    for step in steps {
        by_run.entry(step.run_id.as_str()).or_default().push(step);
    }
    by_run
}

fn tally<'a>(steps: impl IntoIterator<Item = &'a Step>) -> Tally {
    let mut tally = Tally::default();
    for step in steps {
        tally.add(step);
    }
    tally
}

fn failed_at(step: &Step) -> Option<DateTime<Utc>> {
    step.completed_at.or(step.started_at)
}

pub fn system_health_manual(runs: &[TestRun], steps: &[Step], now: DateTime<Utc>) -> Vec<SystemHealth> {
    let since = now - Duration::hours(24);
    let by_run = steps_by_run(steps);
    let mut rows = Vec::new();

    for platform in Platform::ALL {
        let recent: Vec<&TestRun> = runs
            .iter()
            .filter(|r| r.platform() == platform && r.executed_at >= since)
            .collect();
        if recent.is_empty() {
            continue;
        }

        let tally = tally(
            recent
                .iter()
                .filter_map(|r| by_run.get(r.id.as_str()))
                .flatten()
                .copied(),
        );

        rows.push(SystemHealth {
            system: platform,
            total_runs: recent.len() as u64,
            completed_runs: recent.iter().filter(|r| r.is_complete()).count() as u64,
            total_steps: tally.total,
            passed_steps: tally.passed,
            failed_steps: tally.failed,
            success_rate: tally.success_rate(),
            avg_duration_ms: tally.avg_ms(),
            last_run_at: recent.iter().map(|r| r.executed_at).max(),
        });
    }

    rows
}

/// Newest day first, then system order
pub fn daily_metrics_manual(runs: &[TestRun], steps: &[Step]) -> Vec<DailyMetric> {
    let by_run = steps_by_run(steps);
    let mut groups: BTreeMap<(Reverse<NaiveDate>, Platform), (u64, Tally)> = BTreeMap::new();

    for run in runs {
        let entry = groups
            .entry((Reverse(run.executed_at.date_naive()), run.platform()))
            .or_default();
        entry.0 += 1;
        for step in by_run.get(run.id.as_str()).into_iter().flatten() {
            entry.1.add(step);
        }
    }

    groups
        .into_iter()
        .map(|((Reverse(day), system), (runs, tally))| DailyMetric {
            day,
            system,
            runs,
            total_steps: tally.total,
            passed_steps: tally.passed,
            failed_steps: tally.failed,
            success_rate: tally.success_rate(),
            avg_duration_ms: tally.avg_ms(),
        })
        .collect()
}

/// Most failures first, ties by name
pub fn failure_hotspots_manual(steps: &[Step]) -> Vec<FailureHotspot> {
    let mut groups: HashMap<(&str, Option<&str>), (Tally, Option<DateTime<Utc>>)> = HashMap::new();

    for step in steps {
        let entry = groups
            .entry((step.step_name.as_str(), step.category.as_deref()))
            .or_default();
        entry.0.add(step);
        if step.status == StepStatus::Failed {
            entry.1 = entry.1.max(failed_at(step));
        }
    }

    let mut rows: Vec<FailureHotspot> = groups
        .into_iter()
        .filter(|(_, (tally, _))| tally.failed > 0)
        .map(|((name, category), (tally, last_failed_at))| FailureHotspot {
            step_name: name.to_string(),
            category: category.map(str::to_string),
            failures: tally.failed,
            occurrences: tally.total,
            failure_rate: success_rate(tally.failed, tally.total),
            avg_duration_ms: tally.avg_ms(),
            last_failed_at,
        })
        .collect();

    rows.sort_by(|a, b| {
        b.failures
            .cmp(&a.failures)
            .then_with(|| a.step_name.cmp(&b.step_name))
            .then_with(|| a.category.cmp(&b.category))
    });
    rows
}

/// Systems in display order, skipping those that never ran
pub fn realtime_health_manual(runs: &[TestRun], steps: &[Step]) -> Vec<RealtimeHealth> {
    let by_run = steps_by_run(steps);

    Platform::ALL
        .iter()
        .filter_map(|platform| {
            let latest = runs
                .iter()
                .filter(|r| r.platform() == *platform)
                .max_by(|a, b| a.executed_at.cmp(&b.executed_at).then_with(|| a.id.cmp(&b.id)))?;
            let tally = tally(by_run.get(latest.id.as_str()).into_iter().flatten().copied());

            Some(RealtimeHealth {
                system: *platform,
                latest_run_id: latest.id.clone(),
                latest_executed_at: latest.executed_at,
                in_progress: !latest.is_complete(),
                running_steps: tally.running,
                failed_steps: tally.failed,
                success_rate: tally.success_rate(),
            })
        })
        .collect()
}

/// Newest runs first
pub fn correlated_runs_manual(
    runs: &[TestRun],
    journeys: &[Journey],
    steps: &[Step],
    limit: usize,
) -> Vec<CorrelatedRun> {
    let by_run = steps_by_run(steps);

    let mut sorted: Vec<&TestRun> = runs.iter().collect();
    sorted.sort_by(|a, b| b.executed_at.cmp(&a.executed_at).then_with(|| b.id.cmp(&a.id)));

    sorted
        .into_iter()
        .take(limit)
        .map(|run| {
            let run_journeys = journeys.iter().filter(|j| j.run_id == run.id);
            let (total_journeys, failed_journeys) = run_journeys.fold((0, 0), |(t, f), j| {
                (t + 1, f + u64::from(j.status == JourneyStatus::Failed))
            });
            let tally = tally(by_run.get(run.id.as_str()).into_iter().flatten().copied());

            CorrelatedRun {
                run_id: run.id.clone(),
                system: run.platform(),
                executed_at: run.executed_at,
                completed_at: run.completed_at,
                total_journeys,
                failed_journeys,
                total_steps: tally.total,
                failed_steps: tally.failed,
                success_rate: tally.success_rate(),
                total_runtime_ms: run.total_runtime_ms,
            }
        })
        .collect()
}

/// Tabs by name
pub fn tab_performance_manual(runs: &[TestRun], steps: &[Step], system: Platform) -> Vec<TabPerformance> {
    let run_ids: HashSet<&str> = runs
        .iter()
        .filter(|r| r.platform() == system)
        .map(|r| r.id.as_str())
        .collect();

    let mut tabs: BTreeMap<&str, Tally> = BTreeMap::new();
    for step in steps.iter().filter(|s| run_ids.contains(s.run_id.as_str())) {
        tabs.entry(step.category.as_deref().unwrap_or(UNCATEGORIZED))
            .or_default()
            .add(step);
    }

    tabs.into_iter()
        .map(|(tab, tally)| TabPerformance {
            tab: tab.to_string(),
            total_steps: tally.total,
            passed_steps: tally.passed,
            failed_steps: tally.failed,
            success_rate: tally.success_rate(),
            avg_duration_ms: tally.avg_ms(),
        })
        .collect()
}

/// Newest failure first
pub fn recent_failures_manual(
    runs: &[TestRun],
    journeys: &[Journey],
    steps: &[Step],
    limit: usize,
) -> Vec<RecentFailure> {
    let systems: HashMap<&str, Platform> = runs.iter().map(|r| (r.id.as_str(), r.platform())).collect();
    let journey_names: HashMap<&str, &str> = journeys
        .iter()
        .map(|j| (j.id.as_str(), j.name.as_str()))
        .collect();

    let mut failed: Vec<&Step> = steps.iter().filter(|s| s.status == StepStatus::Failed).collect();
    failed.sort_by(|a, b| failed_at(b).cmp(&failed_at(a)).then_with(|| b.id.cmp(&a.id)));

    failed
        .into_iter()
        .take(limit)
        .map(|step| RecentFailure {
            step_id: step.id.clone(),
            run_id: step.run_id.clone(),
            system: systems.get(step.run_id.as_str()).copied().unwrap_or_default(),
            journey_name: journey_names.get(step.journey_id.as_str()).map(|n| n.to_string()),
            step_name: step.step_name.clone(),
            category: step.category.clone(),
            error_message: step.error_message.clone(),
            error_type: step.error_type.clone(),
            failed_at: failed_at(step),
        })
        .collect()
}
