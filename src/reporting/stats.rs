//! Dashboard arithmetic: success rates, durations, per-platform cards and
//! chart series.

use super::analytics::{DailyMetric, FailureHotspot};
use super::model::{Platform, Step, StepStatus, TestRun};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// `round(passed / total * 100)`, or 0 when there is nothing to divide by
pub fn success_rate(passed: u64, total: u64) -> u32 {
    if total == 0 {
        return 0;
    }
    (passed as f64 / total as f64 * 100.0).round() as u32
}

/// Mean in whole milliseconds, 0 for an empty set
pub fn average_ms(sum: u64, count: u64) -> u64 {
    if count == 0 {
        0
    } else {
        (sum as f64 / count as f64).round() as u64
    }
}

/// Human-readable duration: `850ms`, `12.3s`, `4m 5s`, `1h 2m`
pub fn format_duration(ms: u64) -> String {
    if ms < 1_000 {
        format!("{}ms", ms)
    } else if ms < 60_000 {
        // Truncate to tenths so 59_999 stays below "60.0s"
        format!("{:.1}s", (ms / 100) as f64 / 10.0)
    } else if ms < 3_600_000 {
        format!("{}m {}s", ms / 60_000, (ms % 60_000) / 1_000)
    } else {
        format!("{}h {}m", ms / 3_600_000, (ms % 3_600_000) / 60_000)
    }
}

/// One platform card
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformSummary {
    pub platform: Platform,
    pub label: String,
    pub runs: u64,
    /// Runs without `completed_at`
    pub in_progress_runs: u64,
    pub total_steps: u64,
    pub passed_steps: u64,
    pub failed_steps: u64,
    pub success_rate: u32,
    pub avg_step_ms: u64,
    pub total_duration_ms: u64,
    pub total_duration: String,
    pub avg_step_time: String,
    pub last_run_at: Option<DateTime<Utc>>,
}

/// Aggregate one platform's runs and the steps recorded for them
pub fn summarize_platform(platform: Platform, runs: &[TestRun], steps: &[Step]) -> PlatformSummary {
    let runs: Vec<&TestRun> = runs.iter().filter(|r| r.platform() == platform).collect();
    let run_ids: HashSet<&str> = runs.iter().map(|r| r.id.as_str()).collect();

    let mut total_steps = 0u64;
    let mut passed_steps = 0u64;
    let mut failed_steps = 0u64;
    let mut step_ms = 0u64;
    for step in steps.iter().filter(|s| run_ids.contains(s.run_id.as_str())) {
        total_steps += 1;
        step_ms += step.duration_ms;
        match step.status {
            StepStatus::Passed => passed_steps += 1,
            StepStatus::Failed => failed_steps += 1,
            StepStatus::Running | StepStatus::Pending => {}
        }
    }

    let total_duration_ms: u64 = runs.iter().map(|r| r.total_runtime_ms).sum();
    let avg_step_ms = average_ms(step_ms, total_steps);

    PlatformSummary {
        platform,
        label: platform.label().to_string(),
        runs: runs.len() as u64,
        in_progress_runs: runs.iter().filter(|r| !r.is_complete()).count() as u64,
        total_steps,
        passed_steps,
        failed_steps,
        success_rate: success_rate(passed_steps, total_steps),
        avg_step_ms,
        total_duration_ms,
        total_duration: format_duration(total_duration_ms),
        avg_step_time: format_duration(avg_step_ms),
        last_run_at: runs.iter().map(|r| r.executed_at).max(),
    }
}

/// Cards for every platform, in display order
pub fn platform_summaries(runs: &[TestRun], steps: &[Step]) -> Vec<PlatformSummary> {
    Platform::ALL
        .iter()
        .map(|platform| summarize_platform(*platform, runs, steps))
        .collect()
}

/// Success rate per platform (3-D column chart)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnSeries {
    pub categories: Vec<String>,
    pub success_rate: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendPoint {
    pub day: NaiveDate,
    pub success_rate: u32,
    pub runs: u64,
}

/// Failures against average duration, bubble size = occurrences
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BubblePoint {
    pub name: String,
    pub x: u64,
    pub y: u64,
    pub z: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChartSeries {
    pub column: ColumnSeries,
    pub trend: Vec<TrendPoint>,
    pub bubble: Vec<BubblePoint>,
}

pub fn column_series(summaries: &[PlatformSummary]) -> ColumnSeries {
    ColumnSeries {
        categories: summaries.iter().map(|s| s.label.clone()).collect(),
        success_rate: summaries.iter().map(|s| s.success_rate).collect(),
    }
}

/// Daily success rate across all platforms, oldest day first
pub fn trend_series(daily: &[DailyMetric]) -> Vec<TrendPoint> {
    let mut days: Vec<NaiveDate> = daily.iter().map(|d| d.day).collect();
    days.sort_unstable();
    days.dedup();

    days.into_iter()
        .map(|day| {
            let (runs, passed, failed) = daily
                .iter()
                .filter(|d| d.day == day)
                .fold((0, 0, 0), |(r, p, f), d| {
                    (r + d.runs, p + d.passed_steps, f + d.failed_steps)
                });
            TrendPoint {
                day,
                success_rate: success_rate(passed, passed + failed),
                runs,
            }
        })
        .collect()
}

pub fn bubble_series(hotspots: &[FailureHotspot]) -> Vec<BubblePoint> {
    hotspots
        .iter()
        .filter(|h| h.failures > 0)
        .map(|h| BubblePoint {
            name: h.step_name.clone(),
            x: h.failures,
            y: h.avg_duration_ms,
            z: h.occurrences,
        })
        .collect()
}

pub fn chart_series(
    summaries: &[PlatformSummary],
    daily: &[DailyMetric],
    hotspots: &[FailureHotspot],
) -> ChartSeries {
    ChartSeries {
        column: column_series(summaries),
        trend: trend_series(daily),
        bubble: bubble_series(hotspots),
    }
}
