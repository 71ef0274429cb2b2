//! Write path: records a run while the runner executes it.
//!
//! The run row is inserted up front with `completed_at = null`, each journey
//! and its steps are inserted as the journey finishes, and the run row is
//! patched at the end. A runner that dies mid-run leaves `completed_at` null,
//! which the dashboard reports as in progress.

use super::model::{JourneyStatus, Platform, StepStatus, TestRun};
use super::stats::success_rate;
use super::store::{SupabaseStore, JOURNEYS, STEPS, TEST_RUNS};
use crate::error::StoreError;
use crate::flow::{JourneyReport, RunTelemetry, StepOutcome, StepRecord};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Instant;

/// `error_type` stored for optional steps that did not succeed
pub const OPTIONAL_SKIPPED: &str = "optional_skipped";

#[derive(Debug, Clone, Serialize)]
pub struct NewRun {
    pub executed_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub success_rate: f64,
    pub total_runtime_ms: u64,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewJourney {
    pub run_id: String,
    pub journey_number: u32,
    pub name: String,
    pub status: JourneyStatus,
    pub total_steps: u32,
    pub passed_steps: u32,
    pub failed_steps: u32,
    pub running_steps: u32,
    pub pending_steps: u32,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewStep {
    pub run_id: String,
    pub journey_id: String,
    pub step_name: String,
    pub category: Option<String>,
    pub status: StepStatus,
    pub duration_ms: u64,
    pub error_message: Option<String>,
    pub error_type: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(serde::Deserialize)]
struct Inserted {
    #[serde(deserialize_with = "super::model::id_string")]
    id: String,
}

/// Stored status of an executed step
pub fn step_status(outcome: StepOutcome) -> StepStatus {
    match outcome {
        StepOutcome::Passed | StepOutcome::Skipped => StepStatus::Passed,
        StepOutcome::Failed => StepStatus::Failed,
        StepOutcome::NotRun => StepStatus::Pending,
    }
}

pub fn step_row(record: &StepRecord, run_id: &str, journey_id: &str) -> NewStep {
    let status = step_status(record.outcome);
    let error_type = match record.outcome {
        StepOutcome::Skipped => Some(OPTIONAL_SKIPPED.to_string()),
        _ => record.error_type.clone(),
    };
    let completed_at = (record.outcome != StepOutcome::NotRun).then(|| {
        record.started_at
            + chrono::Duration::from_std(record.duration).unwrap_or_else(|_| chrono::Duration::zero())
    });

    NewStep {
        run_id: run_id.to_string(),
        journey_id: journey_id.to_string(),
        step_name: record.name.clone(),
        category: record.category.clone(),
        status,
        duration_ms: record.duration.as_millis() as u64,
        error_message: record.error.clone(),
        error_type,
        started_at: record.started_at,
        completed_at,
    }
}

/// Journey row whose counters are derived from the same statuses as its steps
pub fn journey_row(report: &JourneyReport, run_id: &str, fallback_number: u32) -> NewJourney {
    let mut passed = 0;
    let mut failed = 0;
    let mut pending = 0;
    for record in &report.steps {
        match step_status(record.outcome) {
            StepStatus::Passed => passed += 1,
            StepStatus::Failed => failed += 1,
            StepStatus::Pending => pending += 1,
            StepStatus::Running => {}
        }
    }

    NewJourney {
        run_id: run_id.to_string(),
        journey_number: report.journey_number.unwrap_or(fallback_number),
        name: report.journey_name.clone(),
        status: if report.is_success() {
            JourneyStatus::Passed
        } else {
            JourneyStatus::Failed
        },
        total_steps: report.steps.len() as u32,
        passed_steps: passed,
        failed_steps: failed,
        running_steps: 0,
        pending_steps: pending,
        duration_ms: report.total_duration.as_millis() as u64,
    }
}

/// Records one run into the datastore
pub struct RunRecorder<'a> {
    store: &'a SupabaseStore,
    run_id: String,
    platform: Platform,
    started: Instant,
    journeys: u32,
    passed_steps: u64,
    total_steps: u64,
}

impl<'a> RunRecorder<'a> {
    /// Insert the run row; the run shows as in progress until `finish`
    pub async fn start(
        store: &'a SupabaseStore,
        platform: Platform,
        extra: serde_json::Value,
    ) -> Result<RunRecorder<'a>, StoreError> {
        let row = NewRun {
            executed_at: Utc::now(),
            completed_at: None,
            success_rate: 0.0,
            total_runtime_ms: 0,
            metadata: run_metadata(platform, extra, None),
        };

        let inserted: Vec<TestRun> = store.insert(TEST_RUNS, &[row]).await?;
        let run = inserted.into_iter().next().ok_or_else(|| StoreError::Decode {
            path: TEST_RUNS.to_string(),
            message: "insert returned no row".to_string(),
        })?;

        log::info!("Recording run {} ({})", run.id, platform);
        Ok(Self {
            store,
            run_id: run.id,
            platform,
            started: Instant::now(),
            journeys: 0,
            passed_steps: 0,
            total_steps: 0,
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Insert a finished journey and its steps, returning the journey id
    pub async fn record_journey(&mut self, report: &JourneyReport) -> Result<String, StoreError> {
        self.journeys += 1;
        let journey = journey_row(report, &self.run_id, self.journeys);

        let inserted: Vec<Inserted> = self.store.insert(JOURNEYS, &[&journey]).await?;
        let journey_id = inserted
            .into_iter()
            .next()
            .map(|row| row.id)
            .ok_or_else(|| StoreError::Decode {
                path: JOURNEYS.to_string(),
                message: "insert returned no row".to_string(),
            })?;

        let steps: Vec<NewStep> = report
            .steps
            .iter()
            .map(|record| step_row(record, &self.run_id, &journey_id))
            .collect();
        if !steps.is_empty() {
            let _: Vec<Inserted> = self.store.insert(STEPS, &steps).await?;
        }

        self.passed_steps += u64::from(journey.passed_steps);
        self.total_steps += u64::from(journey.total_steps);

        log::debug!(
            "Recorded journey '{}' ({} steps) as {}",
            journey.name,
            steps.len(),
            journey_id
        );
        Ok(journey_id)
    }

    /// Mark the run complete
    pub async fn finish(self, telemetry: &RunTelemetry, extra: serde_json::Value) -> Result<(), StoreError> {
        let rate = success_rate(self.passed_steps, self.total_steps);
        let patch = serde_json::json!({
            "completed_at": Utc::now(),
            "success_rate": rate,
            "total_runtime_ms": self.started.elapsed().as_millis() as u64,
            "metadata": run_metadata(self.platform, extra, Some(telemetry)),
        });

        self.store
            .update(TEST_RUNS, &[("id", format!("eq.{}", self.run_id))], &patch)
            .await?;

        log::info!("Run {} complete: {}% of {} steps passed", self.run_id, rate, self.total_steps);
        Ok(())
    }
}

fn run_metadata(
    platform: Platform,
    extra: serde_json::Value,
    telemetry: Option<&RunTelemetry>,
) -> serde_json::Value {
    let mut metadata = match extra {
        serde_json::Value::Object(map) => map,
        _ => serde_json::Map::new(),
    };
    metadata.insert("system".to_string(), serde_json::json!(platform));
    metadata.insert("ci".to_string(), serde_json::json!(crate::config::is_ci()));
    if let Some(telemetry) = telemetry {
        metadata.insert(
            "average_page_load_ms".to_string(),
            serde_json::json!(telemetry.average_page_load_ms),
        );
        metadata.insert(
            "average_step_ms".to_string(),
            serde_json::json!(telemetry.average_step_ms),
        );
        if let Some(slowest) = &telemetry.slowest_page_load {
            metadata.insert("slowest_page_load".to_string(), serde_json::json!(slowest));
        }
    }
    serde_json::Value::Object(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn record(step: usize, outcome: StepOutcome) -> StepRecord {
        StepRecord {
            step,
            name: format!("step {}", step),
            category: Some("cart".to_string()),
            action: "click",
            outcome,
            duration: Duration::from_millis(if outcome == StepOutcome::NotRun { 0 } else { 250 }),
            started_at: Utc::now(),
            error: (outcome == StepOutcome::Failed || outcome == StepOutcome::Skipped)
                .then(|| "not found".to_string()),
            error_type: (outcome == StepOutcome::Failed || outcome == StepOutcome::Skipped)
                .then(|| "all_candidates_failed".to_string()),
            matched: None,
            artifact: None,
        }
    }

    fn report(outcomes: &[StepOutcome]) -> JourneyReport {
        let flow: crate::flow::Flow = serde_json::from_value(serde_json::json!({
            "name": "Coupon Testing",
            "journey_number": 3,
            "steps": [{"name": "x", "action": {"type": "press", "key": "Enter"}}]
        }))
        .unwrap();
        let mut report = JourneyReport::new(&flow);
        report.total_steps = outcomes.len();
        for (i, outcome) in outcomes.iter().enumerate() {
            report.add_step(record(i + 1, *outcome));
        }
        report
    }

    #[test]
    fn test_journey_counts_add_up() {
        let report = report(&[
            StepOutcome::Passed,
            StepOutcome::Skipped,
            StepOutcome::Failed,
            StepOutcome::NotRun,
            StepOutcome::NotRun,
        ]);
        let journey = journey_row(&report, "run-1", 1);

        assert_eq!(journey.journey_number, 3);
        assert_eq!(journey.status, JourneyStatus::Failed);
        assert_eq!(journey.total_steps, 5);
        assert_eq!(journey.passed_steps, 2);
        assert_eq!(journey.failed_steps, 1);
        assert_eq!(journey.pending_steps, 2);
        assert_eq!(
            journey.passed_steps + journey.failed_steps + journey.running_steps + journey.pending_steps,
            journey.total_steps
        );
    }

    #[test]
    fn test_step_rows() {
        let skipped = step_row(&record(2, StepOutcome::Skipped), "run-1", "j-1");
        assert_eq!(skipped.status, StepStatus::Passed);
        assert_eq!(skipped.error_type.as_deref(), Some(OPTIONAL_SKIPPED));
        assert_eq!(skipped.error_message.as_deref(), Some("not found"));
        assert!(skipped.completed_at.is_some());

        let not_run = step_row(&record(4, StepOutcome::NotRun), "run-1", "j-1");
        assert_eq!(not_run.status, StepStatus::Pending);
        assert_eq!(not_run.completed_at, None);

        let failed = step_row(&record(3, StepOutcome::Failed), "run-1", "j-1");
        assert_eq!(failed.status, StepStatus::Failed);
        assert_eq!(failed.duration_ms, 250);
        assert_eq!(failed.error_type.as_deref(), Some("all_candidates_failed"));
    }

    #[test]
    fn test_metadata_keeps_extra_fields() {
        let metadata = run_metadata(Platform::Oms, serde_json::json!({"branch": "main"}), None);
        assert_eq!(metadata["system"], "oms");
        assert_eq!(metadata["branch"], "main");
    }
}
