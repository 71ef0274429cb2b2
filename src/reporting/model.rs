//! Rows of the `test_runs`, `journeys` and `steps` tables.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::fmt;

/// System a run exercised, stored as `metadata.system`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    #[default]
    Desktop,
    Mobile,
    Oms,
    PartnerPanel,
}

impl Platform {
    pub const ALL: [Platform; 4] = [
        Platform::Desktop,
        Platform::Mobile,
        Platform::Oms,
        Platform::PartnerPanel,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Desktop => "desktop",
            Platform::Mobile => "mobile",
            Platform::Oms => "oms",
            Platform::PartnerPanel => "partner_panel",
        }
    }

    /// Card and chart label
    pub fn label(&self) -> &'static str {
        match self {
            Platform::Desktop => "Desktop",
            Platform::Mobile => "Mobile",
            Platform::Oms => "OMS",
            Platform::PartnerPanel => "Partner Panel",
        }
    }

    /// Lenient parse of a `metadata.system` value; unknown systems count as desktop
    pub fn from_system(system: &str) -> Platform {
        let normalized = system.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "mobile" | "mweb" | "mobile_web" => Platform::Mobile,
            "oms" => Platform::Oms,
            "partner_panel" | "partner" | "partnerpanel" => Platform::PartnerPanel,
            "desktop" | "" => Platform::Desktop,
            other => {
                log::debug!("Unknown system '{}', treating as desktop", other);
                Platform::Desktop
            }
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JourneyStatus {
    Passed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StepStatus {
    Passed,
    Failed,
    Running,
    Pending,
}

/// One execution of the suite
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestRun {
    #[serde(deserialize_with = "id_string")]
    pub id: String,

    pub executed_at: DateTime<Utc>,

    /// Null while the run is in progress, or forever if the runner crashed
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub success_rate: f64,

    #[serde(default)]
    pub total_runtime_ms: u64,

    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl TestRun {
    pub fn platform(&self) -> Platform {
        self.metadata
            .get("system")
            .and_then(|s| s.as_str())
            .map(Platform::from_system)
            .unwrap_or_default()
    }

    pub fn is_complete(&self) -> bool {
        self.completed_at.is_some()
    }
}

/// One user flow within a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Journey {
    #[serde(deserialize_with = "id_string")]
    pub id: String,

    #[serde(deserialize_with = "id_string")]
    pub run_id: String,

    pub journey_number: u32,

    pub name: String,

    pub status: JourneyStatus,

    pub total_steps: u32,
    pub passed_steps: u32,
    pub failed_steps: u32,
    #[serde(default)]
    pub running_steps: u32,
    #[serde(default)]
    pub pending_steps: u32,

    #[serde(default)]
    pub duration_ms: u64,
}

impl Journey {
    /// The per-status counters add up to `total_steps`
    pub fn counts_consistent(&self) -> bool {
        self.passed_steps + self.failed_steps + self.running_steps + self.pending_steps
            == self.total_steps
    }

    /// Counters agree with the step rows actually stored for this journey
    pub fn matches_steps(&self, steps: &[Step]) -> bool {
        let counts = StepCounts::from_steps(steps.iter().filter(|s| s.journey_id == self.id));
        counts.total == self.total_steps
            && counts.passed == self.passed_steps
            && counts.failed == self.failed_steps
            && counts.running == self.running_steps
            && counts.pending == self.pending_steps
    }
}

/// One recorded action within a journey
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    #[serde(deserialize_with = "id_string")]
    pub id: String,

    #[serde(deserialize_with = "id_string")]
    pub run_id: String,

    #[serde(deserialize_with = "id_string")]
    pub journey_id: String,

    pub step_name: String,

    #[serde(default)]
    pub category: Option<String>,

    pub status: StepStatus,

    /// Unsigned, so a negative duration is rejected when the row is decoded
    #[serde(default)]
    pub duration_ms: u64,

    #[serde(default)]
    pub error_message: Option<String>,

    #[serde(default)]
    pub error_type: Option<String>,

    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Step totals by status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StepCounts {
    pub total: u32,
    pub passed: u32,
    pub failed: u32,
    pub running: u32,
    pub pending: u32,
}

impl StepCounts {
    pub fn from_steps<'a>(steps: impl IntoIterator<Item = &'a Step>) -> Self {
        steps.into_iter().fold(Self::default(), |mut counts, step| {
            counts.add(step.status);
            counts
        })
    }

    pub fn add(&mut self, status: StepStatus) {
        self.total += 1;
        match status {
            StepStatus::Passed => self.passed += 1,
            StepStatus::Failed => self.failed += 1,
            StepStatus::Running => self.running += 1,
            StepStatus::Pending => self.pending += 1,
        }
    }
}

/// Steps whose run or journey reference does not resolve.
///
/// Returns one message per dangling reference; empty when consistent.
pub fn validate_steps(runs: &[TestRun], journeys: &[Journey], steps: &[Step]) -> Vec<String> {
    let run_ids: HashSet<&str> = runs.iter().map(|r| r.id.as_str()).collect();
    let journey_runs: std::collections::HashMap<&str, &str> = journeys
        .iter()
        .map(|j| (j.id.as_str(), j.run_id.as_str()))
        .collect();

    let mut problems = Vec::new();
    for step in steps {
        if !run_ids.contains(step.run_id.as_str()) {
            problems.push(format!("step {} references unknown run {}", step.id, step.run_id));
        }
        match journey_runs.get(step.journey_id.as_str()) {
            None => problems.push(format!(
                "step {} references unknown journey {}",
                step.id, step.journey_id
            )),
            Some(run_id) if *run_id != step.run_id => problems.push(format!(
                "step {} belongs to run {} but its journey {} belongs to run {}",
                step.id, step.run_id, step.journey_id, run_id
            )),
            Some(_) => {}
        }
    }
    problems
}

/// Accept ids stored either as text (uuid) or as bigint
pub(crate) fn id_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {}",
            other
        ))),
    }
}
