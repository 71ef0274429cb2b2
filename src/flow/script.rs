//! Journey Flow Types
//!
//! Defines the JSON structure of a journey and the report produced by running it.

use super::fallback::ActionPolicy;
use crate::browser::Locator;
use crate::error::FlowError;
use crate::reporting::model::Platform;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// One end-to-end user journey: an ordered list of UI steps
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
    /// Journey name shown on the dashboard (e.g. "Coupon Testing")
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Position of this journey within a run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub journey_number: Option<u32>,

    /// Platform the journey exercises
    #[serde(default)]
    pub platform: Platform,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    pub steps: Vec<FlowStep>,
}

/// A single named step of a journey
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowStep {
    pub name: String,

    /// Grouping used by the dashboard (e.g. "cart", "checkout", a panel tab)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    #[serde(default)]
    pub policy: ActionPolicy,

    /// Overrides the executor's default timeout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    pub action: UiAction,
}

/// What a step does on the page
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UiAction {
    Navigate {
        url: String,
    },
    /// Click the first candidate that becomes ready
    Click {
        targets: Vec<Locator>,
    },
    /// Fill the first candidate that becomes ready
    Fill {
        targets: Vec<Locator>,
        value: String,
    },
    Press {
        key: String,
    },
    WaitFor {
        target: Locator,
    },
    /// Click the first entry of a preference list that is ready right now
    PickFirst {
        options: Vec<Locator>,
    },
    /// Run nested steps only if `probe` shows up within the probe timeout
    IfVisible {
        probe: Locator,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
        then: Vec<FlowStep>,
    },
    AssertVisible {
        target: Locator,
    },
    AssertUrlContains {
        fragment: String,
    },
    /// Fetch a one-time password from the mailbox and type it in
    EnterOtp {
        targets: Vec<Locator>,
    },
    Screenshot {
        name: String,
    },
}

impl UiAction {
    /// Short name used in logs and reports
    pub fn kind(&self) -> &'static str {
        match self {
            UiAction::Navigate { .. } => "navigate",
            UiAction::Click { .. } => "click",
            UiAction::Fill { .. } => "fill",
            UiAction::Press { .. } => "press",
            UiAction::WaitFor { .. } => "wait_for",
            UiAction::PickFirst { .. } => "pick_first",
            UiAction::IfVisible { .. } => "if_visible",
            UiAction::AssertVisible { .. } => "assert_visible",
            UiAction::AssertUrlContains { .. } => "assert_url_contains",
            UiAction::EnterOtp { .. } => "enter_otp",
            UiAction::Screenshot { .. } => "screenshot",
        }
    }
}

/// Outcome of one step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Passed,
    Failed,
    /// Optional step whose action failed
    Skipped,
    /// Not reached because an earlier required step failed
    NotRun,
}

/// Result of executing a single step
#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    /// Step number (1-indexed)
    pub step: usize,

    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    pub action: &'static str,

    pub outcome: StepOutcome,

    pub duration: Duration,

    pub started_at: chrono::DateTime<chrono::Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,

    /// Candidate or option that succeeded, when the action had several
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched: Option<String>,

    /// Screenshot saved for this step (failures and explicit screenshots)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
}

/// Complete report of one journey
#[derive(Debug, Clone, Serialize)]
pub struct JourneyReport {
    pub journey_name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub journey_number: Option<u32>,

    pub platform: Platform,

    pub total_steps: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub not_run: usize,

    pub total_duration: Duration,

    pub steps: Vec<StepRecord>,
}

impl Flow {
    /// Load a flow from a JSON file
    pub async fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        let flow: Flow = serde_json::from_str(&content)?;
        Ok(flow)
    }

    /// Save this flow to a JSON file
    pub async fn to_file(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }
}

/// The platform every flow of a run targets.
///
/// A run is recorded under one platform, so mixing platforms is an error.
pub fn shared_platform(flows: &[Flow]) -> Result<Platform, FlowError> {
    let Some(first) = flows.first() else {
        return Ok(Platform::default());
    };

    match flows.iter().find(|flow| flow.platform != first.platform) {
        Some(other) => Err(FlowError::Invalid(format!(
            "journeys '{}' ({}) and '{}' ({}) target different platforms; run each platform separately",
            first.name, first.platform, other.name, other.platform
        ))),
        None => Ok(first.platform),
    }
}

impl JourneyReport {
    pub fn new(flow: &Flow) -> Self {
        Self {
            journey_name: flow.name.clone(),
            journey_number: flow.journey_number,
            platform: flow.platform,
            total_steps: flow.steps.len(),
            passed: 0,
            failed: 0,
            skipped: 0,
            not_run: 0,
            total_duration: Duration::from_secs(0),
            steps: Vec::with_capacity(flow.steps.len()),
        }
    }

    /// Report for a journey that never started.
    ///
    /// The first step carries the error and the others are not run, so the
    /// journey is still counted as a failure.
    pub fn aborted(flow: &Flow, error: &FlowError) -> Self {
        let mut report = Self::new(flow);
        let started_at = chrono::Utc::now();
        let mut steps: Vec<(String, Option<String>, &'static str)> = flow
            .steps
            .iter()
            .map(|step| (step.name.clone(), step.category.clone(), step.action.kind()))
            .collect();
        if steps.is_empty() {
            steps.push(("Start journey".to_string(), None, "start"));
        }
        report.total_steps = steps.len();

        for (i, (name, category, action)) in steps.into_iter().enumerate() {
            let first = i == 0;
            report.add_step(StepRecord {
                step: i + 1,
                name,
                category,
                action,
                outcome: if first { StepOutcome::Failed } else { StepOutcome::NotRun },
                duration: Duration::ZERO,
                started_at,
                error: first.then(|| error.to_string()),
                error_type: first.then(|| error.kind().to_string()),
                matched: None,
                artifact: None,
            });
        }
        report
    }

    /// Add a step record and update counters
    pub fn add_step(&mut self, record: StepRecord) {
        self.total_duration += record.duration;

        match record.outcome {
            StepOutcome::Passed => self.passed += 1,
            StepOutcome::Failed => self.failed += 1,
            StepOutcome::Skipped => self.skipped += 1,
            StepOutcome::NotRun => self.not_run += 1,
        }

        self.steps.push(record);
    }

    /// True when no required step failed
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.not_run == 0
    }

    /// Share of steps that passed, as a percentage
    pub fn success_rate(&self) -> f64 {
        if self.total_steps == 0 {
            return 0.0;
        }
        (self.passed as f64 / self.total_steps as f64) * 100.0
    }
}
