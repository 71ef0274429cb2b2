//! Journey Executor
//!
//! Runs a `Flow` step by step against a `PageDriver`, applying each step's
//! action policy in one place.

use super::fallback::{pick_first_available, try_in_order, wait_until_ready, ActionPolicy};
use super::script::{Flow, FlowStep, JourneyReport, StepOutcome, StepRecord, UiAction};
use super::telemetry::MetricsCollector;
use super::validation::{FlowValidator, ValidationResult};
use crate::artifacts;
use crate::browser::{Locator, PageDriver};
use crate::config::ExecutorOptions;
use crate::error::FlowError;
use crate::otp::OtpProvider;
use futures::future::BoxFuture;
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

/// What a successful action reports back
#[derive(Debug, Default)]
struct ActionOutput {
    matched: Option<String>,
    artifact: Option<String>,
}

/// Journey executor
///
/// Holds the page for a single session; steps never run in parallel.
pub struct FlowExecutor<'a> {
    page: &'a dyn PageDriver,
    metrics: &'a MetricsCollector,
    otp: Option<&'a dyn OtpProvider>,
    options: ExecutorOptions,
    variables: HashMap<String, String>,
}

impl<'a> FlowExecutor<'a> {
    pub fn new(page: &'a dyn PageDriver, metrics: &'a MetricsCollector) -> Self {
        Self {
            page,
            metrics,
            otp: None,
            options: ExecutorOptions::default(),
            variables: HashMap::new(),
        }
    }

    pub fn with_options(mut self, options: ExecutorOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_otp_provider(mut self, provider: &'a dyn OtpProvider) -> Self {
        self.otp = Some(provider);
        self
    }

    /// Values for `${NAME}` placeholders in URLs and fill values
    pub fn with_variables(mut self, variables: HashMap<String, String>) -> Self {
        self.variables = variables;
        self
    }

    /// Execute a complete journey.
    ///
    /// Only an invalid flow is an `Err`; step failures are part of the report.
    pub async fn execute_flow(&self, flow: &Flow) -> Result<JourneyReport, FlowError> {
        let mut validation = ValidationResult::success();
        FlowValidator::new().validate_flow(flow, &mut validation);
        if !validation.is_valid {
            let messages: Vec<String> = validation.errors.into_iter().map(|e| e.message).collect();
            return Err(FlowError::Invalid(messages.join("; ")));
        }

        log::info!("Starting journey '{}' ({} steps)", flow.name, flow.steps.len());
        let mut report = JourneyReport::new(flow);
        let mut aborted = false;

        for (i, step) in flow.steps.iter().enumerate() {
            let number = i + 1;
            let started_at = chrono::Utc::now();

            if aborted {
                report.add_step(StepRecord {
                    step: number,
                    name: step.name.clone(),
                    category: step.category.clone(),
                    action: step.action.kind(),
                    outcome: StepOutcome::NotRun,
                    duration: Duration::ZERO,
                    started_at,
                    error: None,
                    error_type: None,
                    matched: None,
                    artifact: None,
                });
                continue;
            }

            let start = Instant::now();
            let result = self.run_action(&flow.name, number, step).await;
            let duration = start.elapsed();
            self.metrics.record_step(&flow.name, &step.name, duration);

            let mut record = StepRecord {
                step: number,
                name: step.name.clone(),
                category: step.category.clone(),
                action: step.action.kind(),
                outcome: StepOutcome::Passed,
                duration,
                started_at,
                error: None,
                error_type: None,
                matched: None,
                artifact: None,
            };

            match result {
                Ok(output) => {
                    log::info!("✓ [{}] step {} '{}' ({}ms)", flow.name, number, step.name, duration.as_millis());
                    record.matched = output.matched;
                    record.artifact = output.artifact;
                }
                Err(e) => {
                    record.error = Some(e.to_string());
                    record.error_type = Some(e.kind().to_string());

                    match step.policy {
                        ActionPolicy::Optional => {
                            log::warn!("[{}] optional step '{}' skipped: {}", flow.name, step.name, e);
                            record.outcome = StepOutcome::Skipped;
                        }
                        ActionPolicy::Required => {
                            log::error!("✗ [{}] step {} '{}' failed: {}", flow.name, number, step.name, e);
                            record.outcome = StepOutcome::Failed;
                            record.artifact = self.failure_screenshot(&flow.name, number).await;
                            aborted = true;
                        }
                    }
                }
            }

            report.add_step(record);
        }

        log::info!(
            "Journey '{}' finished: {} passed, {} failed, {} skipped, {} not run",
            flow.name,
            report.passed,
            report.failed,
            report.skipped,
            report.not_run
        );

        Ok(report)
    }

    fn step_timeout(&self, step: &FlowStep) -> Duration {
        step.timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.options.default_timeout)
    }

    fn run_action<'s>(
        &'s self,
        journey: &'s str,
        number: usize,
        step: &'s FlowStep,
    ) -> BoxFuture<'s, Result<ActionOutput, FlowError>> {
        Box::pin(async move {
            let timeout = self.step_timeout(step);
            let poll = self.options.poll_interval;

            match &step.action {
                UiAction::Navigate { url } => {
                    let url = resolve_variables(url, &self.variables)?;
                    let start = Instant::now();
                    self.page.goto(&url).await?;
                    self.metrics.record_page_load(journey, &url, start.elapsed());
                    Ok(ActionOutput::default())
                }

                UiAction::Click { targets } => {
                    let matched = self
                        .first_ready(&step.action, targets, timeout, |target| async move {
                            self.page.click(target).await.map_err(FlowError::from)
                        })
                        .await?;
                    Ok(ActionOutput { matched, artifact: None })
                }

                UiAction::Fill { targets, value } => {
                    let value = resolve_variables(value, &self.variables)?;
                    let value = value.as_str();
                    let matched = self
                        .first_ready(&step.action, targets, timeout, |target| async move {
                            self.page.fill(target, value).await.map_err(FlowError::from)
                        })
                        .await?;
                    Ok(ActionOutput { matched, artifact: None })
                }

                UiAction::Press { key } => {
                    self.page.press_key(key).await?;
                    Ok(ActionOutput::default())
                }

                UiAction::WaitFor { target } => {
                    wait_until_ready(self.page, target, timeout, poll).await?;
                    Ok(ActionOutput::default())
                }

                UiAction::PickFirst { options } => {
                    let index = pick_first_available(self.page, options, timeout, poll).await?;
                    Ok(ActionOutput {
                        matched: Some(options[index].to_string()),
                        artifact: None,
                    })
                }

                UiAction::IfVisible { probe, timeout_ms, then } => {
                    let probe_timeout = timeout_ms
                        .map(Duration::from_millis)
                        .unwrap_or(self.options.probe_timeout);

                    if wait_until_ready(self.page, probe, probe_timeout, poll).await.is_err() {
                        log::debug!("[{}] probe {} absent, branch skipped", journey, probe);
                        return Ok(ActionOutput::default());
                    }

                    log::info!("[{}] probe {} present, running {} branch step(s)", journey, probe, then.len());
                    for nested in then {
                        match self.run_action(journey, number, nested).await {
                            Ok(_) => {}
                            Err(e) => {
                                step_failure(nested, e)?;
                            }
                        }
                    }
                    Ok(ActionOutput {
                        matched: Some(probe.to_string()),
                        artifact: None,
                    })
                }

                UiAction::AssertVisible { target } => {
                    wait_until_ready(self.page, target, timeout, poll)
                        .await
                        .map_err(|_| FlowError::Assertion(format!("{} is not visible", target)))?;
                    Ok(ActionOutput::default())
                }

                UiAction::AssertUrlContains { fragment } => {
                    let fragment = resolve_variables(fragment, &self.variables)?;
                    self.wait_for_url(&fragment, timeout).await?;
                    Ok(ActionOutput::default())
                }

                UiAction::EnterOtp { targets } => {
                    let provider = self.otp.ok_or_else(|| {
                        FlowError::OtpUnavailable("no mailbox configured".to_string())
                    })?;
                    let code = provider
                        .wait_for_otp(self.options.otp_timeout)
                        .await
                        .map_err(|e| FlowError::OtpUnavailable(e.to_string()))?
                        .ok_or_else(|| {
                            FlowError::OtpUnavailable(format!(
                                "no code arrived within {}s",
                                self.options.otp_timeout.as_secs()
                            ))
                        })?;
                    let code = code.as_str();
                    let matched = self
                        .first_ready(&step.action, targets, timeout, |target| async move {
                            self.page.fill(target, code).await.map_err(FlowError::from)
                        })
                        .await?;
                    Ok(ActionOutput { matched, artifact: None })
                }

                UiAction::Screenshot { name } => {
                    let Some(dir) = &self.options.artifact_dir else {
                        return Ok(ActionOutput::default());
                    };
                    let artifact =
                        artifacts::capture_screenshot(self.page, dir, journey, number, name).await?;
                    Ok(ActionOutput {
                        matched: None,
                        artifact: Some(artifact.path),
                    })
                }
            }
        })
    }

    /// Wait for each candidate to become ready and act on it, in order.
    ///
    /// The primary candidate gets the full step timeout, fallbacks only the
    /// probe timeout.
    async fn first_ready<'t, F, Fut>(
        &self,
        action: &UiAction,
        targets: &'t [Locator],
        timeout: Duration,
        act: F,
    ) -> Result<Option<String>, FlowError>
    where
        F: Fn(&'t Locator) -> Fut,
        Fut: std::future::Future<Output = Result<(), FlowError>>,
    {
        let poll = self.options.poll_interval;
        let probe_timeout = self.options.probe_timeout;
        let primary = targets.first();
        let page = self.page;
        let act = &act;

        let attempt = try_in_order(action.kind(), targets, ActionPolicy::Required, move |target| {
            let is_primary = primary.is_some_and(|p| std::ptr::eq(p, target));
            let wait = if is_primary { timeout } else { probe_timeout };
            async move {
                wait_until_ready(page, target, wait, poll).await?;
                act(target).await?;
                Ok(target.to_string())
            }
        })
        .await?;

        Ok(attempt.map(|a| a.value))
    }

    async fn wait_for_url(&self, fragment: &str, timeout: Duration) -> Result<(), FlowError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let url = self.page.current_url().await?;
            if url.contains(fragment) {
                return Ok(());
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Err(FlowError::Assertion(format!(
                    "URL '{}' does not contain '{}'",
                    url, fragment
                )));
            }
            tokio::time::sleep(self.options.poll_interval.min(deadline - now)).await;
        }
    }

    async fn failure_screenshot(&self, journey: &str, number: usize) -> Option<String> {
        let dir = self.options.artifact_dir.as_ref()?;
        match artifacts::capture_screenshot(self.page, dir, journey, number, "failure").await {
            Ok(artifact) => Some(artifact.path),
            Err(e) => {
                log::warn!("Could not capture failure screenshot: {}", e);
                None
            }
        }
    }
}

/// Apply a nested step's policy to its error
fn step_failure(step: &FlowStep, error: FlowError) -> Result<(), FlowError> {
    step.policy.apply::<()>(error).map(|_| ())
}

/// Substitute `${NAME}` placeholders
pub fn resolve_variables(
    template: &str,
    variables: &HashMap<String, String>,
) -> Result<String, FlowError> {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    let placeholder = PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder pattern is valid")
    });

    let mut resolved = String::with_capacity(template.len());
    let mut last = 0;
    for captures in placeholder.captures_iter(template) {
        let whole = captures.get(0).expect("group 0 always matches");
        let name = &captures[1];
        let value = variables
            .get(name)
            .ok_or_else(|| FlowError::MissingVariable(name.to_string()))?;
        resolved.push_str(&template[last..whole.start()]);
        resolved.push_str(value);
        last = whole.end();
    }
    resolved.push_str(&template[last..]);

    Ok(resolved)
}
