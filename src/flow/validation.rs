//! Journey Flow Validation
//!
//! Checks flows before a browser is launched so a typo in a flow file fails in
//! milliseconds instead of after a minute of clicking.

use super::script::{Flow, FlowStep, UiAction};
use crate::browser::chrome::normalize_url;
use crate::browser::Locator;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Detailed validation error with location information
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationError {
    pub error_type: ValidationErrorType,

    pub message: String,

    pub location: ErrorLocation,

    /// Suggestion for fixing the error
    pub suggestion: Option<String>,
}

/// Types of validation errors
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ValidationErrorType {
    /// JSON syntax error
    JsonSyntax,

    /// Missing required field
    MissingField,

    /// Invalid field value
    InvalidValue,

    /// Unknown action type
    UnknownAction,

    /// Action without the locators or values it needs
    MissingParameter,

    /// JSON is well-formed but does not describe a flow
    InvalidStructure,
}

/// Location information for errors
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorLocation {
    /// Top-level step index (0-based) if the error is inside a step
    pub step_index: Option<usize>,

    /// Field path (e.g., "steps[2].action.then[0].action.targets")
    pub field_path: String,

    /// Line number in JSON (if available)
    pub line: Option<usize>,

    /// Column number in JSON (if available)
    pub column: Option<usize>,
}

/// Result of validation with all errors found
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,

    pub errors: Vec<ValidationError>,

    /// Non-blocking issues
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn success() -> Self {
        Self {
            is_valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
        self.is_valid = false;
    }

    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }
}

#[derive(Debug, Default)]
pub struct FlowValidator;

impl FlowValidator {
    pub fn new() -> Self {
        Self
    }

    /// Validate a flow from its JSON text
    pub fn validate_json(&self, json: &str) -> ValidationResult {
        let mut result = ValidationResult::success();

        let flow: Flow = match serde_json::from_str(json) {
            Ok(flow) => flow,
            Err(e) => {
                let message = e.to_string();
                let (error_type, suggestion) = if message.contains("unknown variant") {
                    (
                        ValidationErrorType::UnknownAction,
                        "Supported action types: navigate, click, fill, press, wait_for, \
                         pick_first, if_visible, assert_visible, assert_url_contains, \
                         enter_otp, screenshot",
                    )
                } else if e.is_data() {
                    (
                        ValidationErrorType::InvalidStructure,
                        "A flow needs a name and a list of steps, each with a name and an action",
                    )
                } else {
                    (
                        ValidationErrorType::JsonSyntax,
                        "Check for missing commas, brackets, or quotes",
                    )
                };

                result.add_error(ValidationError {
                    error_type,
                    message: format!("Could not parse flow: {}", message),
                    location: ErrorLocation {
                        step_index: None,
                        field_path: String::new(),
                        line: Some(e.line()),
                        column: Some(e.column()),
                    },
                    suggestion: Some(suggestion.to_string()),
                });
                return result;
            }
        };

        self.validate_flow(&flow, &mut result);
        result
    }

    /// Validate a parsed flow
    pub fn validate_flow(&self, flow: &Flow, result: &mut ValidationResult) {
        if flow.name.trim().is_empty() {
            result.add_error(error(
                ValidationErrorType::MissingField,
                "Flow name is required and cannot be empty".to_string(),
                None,
                "name".to_string(),
                "Use the journey name shown on the dashboard, e.g. \"Coupon Testing\"",
            ));
        }

        if flow.description.trim().is_empty() {
            result.add_warning(format!("Flow '{}' has no description", flow.name));
        }

        if flow.steps.is_empty() {
            result.add_error(error(
                ValidationErrorType::MissingField,
                "Flow must contain at least one step".to_string(),
                None,
                "steps".to_string(),
                "Add at least one step",
            ));
            return;
        }

        for (index, step) in flow.steps.iter().enumerate() {
            self.validate_step(step, index, &format!("steps[{}]", index), result);
        }
    }

    fn validate_step(
        &self,
        step: &FlowStep,
        index: usize,
        path: &str,
        result: &mut ValidationResult,
    ) {
        if step.name.trim().is_empty() {
            result.add_error(error(
                ValidationErrorType::MissingField,
                format!("Step at {} has no name", path),
                Some(index),
                format!("{}.name", path),
                "Name every step; names are what the dashboard shows",
            ));
        }

        if step.timeout_ms == Some(0) {
            result.add_error(error(
                ValidationErrorType::InvalidValue,
                format!("Step '{}' has a zero timeout", step.name),
                Some(index),
                format!("{}.timeout_ms", path),
                "Remove timeout_ms to use the default, or give a positive value",
            ));
        }

        let action_path = format!("{}.action", path);
        match &step.action {
            UiAction::Navigate { url } => {
                let is_templated = url.contains("${");
                if url.trim().is_empty() {
                    result.add_error(missing(&step.name, index, &action_path, "url"));
                } else if !is_templated && reqwest::Url::parse(&normalize_url(url)).is_err() {
                    result.add_error(error(
                        ValidationErrorType::InvalidValue,
                        format!("Step '{}' navigates to an invalid URL '{}'", step.name, url),
                        Some(index),
                        format!("{}.url", action_path),
                        "Use an absolute URL or a ${BASE_URL} placeholder",
                    ));
                }
            }
            UiAction::Click { targets } | UiAction::EnterOtp { targets } => {
                self.validate_candidates(&step.name, targets, index, &action_path, "targets", result);
            }
            UiAction::Fill { targets, .. } => {
                self.validate_candidates(&step.name, targets, index, &action_path, "targets", result);
            }
            UiAction::PickFirst { options } => {
                self.validate_candidates(&step.name, options, index, &action_path, "options", result);
                if options.len() == 1 {
                    result.add_warning(format!(
                        "Step '{}' picks from a single option; a click would read better",
                        step.name
                    ));
                }
            }
            UiAction::Press { key } => {
                if key.trim().is_empty() {
                    result.add_error(missing(&step.name, index, &action_path, "key"));
                }
            }
            UiAction::IfVisible { then, .. } => {
                if then.is_empty() {
                    result.add_warning(format!(
                        "Step '{}' probes for an element but has no branch steps",
                        step.name
                    ));
                }
                for (nested_index, nested) in then.iter().enumerate() {
                    let nested_path = format!("{}.then[{}]", action_path, nested_index);
                    self.validate_step(nested, index, &nested_path, result);
                }
            }
            UiAction::AssertUrlContains { fragment } => {
                if fragment.is_empty() {
                    result.add_error(missing(&step.name, index, &action_path, "fragment"));
                }
            }
            UiAction::Screenshot { name } => {
                if name.trim().is_empty() {
                    result.add_error(missing(&step.name, index, &action_path, "name"));
                }
            }
            UiAction::WaitFor { .. } | UiAction::AssertVisible { .. } => {}
        }
    }

    fn validate_candidates(
        &self,
        step_name: &str,
        candidates: &[Locator],
        index: usize,
        action_path: &str,
        field: &str,
        result: &mut ValidationResult,
    ) {
        if candidates.is_empty() {
            result.add_error(missing(step_name, index, action_path, field));
            return;
        }

        let mut seen = HashSet::new();
        for candidate in candidates {
            if !seen.insert(candidate) {
                result.add_warning(format!(
                    "Step '{}' lists {} more than once",
                    step_name, candidate
                ));
            }
        }
    }
}

fn error(
    error_type: ValidationErrorType,
    message: String,
    step_index: Option<usize>,
    field_path: String,
    suggestion: &str,
) -> ValidationError {
    ValidationError {
        error_type,
        message,
        location: ErrorLocation {
            step_index,
            field_path,
            line: None,
            column: None,
        },
        suggestion: Some(suggestion.to_string()),
    }
}

fn missing(step_name: &str, index: usize, action_path: &str, field: &str) -> ValidationError {
    error(
        ValidationErrorType::MissingParameter,
        format!("Step '{}' is missing '{}'", step_name, field),
        Some(index),
        format!("{}.{}", action_path, field),
        &format!("Add a non-empty '{}'", field),
    )
}
