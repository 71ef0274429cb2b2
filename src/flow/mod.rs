//! Declarative journeys and the machinery that runs them.

pub mod executor;
pub mod fallback;
pub mod script;
pub mod steps;
pub mod telemetry;
pub mod validation;

pub use executor::{resolve_variables, FlowExecutor};
pub use fallback::{pick_first_available, try_in_order, wait_until_ready, ActionPolicy, Attempt};
pub use script::{shared_platform, Flow, FlowStep, JourneyReport, StepOutcome, StepRecord, UiAction};
pub use steps::{StepParseError, StepRegistry};
pub use telemetry::{MetricsCollector, RunTelemetry};
pub use validation::{
    ErrorLocation, FlowValidator, ValidationError, ValidationErrorType, ValidationResult,
};
