//! Natural-language step binding.
//!
//! `.feature` files are turned into the same `Flow`s the JSON layer uses; each
//! phrase only maps its quoted arguments onto a `UiAction`. Adding
//! " if present" to a step makes it optional.

use super::fallback::ActionPolicy;
use super::script::{Flow, FlowStep, UiAction};
use crate::browser::Locator;
use crate::reporting::model::Platform;
use regex::Regex;
use std::fmt;

type Builder = fn(&[String]) -> Result<UiAction, String>;

struct Binding {
    pattern: Regex,
    builder: Builder,
}

/// Error from parsing a feature file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepParseError {
    pub line: usize,
    pub message: String,
}

impl fmt::Display for StepParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for StepParseError {}

/// Phrase-to-action bindings
pub struct StepRegistry {
    bindings: Vec<Binding>,
    quoted: Regex,
}

impl Default for StepRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StepRegistry {
    /// Registry with the built-in phrases
    pub fn new() -> Self {
        let mut registry = Self {
            bindings: Vec::new(),
            quoted: Regex::new(r#""([^"]*)""#).expect("quoted-argument pattern is valid"),
        };

        registry.bind(r#"^I (?:open|navigate to|go to) ""#, |args| {
            Ok(UiAction::Navigate { url: first(args)? })
        });
        registry.bind(r#"^I click (?:on )?""#, |args| {
            Ok(UiAction::Click { targets: locators(args)? })
        });
        registry.bind(r#"^I (?:fill|type into) ".*" with ""#, |args| {
            let (value, targets) = args.split_last().ok_or("missing value")?;
            Ok(UiAction::Fill {
                targets: locators(targets)?,
                value: value.clone(),
            })
        });
        registry.bind(r#"^I press ""#, |args| Ok(UiAction::Press { key: first(args)? }));
        registry.bind(r#"^I wait for ""#, |args| {
            Ok(UiAction::WaitFor { target: locator(&first(args)?)? })
        });
        registry.bind(r#"^I pick the first available (?:of|from) ""#, |args| {
            Ok(UiAction::PickFirst { options: locators(args)? })
        });
        registry.bind(r#"^I should see ""#, |args| {
            Ok(UiAction::AssertVisible { target: locator(&first(args)?)? })
        });
        registry.bind(r#"^the URL should contain ""#, |args| {
            Ok(UiAction::AssertUrlContains { fragment: first(args)? })
        });
        registry.bind(r#"^I enter the OTP (?:into|in) ""#, |args| {
            Ok(UiAction::EnterOtp { targets: locators(args)? })
        });
        registry.bind(r#"^I take a screenshot ""#, |args| {
            Ok(UiAction::Screenshot { name: first(args)? })
        });

        registry
    }

    /// Register an extra phrase. The pattern is matched against the step text
    /// without its keyword; quoted arguments are passed to `builder` in order.
    pub fn bind(&mut self, pattern: &str, builder: Builder) {
        match Regex::new(pattern) {
            Ok(pattern) => self.bindings.push(Binding { pattern, builder }),
            Err(e) => log::error!("Ignoring invalid step pattern {}: {}", pattern, e),
        }
    }

    /// Map one step sentence (keyword already removed) to a flow step
    pub fn resolve(&self, text: &str) -> Result<FlowStep, String> {
        let (text, policy) = match text.strip_suffix(" if present") {
            Some(rest) => (rest.trim_end(), ActionPolicy::Optional),
            None => (text, ActionPolicy::Required),
        };

        let binding = self
            .bindings
            .iter()
            .find(|b| b.pattern.is_match(text))
            .ok_or_else(|| format!("no step definition matches \"{}\"", text))?;

        let args: Vec<String> = self
            .quoted
            .captures_iter(text)
            .map(|c| c[1].to_string())
            .collect();

        Ok(FlowStep {
            name: text.to_string(),
            category: None,
            policy,
            timeout_ms: None,
            action: (binding.builder)(&args)?,
        })
    }

    /// Parse a feature file into one flow per scenario.
    ///
    /// Supports `Feature:`, `Scenario:`, `Given/When/Then/And/But`, `#`
    /// comments, `@platform:<name>` and `@category:<name>` tags on the line
    /// before a scenario or step.
    pub fn parse_feature(&self, source: &str) -> Result<Vec<Flow>, StepParseError> {
        let mut flows: Vec<Flow> = Vec::new();
        let mut feature = String::new();
        let mut pending_tags: Vec<String> = Vec::new();

        for (i, raw) in source.lines().enumerate() {
            let line_no = i + 1;
            let line = raw.trim();

            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if line.starts_with('@') {
                pending_tags.extend(line.split_whitespace().map(|t| t.trim_start_matches('@').to_string()));
                continue;
            }

            if let Some(name) = line.strip_prefix("Feature:") {
                feature = name.trim().to_string();
                pending_tags.clear();
                continue;
            }

            if let Some(name) = line.strip_prefix("Scenario:") {
                let tags = std::mem::take(&mut pending_tags);
                let platform = tags
                    .iter()
                    .find_map(|t| t.strip_prefix("platform:"))
                    .map(Platform::from_system)
                    .unwrap_or_default();

                flows.push(Flow {
                    name: name.trim().to_string(),
                    description: feature.clone(),
                    journey_number: Some(flows.len() as u32 + 1),
                    platform,
                    tags: tags.into_iter().filter(|t| !t.contains(':')).collect(),
                    steps: Vec::new(),
                });
                continue;
            }

            let Some(text) = strip_keyword(line) else {
                return Err(StepParseError {
                    line: line_no,
                    message: format!("unexpected line \"{}\"", line),
                });
            };

            let flow = flows.last_mut().ok_or_else(|| StepParseError {
                line: line_no,
                message: "step outside of a scenario".to_string(),
            })?;

            let mut step = self
                .resolve(text)
                .map_err(|message| StepParseError { line: line_no, message })?;
            step.category = std::mem::take(&mut pending_tags)
                .into_iter()
                .find_map(|t| t.strip_prefix("category:").map(str::to_string));
            flow.steps.push(step);
        }

        Ok(flows)
    }
}

fn strip_keyword(line: &str) -> Option<&str> {
    ["Given ", "When ", "Then ", "And ", "But ", "* "]
        .iter()
        .find_map(|keyword| line.strip_prefix(keyword))
        .map(str::trim)
}

fn first(args: &[String]) -> Result<String, String> {
    args.first().cloned().ok_or_else(|| "missing quoted argument".to_string())
}

fn locator(arg: &str) -> Result<Locator, String> {
    arg.parse()
}

fn locators(args: &[String]) -> Result<Vec<Locator>, String> {
    if args.is_empty() {
        return Err("missing quoted locator".to_string());
    }
    args.iter().map(|a| locator(a)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_click_with_fallbacks() {
        let registry = StepRegistry::new();
        let step = registry
            .resolve(r##"I click "#checkout" or "text=Proceed to checkout""##)
            .unwrap();

        assert_eq!(step.policy, ActionPolicy::Required);
        match step.action {
            UiAction::Click { targets } => assert_eq!(
                targets,
                vec![Locator::css("#checkout"), Locator::text("Proceed to checkout")]
            ),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_resolve_fill_and_optional() {
        let registry = StepRegistry::new();
        let step = registry
            .resolve(r#"I fill "input[name=email]" with "${EMAIL}""#)
            .unwrap();
        match step.action {
            UiAction::Fill { targets, value } => {
                assert_eq!(targets, vec![Locator::css("input[name=email]")]);
                assert_eq!(value, "${EMAIL}");
            }
            other => panic!("unexpected {:?}", other),
        }

        let optional = registry.resolve(r#"I click "text=Continue" if present"#).unwrap();
        assert_eq!(optional.policy, ActionPolicy::Optional);
        assert_eq!(optional.name, r#"I click "text=Continue""#);
    }

    #[test]
    fn test_unknown_phrase() {
        let registry = StepRegistry::new();
        let err = registry.resolve("I dance").unwrap_err();
        assert!(err.contains("no step definition"));
    }

    #[test]
    fn test_parse_feature() {
        let source = r##"
Feature: International delivery

  @platform:desktop @smoke
  Scenario: Send flowers abroad
    Given I open "${BASE_URL}/international"
    @category:delivery
    When I pick the first available of "[data-day='15']", "[data-day='20']", "[data-day='25']"
    And I click "text=Accept cookies" if present
    Then I should see "text=Order summary"

  Scenario: Login with OTP
    Given I open "${BASE_URL}/login"
    When I fill "#email" with "${EMAIL}"
    And I enter the OTP into "#otp"
    Then the URL should contain "/account"
"##;

        let flows = StepRegistry::new().parse_feature(source).unwrap();
        assert_eq!(flows.len(), 2);

        let first = &flows[0];
        assert_eq!(first.name, "Send flowers abroad");
        assert_eq!(first.description, "International delivery");
        assert_eq!(first.platform, Platform::Desktop);
        assert_eq!(first.tags, vec!["smoke".to_string()]);
        assert_eq!(first.steps.len(), 4);
        assert_eq!(first.steps[1].category.as_deref(), Some("delivery"));
        match &first.steps[1].action {
            UiAction::PickFirst { options } => assert_eq!(options.len(), 3),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(first.steps[2].policy, ActionPolicy::Optional);

        assert_eq!(flows[1].journey_number, Some(2));
        assert!(matches!(flows[1].steps[2].action, UiAction::EnterOtp { .. }));
    }

    #[test]
    fn test_step_outside_scenario() {
        let err = StepRegistry::new()
            .parse_feature("Feature: x\nGiven I open \"https://a.test\"\n")
            .unwrap_err();
        assert_eq!(err.line, 2);
    }
}
