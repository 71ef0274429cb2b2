//! Resilient UI actions.
//!
//! Instead of nesting try/catch per call site, an action declares an ordered
//! list of candidates and a policy. `try_in_order` walks the candidates and
//! stops at the first success; when every candidate fails the policy decides
//! whether the journey aborts (`Required`) or the step is skipped (`Optional`).

use crate::browser::{Locator, PageDriver};
use crate::error::FlowError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Whether a failing action aborts the journey
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionPolicy {
    #[default]
    Required,
    Optional,
}

impl ActionPolicy {
    /// `Required` propagates the error, `Optional` logs it and yields `None`
    pub fn apply<T>(self, error: FlowError) -> Result<Option<T>, FlowError> {
        match self {
            ActionPolicy::Required => Err(error),
            ActionPolicy::Optional => {
                log::warn!("Optional action skipped: {}", error);
                Ok(None)
            }
        }
    }
}

/// The candidate that succeeded and what it produced
#[derive(Debug, Clone, PartialEq)]
pub struct Attempt<T> {
    pub index: usize,
    pub value: T,
}

/// Try each candidate in order until one succeeds.
pub async fn try_in_order<'c, C, T, F, Fut>(
    action: &str,
    candidates: &'c [C],
    policy: ActionPolicy,
    mut attempt: F,
) -> Result<Option<Attempt<T>>, FlowError>
where
    C: fmt::Display,
    F: FnMut(&'c C) -> Fut,
    Fut: Future<Output = Result<T, FlowError>>,
{
    let mut last_error = None;

    for (index, candidate) in candidates.iter().enumerate() {
        match attempt(candidate).await {
            Ok(value) => {
                if index > 0 {
                    log::info!("{}: fallback candidate {} ({}) succeeded", action, index + 1, candidate);
                }
                return Ok(Some(Attempt { index, value }));
            }
            Err(e) => {
                log::debug!("{}: candidate {} ({}) failed: {}", action, index + 1, candidate, e);
                last_error = Some(e.to_string());
            }
        }
    }

    policy.apply(FlowError::AllCandidatesFailed {
        action: action.to_string(),
        attempted: candidates.len(),
        last_error: last_error.unwrap_or_else(|| "no candidates given".to_string()),
    })
}

/// Poll a readiness predicate until it holds or `timeout` elapses.
///
/// Probe errors count as "not ready yet"; pages often reject scripts while
/// they are still navigating.
pub async fn wait_until_ready(
    page: &dyn PageDriver,
    locator: &Locator,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<(), FlowError> {
    let deadline = Instant::now() + timeout;

    loop {
        match page.is_ready(locator).await {
            Ok(true) => return Ok(()),
            Ok(false) => {}
            Err(e) => log::debug!("Readiness probe for {} failed: {}", locator, e),
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(FlowError::Timeout {
                what: locator.to_string(),
                millis: timeout.as_millis() as u64,
            });
        }
        tokio::time::sleep(poll_interval.min(deadline - now)).await;
    }
}

/// Select the first entry of a preference list that is ready.
///
/// Each pass probes the options in order and clicks the first ready one. If
/// none is ready, passes repeat until `timeout`; an option whose click fails
/// counts as unavailable. Errors only when every option has been exhausted.
pub async fn pick_first_available(
    page: &dyn PageDriver,
    options: &[Locator],
    timeout: Duration,
    poll_interval: Duration,
) -> Result<usize, FlowError> {
    let deadline = Instant::now() + timeout;

    loop {
        for (index, option) in options.iter().enumerate() {
            if !page.is_ready(option).await.unwrap_or(false) {
                continue;
            }
            match page.click(option).await {
                Ok(()) => {
                    log::info!("Picked preference {} of {}: {}", index + 1, options.len(), option);
                    return Ok(index);
                }
                Err(e) => log::debug!("Preference {} could not be selected: {}", option, e),
            }
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(FlowError::NoOptionAvailable(options.len()));
        }
        tokio::time::sleep(poll_interval.min(deadline - now)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_first_success_stops_iteration() {
        let calls = AtomicUsize::new(0);
        let candidates = ["#a", "#b", "#c"];

        let result = try_in_order("click", &candidates, ActionPolicy::Required, |c| {
            calls.fetch_add(1, Ordering::SeqCst);
            let ok = *c == "#b";
            async move {
                if ok {
                    Ok(c.len())
                } else {
                    Err(FlowError::Assertion(format!("{} missing", c)))
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(result, Some(Attempt { index: 1, value: 2 }));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_required_failure_reports_last_error() {
        let candidates = ["#a", "#b"];
        let err = try_in_order("fill", &candidates, ActionPolicy::Required, |c| async move {
            Err::<(), _>(FlowError::Assertion(format!("{} missing", c)))
        })
        .await
        .unwrap_err();

        match err {
            FlowError::AllCandidatesFailed {
                action,
                attempted,
                last_error,
            } => {
                assert_eq!(action, "fill");
                assert_eq!(attempted, 2);
                assert!(last_error.contains("#b missing"));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_optional_failure_is_skipped() {
        let candidates = ["#continue"];
        let result = try_in_order("click", &candidates, ActionPolicy::Optional, |_| async {
            Err::<(), _>(FlowError::Assertion("not present".to_string()))
        })
        .await
        .unwrap();

        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn test_empty_candidates_fail_required() {
        let candidates: [&str; 0] = [];
        let result = try_in_order("click", &candidates, ActionPolicy::Required, |_| async {
            Ok::<(), FlowError>(())
        })
        .await;
        assert!(result.is_err());
    }
}
