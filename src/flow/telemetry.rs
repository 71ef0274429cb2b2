//! Per-run timing telemetry.
//!
//! A `MetricsCollector` is created for each run, handed to every executor of
//! that run, and flushed into a `RunTelemetry` summary when the run ends.

use serde::Serialize;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PageLoad {
    pub journey: String,
    pub url: String,
    pub millis: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StepTiming {
    pub journey: String,
    pub step: String,
    pub millis: u64,
}

/// Summary produced by `MetricsCollector::flush`
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct RunTelemetry {
    pub page_loads: Vec<PageLoad>,
    pub step_timings: Vec<StepTiming>,
    pub average_page_load_ms: u64,
    pub slowest_page_load: Option<PageLoad>,
    pub average_step_ms: u64,
}

#[derive(Debug, Default)]
pub struct MetricsCollector {
    inner: Mutex<Collected>,
}

#[derive(Debug, Default)]
struct Collected {
    page_loads: Vec<PageLoad>,
    step_timings: Vec<StepTiming>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_page_load(&self, journey: &str, url: &str, elapsed: Duration) {
        let load = PageLoad {
            journey: journey.to_string(),
            url: url.to_string(),
            millis: elapsed.as_millis() as u64,
        };
        log::debug!("Page load {} took {}ms", load.url, load.millis);
        self.lock().page_loads.push(load);
    }

    pub fn record_step(&self, journey: &str, step: &str, elapsed: Duration) {
        self.lock().step_timings.push(StepTiming {
            journey: journey.to_string(),
            step: step.to_string(),
            millis: elapsed.as_millis() as u64,
        });
    }

    /// Drain everything collected so far into a summary
    pub fn flush(&self) -> RunTelemetry {
        let collected = std::mem::take(&mut *self.lock());

        let average_page_load_ms = average(collected.page_loads.iter().map(|l| l.millis));
        let average_step_ms = average(collected.step_timings.iter().map(|s| s.millis));
        let slowest_page_load = collected
            .page_loads
            .iter()
            .max_by_key(|l| l.millis)
            .cloned();

        RunTelemetry {
            page_loads: collected.page_loads,
            step_timings: collected.step_timings,
            average_page_load_ms,
            slowest_page_load,
            average_step_ms,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Collected> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn average(values: impl Iterator<Item = u64>) -> u64 {
    let (sum, count) = values.fold((0u64, 0u64), |(s, c), v| (s + v, c + 1));
    if count == 0 {
        0
    } else {
        sum / count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flush_summarises_and_resets() {
        let metrics = MetricsCollector::new();
        metrics.record_page_load("Home", "https://shop/", Duration::from_millis(300));
        metrics.record_page_load("Home", "https://shop/cart", Duration::from_millis(900));
        metrics.record_step("Home", "Open", Duration::from_millis(100));

        let telemetry = metrics.flush();
        assert_eq!(telemetry.page_loads.len(), 2);
        assert_eq!(telemetry.average_page_load_ms, 600);
        assert_eq!(
            telemetry.slowest_page_load.map(|l| l.url),
            Some("https://shop/cart".to_string())
        );
        assert_eq!(telemetry.average_step_ms, 100);

        assert_eq!(metrics.flush(), RunTelemetry::default());
    }
}
