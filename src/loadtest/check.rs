//! Named response checks.
//!
//! A check is a boolean assertion about one response. Evaluating it records
//! the outcome into the [`MetricSink`] (per-check tally plus the `checks`
//! rate) and hands back an immutable [`CheckResult`] so the calling step can
//! react, e.g. by feeding the custom `errors` metric. A failing check is an
//! ordinary outcome, never an error.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::loadtest::metrics::MetricSink;

/// Predicate evaluated against a [`ResponseView`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Check {
    /// Passes when a response arrived with one of the listed status codes.
    StatusIn(&'static [u16]),
    /// Passes when the attempt took strictly less than the bound.
    LatencyBelow(Duration),
}

/// What a check is allowed to look at: the status (if any) and the elapsed time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseView {
    /// `None` when the request failed at the transport level.
    pub status: Option<u16>,
    pub elapsed: Duration,
}

/// Value a check observed when it was evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Observed {
    Status(u16),
    Latency(Duration),
    NoResponse,
}

impl fmt::Display for Observed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Status(code) => write!(f, "status {code}"),
            Self::Latency(elapsed) => write!(f, "{:.1}ms", elapsed.as_secs_f64() * 1000.0),
            Self::NoResponse => f.write_str("no response"),
        }
    }
}

/// Immutable record of one evaluated check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    pub observed: Observed,
}

impl Check {
    fn evaluate(&self, response: &ResponseView) -> (bool, Observed) {
        match self {
            Self::StatusIn(expected) => match response.status {
                Some(code) => (expected.contains(&code), Observed::Status(code)),
                None => (false, Observed::NoResponse),
            },
            Self::LatencyBelow(bound) => (
                response.elapsed < *bound,
                Observed::Latency(response.elapsed),
            ),
        }
    }
}

/// Evaluates `predicate` against `response`, records the outcome under
/// `name`, and returns the result.
pub fn check(sink: &MetricSink, name: &str, predicate: &Check, response: &ResponseView) -> CheckResult {
    let (passed, observed) = predicate.evaluate(response);
    sink.record_check(name, passed);
    CheckResult {
        name: name.to_string(),
        passed,
        observed,
    }
}

/// Evaluates a group of named checks in order against the same response.
pub fn check_all(
    sink: &MetricSink,
    checks: &[(&str, Check)],
    response: &ResponseView,
) -> Vec<CheckResult> {
    checks
        .iter()
        .map(|(name, predicate)| check(sink, name, predicate, response))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loadtest::metrics::CHECKS;

    fn view(status: Option<u16>, ms: u64) -> ResponseView {
        ResponseView {
            status,
            elapsed: Duration::from_millis(ms),
        }
    }

    #[test]
    fn test_status_check_passes_on_expected_code() {
        let sink = MetricSink::new();
        let result = check(&sink, "upload status is 202", &Check::StatusIn(&[202]), &view(Some(202), 5));
        assert!(result.passed);
        assert_eq!(result.observed, Observed::Status(202));
    }

    #[test]
    fn test_status_check_accepts_any_listed_code() {
        let sink = MetricSink::new();
        let predicate = Check::StatusIn(&[200, 202]);
        assert!(check(&sink, "poll", &predicate, &view(Some(200), 1)).passed);
        assert!(check(&sink, "poll", &predicate, &view(Some(202), 1)).passed);
        assert!(!check(&sink, "poll", &predicate, &view(Some(404), 1)).passed);
    }

    #[test]
    fn test_status_check_fails_without_response() {
        let sink = MetricSink::new();
        let result = check(&sink, "group status is 202", &Check::StatusIn(&[202]), &view(None, 3));
        assert!(!result.passed);
        assert_eq!(result.observed, Observed::NoResponse);
    }

    #[test]
    fn test_latency_check_is_strict() {
        let sink = MetricSink::new();
        let predicate = Check::LatencyBelow(Duration::from_millis(1000));
        assert!(check(&sink, "lat", &predicate, &view(Some(202), 999)).passed);
        assert!(!check(&sink, "lat", &predicate, &view(Some(202), 1000)).passed);
    }

    #[test]
    fn test_check_records_into_sink() {
        let sink = MetricSink::new();
        let results = check_all(
            &sink,
            &[
                ("upload status is 202", Check::StatusIn(&[202])),
                (
                    "upload response time < 2000ms",
                    Check::LatencyBelow(Duration::from_millis(2000)),
                ),
            ],
            &view(Some(500), 10),
        );
        assert_eq!(results.len(), 2);
        assert!(!results[0].passed);
        assert!(results[1].passed);

        let snap = sink.snapshot();
        assert_eq!(snap.check("upload status is 202").unwrap().fails, 1);
        assert_eq!(snap.check("upload response time < 2000ms").unwrap().passes, 1);
        let checks = snap.rate_value(CHECKS).unwrap();
        assert_eq!((checks.trues, checks.total), (1, 2));
    }

    #[test]
    fn test_observed_display() {
        assert_eq!(Observed::Status(202).to_string(), "status 202");
        assert_eq!(Observed::NoResponse.to_string(), "no response");
        assert_eq!(
            Observed::Latency(Duration::from_micros(1500)).to_string(),
            "1.5ms"
        );
    }
}
