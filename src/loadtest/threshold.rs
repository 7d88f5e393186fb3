//! Pass/fail threshold predicates over aggregated metrics.
//!
//! A threshold is written as `<aggregate><op><bound>`, e.g. `p(95)<1000`,
//! `rate<0.01` or `count>=100`. Aggregates:
//!
//! | aggregate | metric kinds     | value                         |
//! |-----------|------------------|-------------------------------|
//! | `p(N)`    | trend            | N-th percentile, milliseconds |
//! | `avg`, `min`, `max`, `med` | trend | milliseconds        |
//! | `rate`    | rate             | true-count / total            |
//! | `count`   | trend, counter   | number of samples / value     |
//!
//! [`evaluate`] is a pure function of the snapshot: the same inputs always
//! produce the same [`RunVerdict`].

use std::fmt;

use serde::Serialize;

use crate::loadtest::error::LoadTestError;
use crate::loadtest::metrics::{MetricKind, MetricValue, MetricsSnapshot};

/// Statistic a threshold reads from its metric.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Aggregate {
    Percentile(f64),
    Avg,
    Min,
    Max,
    Med,
    Rate,
    Count,
}

impl Aggregate {
    /// Whether this aggregate can be computed for a metric of `kind`.
    pub fn applies_to(&self, kind: MetricKind) -> bool {
        match self {
            Self::Percentile(_) | Self::Avg | Self::Min | Self::Max | Self::Med => {
                kind == MetricKind::Trend
            }
            Self::Rate => kind == MetricKind::Rate,
            Self::Count => matches!(kind, MetricKind::Trend | MetricKind::Counter),
        }
    }

    fn parse(text: &str) -> Option<Self> {
        match text {
            "avg" => Some(Self::Avg),
            "min" => Some(Self::Min),
            "max" => Some(Self::Max),
            "med" => Some(Self::Med),
            "rate" => Some(Self::Rate),
            "count" => Some(Self::Count),
            _ => {
                let inner = text.strip_prefix("p(")?.strip_suffix(')')?;
                let p: f64 = inner.trim().parse().ok()?;
                (0.0..=100.0).contains(&p).then_some(Self::Percentile(p))
            }
        }
    }

    /// Reads the aggregate from a metric value. `None` if the kinds don't match.
    fn read(&self, value: &MetricValue) -> Option<f64> {
        match (self, value) {
            (Self::Percentile(p), MetricValue::Trend(t)) => Some(t.percentile_ms(*p)),
            (Self::Avg, MetricValue::Trend(t)) => Some(t.avg_ms()),
            (Self::Min, MetricValue::Trend(t)) => Some(t.min_ms()),
            (Self::Max, MetricValue::Trend(t)) => Some(t.max_ms()),
            (Self::Med, MetricValue::Trend(t)) => Some(t.med_ms()),
            (Self::Count, MetricValue::Trend(t)) => Some(t.count() as f64),
            (Self::Count, MetricValue::Counter(c)) => Some(*c as f64),
            (Self::Rate, MetricValue::Rate(r)) => Some(r.rate()),
            _ => None,
        }
    }
}

impl fmt::Display for Aggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Percentile(p) => write!(f, "p({p})"),
            Self::Avg => f.write_str("avg"),
            Self::Min => f.write_str("min"),
            Self::Max => f.write_str("max"),
            Self::Med => f.write_str("med"),
            Self::Rate => f.write_str("rate"),
            Self::Count => f.write_str("count"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl Comparison {
    // Two-character operators first so `<=` is not read as `<`.
    const OPERATORS: [(&'static str, Comparison); 7] = [
        ("<=", Comparison::Le),
        (">=", Comparison::Ge),
        ("==", Comparison::Eq),
        ("!=", Comparison::Ne),
        ("<", Comparison::Lt),
        (">", Comparison::Gt),
        ("=", Comparison::Eq),
    ];

    pub fn holds(&self, observed: f64, bound: f64) -> bool {
        match self {
            Self::Lt => observed < bound,
            Self::Le => observed <= bound,
            Self::Gt => observed > bound,
            Self::Ge => observed >= bound,
            Self::Eq => observed == bound,
            Self::Ne => observed != bound,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Eq => "==",
            Self::Ne => "!=",
        }
    }
}

/// One parsed threshold bound to a metric name.
#[derive(Debug, Clone, PartialEq)]
pub struct Threshold {
    metric: String,
    source: String,
    aggregate: Aggregate,
    comparison: Comparison,
    bound: f64,
}

impl Threshold {
    /// Parses an expression such as `p(95)<1000` for `metric`.
    pub fn parse(metric: &str, expression: &str) -> Result<Self, LoadTestError> {
        let invalid = |why: &str| {
            LoadTestError::validation(format!(
                "Invalid threshold '{expression}' for metric '{metric}': {why}"
            ))
        };

        let compact: String = expression.chars().filter(|c| !c.is_whitespace()).collect();
        let (pos, symbol, comparison) = Comparison::OPERATORS
            .iter()
            .filter_map(|(symbol, cmp)| compact.find(symbol).map(|pos| (pos, *symbol, *cmp)))
            .min_by_key(|(pos, symbol, _)| (*pos, std::cmp::Reverse(symbol.len())))
            .ok_or_else(|| invalid("missing comparison operator"))?;

        let (lhs, rhs) = (&compact[..pos], &compact[pos + symbol.len()..]);
        let aggregate = Aggregate::parse(lhs)
            .ok_or_else(|| invalid(&format!("unknown aggregate '{lhs}'")))?;
        let bound: f64 = rhs
            .parse()
            .map_err(|_| invalid(&format!("bound '{rhs}' is not a number")))?;
        if !bound.is_finite() {
            return Err(invalid("bound must be finite"));
        }

        Ok(Self {
            metric: metric.to_string(),
            source: expression.trim().to_string(),
            aggregate,
            comparison,
            bound,
        })
    }

    pub fn metric(&self) -> &str {
        &self.metric
    }

    /// The expression as written in the config.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn aggregate(&self) -> Aggregate {
        self.aggregate
    }

    pub fn comparison(&self) -> Comparison {
        self.comparison
    }

    pub fn bound(&self) -> f64 {
        self.bound
    }

    /// Value this threshold reads from the snapshot, `None` if the metric is
    /// absent or of the wrong kind.
    pub fn observe(&self, snapshot: &MetricsSnapshot) -> Option<f64> {
        self.aggregate.read(snapshot.get(&self.metric)?)
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.metric, self.source)
    }
}

/// Result of evaluating one threshold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThresholdOutcome {
    pub metric: String,
    pub expression: String,
    /// `None` when the metric was never declared.
    pub observed: Option<f64>,
    pub passed: bool,
}

/// Overall pass/fail decision for a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunVerdict {
    pub passed: bool,
    pub outcomes: Vec<ThresholdOutcome>,
}

impl RunVerdict {
    pub fn violated(&self) -> impl Iterator<Item = &ThresholdOutcome> {
        self.outcomes.iter().filter(|o| !o.passed)
    }
}

/// Evaluates every threshold against the final snapshot.
///
/// A threshold whose metric is missing fails. Empty metrics evaluate as 0.
/// The run passes only if every threshold holds (an empty set passes).
pub fn evaluate(thresholds: &[Threshold], snapshot: &MetricsSnapshot) -> RunVerdict {
    let outcomes: Vec<ThresholdOutcome> = thresholds
        .iter()
        .map(|threshold| {
            let observed = threshold.observe(snapshot);
            let passed = observed
                .is_some_and(|value| threshold.comparison.holds(value, threshold.bound));
            ThresholdOutcome {
                metric: threshold.metric.clone(),
                expression: threshold.source.clone(),
                observed,
                passed,
            }
        })
        .collect();

    RunVerdict {
        passed: outcomes.iter().all(|o| o.passed),
        outcomes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loadtest::metrics::{MetricSink, ERRORS, HTTP_REQS, HTTP_REQ_DURATION};
    use std::time::Duration;

    fn sink_with_latencies(ms: &[u64]) -> MetricSink {
        let sink = MetricSink::with_builtin_metrics();
        for &m in ms {
            sink.add_trend(HTTP_REQ_DURATION, Duration::from_millis(m));
        }
        sink
    }

    #[test]
    fn test_parse_percentile() {
        let t = Threshold::parse("http_req_duration", "p(95)<1000").unwrap();
        assert_eq!(t.aggregate(), Aggregate::Percentile(95.0));
        assert_eq!(t.comparison(), Comparison::Lt);
        assert_eq!(t.bound(), 1000.0);
        assert_eq!(t.source(), "p(95)<1000");
        assert_eq!(t.to_string(), "http_req_duration: p(95)<1000");
    }

    #[test]
    fn test_parse_two_char_operators_and_spaces() {
        let t = Threshold::parse("errors", " rate <= 0.05 ").unwrap();
        assert_eq!(t.aggregate(), Aggregate::Rate);
        assert_eq!(t.comparison(), Comparison::Le);
        assert!((t.bound() - 0.05).abs() < f64::EPSILON);

        let t = Threshold::parse("http_reqs", "count>=10").unwrap();
        assert_eq!(t.comparison(), Comparison::Ge);

        let t = Threshold::parse("http_req_duration", "p(99.9)!=0").unwrap();
        assert_eq!(t.aggregate(), Aggregate::Percentile(99.9));
        assert_eq!(t.comparison(), Comparison::Ne);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for bad in ["", "p(95)", "p(95)<", "p(101)<5", "mean<5", "rate<abc", "<5", "rate<inf"] {
            assert!(
                Threshold::parse("x", bad).is_err(),
                "expected '{bad}' to be rejected"
            );
        }
    }

    #[test]
    fn test_applies_to() {
        assert!(Aggregate::Percentile(95.0).applies_to(MetricKind::Trend));
        assert!(!Aggregate::Percentile(95.0).applies_to(MetricKind::Rate));
        assert!(Aggregate::Rate.applies_to(MetricKind::Rate));
        assert!(!Aggregate::Rate.applies_to(MetricKind::Counter));
        assert!(Aggregate::Count.applies_to(MetricKind::Counter));
        assert!(Aggregate::Count.applies_to(MetricKind::Trend));
    }

    #[test]
    fn test_evaluate_pass_and_fail() {
        let sink = sink_with_latencies(&[100, 200, 300, 400, 1500]);
        sink.add_rate(ERRORS, false);
        let snap = sink.snapshot();

        let thresholds = vec![
            Threshold::parse(HTTP_REQ_DURATION, "p(50)<1000").unwrap(),
            Threshold::parse(HTTP_REQ_DURATION, "max<1000").unwrap(),
            Threshold::parse(ERRORS, "rate<0.01").unwrap(),
        ];
        let verdict = evaluate(&thresholds, &snap);
        assert!(!verdict.passed);
        let violated: Vec<_> = verdict.violated().map(|o| o.expression.as_str()).collect();
        assert_eq!(violated, vec!["max<1000"]);
        assert!(verdict.outcomes[0].passed);
        assert!(verdict.outcomes[2].passed);
    }

    #[test]
    fn test_empty_metrics_evaluate_as_zero() {
        let snap = MetricSink::with_builtin_metrics().snapshot();
        let thresholds = vec![
            Threshold::parse(HTTP_REQ_DURATION, "p(95)<1000").unwrap(),
            Threshold::parse(ERRORS, "rate<0.01").unwrap(),
            Threshold::parse(HTTP_REQS, "count>0").unwrap(),
        ];
        let verdict = evaluate(&thresholds, &snap);
        assert_eq!(verdict.outcomes[0].observed, Some(0.0));
        assert!(verdict.outcomes[0].passed);
        assert!(verdict.outcomes[1].passed);
        assert!(!verdict.outcomes[2].passed);
    }

    #[test]
    fn test_missing_metric_fails() {
        let snap = MetricSink::new().snapshot();
        let verdict = evaluate(&[Threshold::parse(ERRORS, "rate<0.01").unwrap()], &snap);
        assert!(!verdict.passed);
        assert_eq!(verdict.outcomes[0].observed, None);
    }

    #[test]
    fn test_no_thresholds_passes() {
        let verdict = evaluate(&[], &MetricsSnapshot::default());
        assert!(verdict.passed);
        assert!(verdict.outcomes.is_empty());
    }

    #[test]
    fn test_evaluate_is_pure() {
        let snap = sink_with_latencies(&[10, 20, 2000]).snapshot();
        let thresholds = vec![Threshold::parse(HTTP_REQ_DURATION, "p(95)<1000").unwrap()];
        assert_eq!(evaluate(&thresholds, &snap), evaluate(&thresholds, &snap));
    }
}
