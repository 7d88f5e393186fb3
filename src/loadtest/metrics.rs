//! Run-scoped metric sink shared by every virtual user.
//!
//! [`MetricSink`] accumulates named observations from many concurrent slots
//! without lost updates:
//!
//! - **Rate** metrics are a pair of atomic counters (true-count, total).
//! - **Trend** metrics are `parking_lot::Mutex`-guarded HdrHistograms with
//!   microsecond resolution; percentiles are reported in milliseconds.
//! - **Counter** metrics are single atomic counters.
//!
//! All accumulation is commutative, so the order in which slots write never
//! changes the final aggregate. [`MetricSink::snapshot`] produces an owned
//! [`MetricsSnapshot`] that threshold evaluation and reporting read from.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use hdrhistogram::Histogram;
use parking_lot::Mutex;
use serde::Serialize;

/// Latency of every request, tagged per endpoint as well.
pub const HTTP_REQ_DURATION: &str = "http_req_duration";
/// Fraction of requests that failed (no response or status outside 200..400).
pub const HTTP_REQ_FAILED: &str = "http_req_failed";
/// Number of requests issued.
pub const HTTP_REQS: &str = "http_reqs";
/// Fraction of checks that passed.
pub const CHECKS: &str = "checks";
/// Custom error rate: one sample per workflow step, `true` if any check failed.
pub const ERRORS: &str = "errors";
/// Completed iterations.
pub const ITERATIONS: &str = "iterations";
/// Wall-clock time of a full iteration including suspensions.
pub const ITERATION_DURATION: &str = "iteration_duration";
/// Iterations whose poll step was skipped (no 202 or no task id).
pub const POLL_SKIPPED: &str = "poll_skipped";

/// Kind of accumulator backing a metric name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Rate,
    Trend,
    Counter,
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Rate => "rate",
            Self::Trend => "trend",
            Self::Counter => "counter",
        };
        f.write_str(s)
    }
}

/// The three anagram service endpoints the workflow exercises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Endpoint {
    Upload,
    Poll,
    Group,
}

impl Endpoint {
    pub const ALL: [Endpoint; 3] = [Endpoint::Upload, Endpoint::Poll, Endpoint::Group];

    /// Tag value used in tagged metric names, e.g. `http_req_duration{name:poll}`.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Upload => "upload",
            Self::Poll => "poll",
            Self::Group => "group",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Builds a tagged metric name: `metric{name:endpoint}`.
pub fn tagged(metric: &str, endpoint: Endpoint) -> String {
    format!("{metric}{{name:{}}}", endpoint.tag())
}

/// Splits a tagged name into `(base, Some(tag))`, or `(name, None)` when untagged.
pub fn split_tag(name: &str) -> (&str, Option<&str>) {
    match name.find('{') {
        Some(idx) if name.ends_with('}') => (&name[..idx], Some(&name[idx + 1..name.len() - 1])),
        _ => (name, None),
    }
}

const BUILTIN_METRICS: [(&str, MetricKind); 8] = [
    (HTTP_REQ_DURATION, MetricKind::Trend),
    (HTTP_REQ_FAILED, MetricKind::Rate),
    (HTTP_REQS, MetricKind::Counter),
    (CHECKS, MetricKind::Rate),
    (ERRORS, MetricKind::Rate),
    (ITERATIONS, MetricKind::Counter),
    (ITERATION_DURATION, MetricKind::Trend),
    (POLL_SKIPPED, MetricKind::Counter),
];

/// Request metrics that also exist in a per-endpoint tagged form.
const TAGGED_METRICS: [&str; 3] = [HTTP_REQ_DURATION, HTTP_REQ_FAILED, HTTP_REQS];

/// Returns the kind of a metric the harness records, including tagged
/// per-endpoint names. `None` for names the harness never writes.
pub fn builtin_metric_kind(name: &str) -> Option<MetricKind> {
    let (base, tag) = split_tag(name);
    let kind = BUILTIN_METRICS
        .iter()
        .find(|(metric, _)| *metric == base)
        .map(|(_, kind)| *kind)?;
    match tag {
        None => Some(kind),
        Some(tag) => {
            let known_tag = Endpoint::ALL
                .iter()
                .any(|e| tag == format!("name:{}", e.tag()));
            (known_tag && TAGGED_METRICS.contains(&base)).then_some(kind)
        }
    }
}

/// Every metric name the harness declares up front, in display order.
pub fn builtin_metric_names() -> Vec<String> {
    let mut names = Vec::new();
    for (metric, _) in BUILTIN_METRICS {
        names.push(metric.to_string());
        if TAGGED_METRICS.contains(&metric) {
            for endpoint in Endpoint::ALL {
                names.push(tagged(metric, endpoint));
            }
        }
    }
    names
}

fn new_histogram() -> Histogram<u64> {
    let mut histogram = Histogram::<u64>::new(3).expect("3 sigfigs is always valid");
    histogram.auto(true);
    histogram
}

fn duration_micros(duration: Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}

/// A single named accumulator.
enum Metric {
    Rate { trues: AtomicU64, total: AtomicU64 },
    Trend(Mutex<Histogram<u64>>),
    Counter(AtomicU64),
}

impl Metric {
    fn new(kind: MetricKind) -> Self {
        match kind {
            MetricKind::Rate => Self::Rate {
                trues: AtomicU64::new(0),
                total: AtomicU64::new(0),
            },
            MetricKind::Trend => Self::Trend(Mutex::new(new_histogram())),
            MetricKind::Counter => Self::Counter(AtomicU64::new(0)),
        }
    }

    fn kind(&self) -> MetricKind {
        match self {
            Self::Rate { .. } => MetricKind::Rate,
            Self::Trend(_) => MetricKind::Trend,
            Self::Counter(_) => MetricKind::Counter,
        }
    }

    fn value(&self) -> MetricValue {
        match self {
            Self::Rate { trues, total } => {
                // trues is published after total, so loading it first keeps trues <= total.
                let trues = trues.load(Ordering::Acquire);
                let total = total.load(Ordering::Acquire);
                MetricValue::Rate(RateValue { trues, total })
            }
            Self::Trend(histogram) => MetricValue::Trend(TrendValue {
                histogram: histogram.lock().clone(),
            }),
            Self::Counter(count) => MetricValue::Counter(count.load(Ordering::Acquire)),
        }
    }
}

struct CheckTally {
    order: u64,
    passes: AtomicU64,
    fails: AtomicU64,
}

/// Process-wide, run-scoped metric accumulator.
///
/// Safe for concurrent writes from every virtual user. Writes to a name
/// with a different kind than it was declared with are dropped with a
/// warning rather than silently re-typing the metric.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use anagram_loadtest::loadtest::metrics::{MetricSink, ERRORS, HTTP_REQ_DURATION};
///
/// let sink = MetricSink::with_builtin_metrics();
/// sink.add_trend(HTTP_REQ_DURATION, Duration::from_millis(42));
/// sink.add_rate(ERRORS, false);
///
/// let snap = sink.snapshot();
/// assert_eq!(snap.rate(ERRORS), Some(0.0));
/// assert_eq!(snap.trend(HTTP_REQ_DURATION).unwrap().count(), 1);
/// ```
pub struct MetricSink {
    metrics: DashMap<String, Metric>,
    checks: DashMap<String, CheckTally>,
    check_seq: AtomicU64,
    transport_errors: DashMap<&'static str, AtomicU64>,
}

impl Default for MetricSink {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricSink {
    /// Creates an empty sink with no declared metrics.
    pub fn new() -> Self {
        Self {
            metrics: DashMap::new(),
            checks: DashMap::new(),
            check_seq: AtomicU64::new(0),
            transport_errors: DashMap::new(),
        }
    }

    /// Creates a sink with every harness metric declared, so that
    /// thresholds and summaries see zero-valued metrics rather than
    /// missing ones when nothing was recorded.
    pub fn with_builtin_metrics() -> Self {
        let sink = Self::new();
        for name in builtin_metric_names() {
            if let Some(kind) = builtin_metric_kind(&name) {
                sink.declare(&name, kind);
            }
        }
        sink
    }

    /// Declares a metric. Idempotent; an existing metric keeps its kind.
    pub fn declare(&self, name: &str, kind: MetricKind) {
        self.metrics
            .entry(name.to_string())
            .or_insert_with(|| Metric::new(kind));
    }

    fn with_metric(&self, name: &str, kind: MetricKind, record: impl FnOnce(&Metric)) {
        if let Some(metric) = self.metrics.get(name) {
            if metric.kind() == kind {
                record(&metric);
            } else {
                tracing::warn!(
                    metric = name,
                    declared = %metric.kind(),
                    written = %kind,
                    "dropping sample with mismatched metric kind"
                );
            }
            return;
        }
        let metric = self
            .metrics
            .entry(name.to_string())
            .or_insert_with(|| Metric::new(kind));
        if metric.kind() == kind {
            record(&metric);
        }
    }

    /// Adds a boolean sample to a rate metric.
    pub fn add_rate(&self, name: &str, value: bool) {
        self.with_metric(name, MetricKind::Rate, |metric| {
            if let Metric::Rate { trues, total } = metric {
                total.fetch_add(1, Ordering::AcqRel);
                if value {
                    trues.fetch_add(1, Ordering::AcqRel);
                }
            }
        });
    }

    /// Adds a duration sample to a trend metric.
    pub fn add_trend(&self, name: &str, value: Duration) {
        self.with_metric(name, MetricKind::Trend, |metric| {
            if let Metric::Trend(histogram) = metric {
                let _ = histogram.lock().record(duration_micros(value));
            }
        });
    }

    /// Adds `n` to a counter metric.
    pub fn add_count(&self, name: &str, n: u64) {
        self.with_metric(name, MetricKind::Counter, |metric| {
            if let Metric::Counter(count) = metric {
                count.fetch_add(n, Ordering::AcqRel);
            }
        });
    }

    /// Records the outcome of a named check into its tally and the `checks` rate.
    pub fn record_check(&self, name: &str, passed: bool) {
        if let Some(tally) = self.checks.get(name) {
            Self::bump_tally(&tally, passed);
        } else {
            let tally = self
                .checks
                .entry(name.to_string())
                .or_insert_with(|| CheckTally {
                    order: self.check_seq.fetch_add(1, Ordering::Relaxed),
                    passes: AtomicU64::new(0),
                    fails: AtomicU64::new(0),
                });
            Self::bump_tally(&tally, passed);
        }
        self.add_rate(CHECKS, passed);
    }

    fn bump_tally(tally: &CheckTally, passed: bool) {
        if passed {
            tally.passes.fetch_add(1, Ordering::AcqRel);
        } else {
            tally.fails.fetch_add(1, Ordering::AcqRel);
        }
    }

    /// Counts a transport failure by category (`timeout`, `connection`, ...).
    pub fn record_transport_error(&self, category: &'static str) {
        self.transport_errors
            .entry(category)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::AcqRel);
    }

    /// Current value of a counter metric, 0 if absent. Cheap; used by the live display.
    pub fn counter_value(&self, name: &str) -> u64 {
        match self.metrics.get(name).as_deref() {
            Some(Metric::Counter(count)) => count.load(Ordering::Acquire),
            _ => 0,
        }
    }

    /// Current value of a rate metric. Cheap; used by the live display.
    pub fn rate_value(&self, name: &str) -> Option<RateValue> {
        let metric = self.metrics.get(name)?;
        match Metric::value(&metric) {
            MetricValue::Rate(rate) => Some(rate),
            _ => None,
        }
    }

    /// Captures an owned, point-in-time copy of every metric.
    ///
    /// Taken after all slots have drained, it reflects every completed write.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let metrics = self
            .metrics
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().value()))
            .collect();

        let mut tallies: Vec<(u64, CheckSummary)> = self
            .checks
            .iter()
            .map(|entry| {
                let tally = entry.value();
                (
                    tally.order,
                    CheckSummary {
                        name: entry.key().clone(),
                        passes: tally.passes.load(Ordering::Acquire),
                        fails: tally.fails.load(Ordering::Acquire),
                    },
                )
            })
            .collect();
        tallies.sort_by_key(|(order, _)| *order);

        let transport_errors = self
            .transport_errors
            .iter()
            .map(|entry| ((*entry.key()).to_string(), entry.value().load(Ordering::Acquire)))
            .collect();

        MetricsSnapshot {
            metrics,
            checks: tallies.into_iter().map(|(_, summary)| summary).collect(),
            transport_errors,
        }
    }
}

/// Frozen rate aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RateValue {
    pub trues: u64,
    pub total: u64,
}

impl RateValue {
    /// Fraction of true samples (0.0 when nothing was recorded).
    pub fn rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.trues as f64 / self.total as f64
    }

    pub fn falses(&self) -> u64 {
        self.total.saturating_sub(self.trues)
    }
}

/// Frozen latency distribution. All accessors report milliseconds.
#[derive(Clone)]
pub struct TrendValue {
    histogram: Histogram<u64>,
}

impl fmt::Debug for TrendValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrendValue")
            .field("count", &self.count())
            .field("min_ms", &self.min_ms())
            .field("max_ms", &self.max_ms())
            .field("p95_ms", &self.percentile_ms(95.0))
            .finish()
    }
}

impl TrendValue {
    /// Builds a trend from raw duration samples.
    pub fn from_samples(samples: impl IntoIterator<Item = Duration>) -> Self {
        let mut histogram = new_histogram();
        for sample in samples {
            let _ = histogram.record(duration_micros(sample));
        }
        Self { histogram }
    }

    pub fn count(&self) -> u64 {
        self.histogram.len()
    }

    pub fn is_empty(&self) -> bool {
        self.histogram.is_empty()
    }

    /// Order statistic at `p` percent (0..=100). Returns 0 if empty.
    pub fn percentile_ms(&self, p: f64) -> f64 {
        if self.histogram.is_empty() {
            return 0.0;
        }
        let quantile = (p / 100.0).clamp(0.0, 1.0);
        micros_to_ms(self.histogram.value_at_quantile(quantile))
    }

    pub fn med_ms(&self) -> f64 {
        self.percentile_ms(50.0)
    }

    pub fn min_ms(&self) -> f64 {
        if self.histogram.is_empty() {
            return 0.0;
        }
        micros_to_ms(self.histogram.min())
    }

    pub fn max_ms(&self) -> f64 {
        if self.histogram.is_empty() {
            return 0.0;
        }
        micros_to_ms(self.histogram.max())
    }

    pub fn avg_ms(&self) -> f64 {
        if self.histogram.is_empty() {
            return 0.0;
        }
        self.histogram.mean() / 1000.0
    }
}

fn micros_to_ms(micros: u64) -> f64 {
    micros as f64 / 1000.0
}

/// Frozen value of one metric.
#[derive(Debug, Clone)]
pub enum MetricValue {
    Rate(RateValue),
    Trend(TrendValue),
    Counter(u64),
}

impl MetricValue {
    pub fn kind(&self) -> MetricKind {
        match self {
            Self::Rate(_) => MetricKind::Rate,
            Self::Trend(_) => MetricKind::Trend,
            Self::Counter(_) => MetricKind::Counter,
        }
    }
}

/// Pass/fail tally of a named check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckSummary {
    pub name: String,
    pub passes: u64,
    pub fails: u64,
}

impl CheckSummary {
    pub fn total(&self) -> u64 {
        self.passes + self.fails
    }

    /// Pass fraction (1.0 when the check never ran).
    pub fn pass_rate(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 1.0;
        }
        self.passes as f64 / total as f64
    }
}

/// Point-in-time copy of all sink state.
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    /// Every metric by name.
    pub metrics: BTreeMap<String, MetricValue>,
    /// Check tallies in first-recorded order.
    pub checks: Vec<CheckSummary>,
    /// Transport failure counts by category.
    pub transport_errors: BTreeMap<String, u64>,
}

impl MetricsSnapshot {
    pub fn get(&self, name: &str) -> Option<&MetricValue> {
        self.metrics.get(name)
    }

    pub fn rate_value(&self, name: &str) -> Option<RateValue> {
        match self.metrics.get(name)? {
            MetricValue::Rate(rate) => Some(*rate),
            _ => None,
        }
    }

    pub fn rate(&self, name: &str) -> Option<f64> {
        self.rate_value(name).map(|r| r.rate())
    }

    pub fn trend(&self, name: &str) -> Option<&TrendValue> {
        match self.metrics.get(name)? {
            MetricValue::Trend(trend) => Some(trend),
            _ => None,
        }
    }

    /// Counter value, 0 when absent.
    pub fn counter(&self, name: &str) -> u64 {
        match self.metrics.get(name) {
            Some(MetricValue::Counter(count)) => *count,
            _ => 0,
        }
    }

    pub fn check(&self, name: &str) -> Option<&CheckSummary> {
        self.checks.iter().find(|c| c.name == name)
    }
}
