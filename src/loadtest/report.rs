//! JSON report serialization for load test results.
//!
//! Produces a schema-versioned JSON report with every metric aggregate, the
//! per-check tallies, threshold outcomes and the full resolved config for
//! reproducibility. Designed for CI/CD pipeline consumption.

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::loadtest::config::LoadTestConfig;
use crate::loadtest::engine::LoadTestResult;
use crate::loadtest::error::LoadTestError;
use crate::loadtest::metrics::{CheckSummary, MetricValue};
use crate::loadtest::threshold::ThresholdOutcome;

/// Schema version for the JSON report format.
///
/// Increment when making breaking changes to the report structure.
const SCHEMA_VERSION: &str = "1.0";

/// Top-level JSON report structure.
#[derive(Debug, Serialize)]
pub struct LoadTestReport {
    /// Report format version for parser compatibility.
    pub schema_version: String,
    /// RFC 3339 timestamp when the report was generated.
    pub timestamp: String,
    pub target_url: String,
    /// Actual test duration in seconds, including the final drain.
    pub duration_secs: f64,
    /// Threshold verdict; `false` maps to exit code 99.
    pub passed: bool,
    pub interrupted: bool,
    pub peak_vus: u32,
    pub slots_spawned: u64,
    /// Full resolved configuration (with CLI overrides applied).
    pub config: LoadTestConfig,
    /// Every metric by name, including tagged per-endpoint series.
    pub metrics: BTreeMap<String, ReportMetric>,
    pub checks: Vec<CheckSummary>,
    /// Transport failures by category.
    pub transport_errors: BTreeMap<String, u64>,
    pub thresholds: Vec<ThresholdOutcome>,
}

/// Aggregates of one metric, shaped by its kind.
#[derive(Debug, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ReportMetric {
    Rate {
        rate: f64,
        trues: u64,
        total: u64,
    },
    Trend {
        count: u64,
        avg_ms: f64,
        min_ms: f64,
        med_ms: f64,
        max_ms: f64,
        p90_ms: f64,
        p95_ms: f64,
        p99_ms: f64,
    },
    Counter {
        count: u64,
        rate_per_sec: f64,
    },
}

impl ReportMetric {
    fn from_value(value: &MetricValue, elapsed_secs: f64) -> Self {
        match value {
            MetricValue::Rate(r) => Self::Rate {
                rate: r.rate(),
                trues: r.trues,
                total: r.total,
            },
            MetricValue::Trend(t) => Self::Trend {
                count: t.count(),
                avg_ms: t.avg_ms(),
                min_ms: t.min_ms(),
                med_ms: t.med_ms(),
                max_ms: t.max_ms(),
                p90_ms: t.percentile_ms(90.0),
                p95_ms: t.percentile_ms(95.0),
                p99_ms: t.percentile_ms(99.0),
            },
            MetricValue::Counter(c) => Self::Counter {
                count: *c,
                rate_per_sec: if elapsed_secs > 0.0 {
                    *c as f64 / elapsed_secs
                } else {
                    0.0
                },
            },
        }
    }
}

impl LoadTestReport {
    /// Build a report from load test results and the resolved config.
    pub fn from_result(result: &LoadTestResult, config: &LoadTestConfig) -> Self {
        let snap = &result.snapshot;
        let elapsed_secs = result.elapsed.as_secs_f64();

        let metrics = snap
            .metrics
            .iter()
            .map(|(name, value)| (name.clone(), ReportMetric::from_value(value, elapsed_secs)))
            .collect();

        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            target_url: result.target_url.clone(),
            duration_secs: elapsed_secs,
            passed: result.verdict.passed,
            interrupted: result.interrupted,
            peak_vus: result.peak_vus,
            slots_spawned: result.slots_spawned,
            config: config.clone(),
            metrics,
            checks: snap.checks.clone(),
            transport_errors: snap.transport_errors.clone(),
            thresholds: result.verdict.outcomes.clone(),
        }
    }
}

/// Write a JSON report file to the `.anagram/reports/` directory under
/// `base_dir`, creating it if needed.
///
/// Returns the path to the written report file.
pub fn write_report(report: &LoadTestReport, base_dir: &Path) -> Result<PathBuf, LoadTestError> {
    let reports_dir = base_dir.join(".anagram").join("reports");
    let report_path = reports_dir.join(report_filename(&chrono::Utc::now()));
    write_report_to(report, &report_path)?;
    Ok(report_path)
}

/// Write a JSON report to an explicit path, creating parent directories.
pub fn write_report_to(report: &LoadTestReport, path: &Path) -> Result<(), LoadTestError> {
    let io_err = |e: std::io::Error| LoadTestError::Report {
        message: format!("{}: {e}", path.display()),
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    let json = serde_json::to_string_pretty(report).map_err(|e| LoadTestError::Report {
        message: e.to_string(),
    })?;
    std::fs::write(path, json).map_err(io_err)
}

/// Report filename for a given timestamp. Uses hyphens instead of colons for
/// cross-platform filename compatibility.
pub fn report_filename(timestamp: &chrono::DateTime<chrono::Utc>) -> String {
    format!("loadtest-{}.json", timestamp.format("%Y-%m-%dT%H-%M-%S"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loadtest::metrics::{
        MetricSink, ERRORS, HTTP_REQS, HTTP_REQ_DURATION,
    };
    use crate::loadtest::threshold::{evaluate, Threshold};
    use chrono::TimeZone;
    use std::time::Duration;

    fn sample_result() -> LoadTestResult {
        let sink = MetricSink::with_builtin_metrics();
        sink.add_count(HTTP_REQS, 30);
        sink.add_trend(HTTP_REQ_DURATION, Duration::from_millis(12));
        sink.add_rate(ERRORS, false);
        sink.add_rate(ERRORS, true);
        sink.record_check("upload status is 202", true);
        sink.record_transport_error("timeout");
        let snapshot = sink.snapshot();
        let thresholds = vec![Threshold::parse(ERRORS, "rate<0.01").unwrap()];
        LoadTestResult {
            verdict: evaluate(&thresholds, &snapshot),
            snapshot,
            elapsed: Duration::from_secs(10),
            peak_vus: 3,
            slots_spawned: 4,
            interrupted: false,
            target_url: "http://localhost:8080".to_string(),
        }
    }

    #[test]
    fn test_report_json_shape() {
        let report = LoadTestReport::from_result(&sample_result(), &LoadTestConfig::default());
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["schema_version"], "1.0");
        assert_eq!(json["target_url"], "http://localhost:8080");
        assert_eq!(json["passed"], false);
        assert_eq!(json["peak_vus"], 3);
        assert_eq!(json["metrics"]["http_reqs"]["type"], "counter");
        assert_eq!(json["metrics"]["http_reqs"]["count"], 30);
        assert_eq!(json["metrics"]["http_reqs"]["rate_per_sec"], 3.0);
        assert_eq!(json["metrics"]["errors"]["type"], "rate");
        assert_eq!(json["metrics"]["errors"]["rate"], 0.5);
        assert_eq!(json["metrics"]["http_req_duration"]["type"], "trend");
        assert_eq!(json["metrics"]["http_req_duration"]["count"], 1);
        assert!(json["metrics"]["http_req_duration{name:upload}"].is_object());
        assert_eq!(json["checks"][0]["name"], "upload status is 202");
        assert_eq!(json["transport_errors"]["timeout"], 1);
        assert_eq!(json["thresholds"][0]["expression"], "rate<0.01");
        assert_eq!(json["thresholds"][0]["passed"], false);
        assert_eq!(json["config"]["stage"].as_array().unwrap().len(), 4);
    }

    #[test]
    fn test_report_filename_has_no_colons() {
        let ts = chrono::Utc.with_ymd_and_hms(2026, 3, 1, 14, 5, 9).unwrap();
        let name = report_filename(&ts);
        assert_eq!(name, "loadtest-2026-03-01T14-05-09.json");
        assert!(!name.contains(':'));
    }

    #[test]
    fn test_write_report_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let report = LoadTestReport::from_result(&sample_result(), &LoadTestConfig::default());
        let path = write_report(&report, dir.path()).unwrap();

        assert!(path.starts_with(dir.path().join(".anagram").join("reports")));
        let content = std::fs::read_to_string(&path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(parsed["schema_version"], "1.0");
    }

    #[test]
    fn test_write_report_to_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("run.json");
        let report = LoadTestReport::from_result(&sample_result(), &LoadTestConfig::default());
        write_report_to(&report, &path).unwrap();
        assert!(path.exists());
    }
}
