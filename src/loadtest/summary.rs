//! k6-style terminal summary renderer for load test results.
//!
//! Produces a colorized, human-readable summary with:
//! - ASCII art header with the run configuration
//! - Per-check pass/fail marks and pass ratios
//! - Dotted-line metric rows (metric.........: value), with per-endpoint
//!   latency and failure sub-rows
//! - Transport error breakdown
//! - Threshold outcomes and the final verdict
//!
//! [`render_summary`] is a pure function: structured data in, [`String`]
//! out. Color coding respects the global `colored` override set when
//! `--no-color` is active or stdout is piped.

use colored::Colorize;

use crate::loadtest::config::LoadTestConfig;
use crate::loadtest::engine::LoadTestResult;
use crate::loadtest::metrics::{
    tagged, Endpoint, RateValue, TrendValue, CHECKS, ERRORS, HTTP_REQS,
    HTTP_REQ_DURATION, HTTP_REQ_FAILED, ITERATIONS, ITERATION_DURATION, POLL_SKIPPED,
};

/// Width for dotted metric row padding.
const PAD_WIDTH: usize = 32;

/// Render a k6-style terminal summary.
///
/// # Layout
///
/// ```text
///           /\      |  anagram-loadtest
///          /  \     |
///     /\  /    \    |  target:    http://localhost:8080
///    /  \/      \   |  stages:    4 (max 50 vus)
///   /    \       \  |  duration:  150s
///  /      \       \ |
///
///   ✓ upload status is 202
///   ✗ group status is 202
///    ↳  97% ✓ 970 / ✗ 30
///
///   checks..........................: 99.50%  ✓ 5970  ✗ 30
///   errors..........................: 1.00%   ✓ 30    ✗ 2970
///   http_req_duration...............: avg=41.20ms min=3.10ms med=30.02ms max=920.00ms p(90)=80.11ms p(95)=120.30ms
///     { name:upload }...............: avg=...
/// ```
pub fn render_summary(result: &LoadTestResult, config: &LoadTestConfig) -> String {
    let snap = &result.snapshot;
    let elapsed_secs = result.elapsed.as_secs_f64();
    let mut lines = vec![render_header(result, config)];

    if !snap.checks.is_empty() {
        for check in &snap.checks {
            if check.fails == 0 {
                lines.push(format!("  {} {}", "✓".green(), check.name));
            } else {
                lines.push(format!("  {} {}", "✗".red(), check.name));
                lines.push(format!(
                    "   ↳  {:.0}% ✓ {} / ✗ {}",
                    check.pass_rate() * 100.0,
                    check.passes,
                    check.fails
                ));
            }
        }
        lines.push(String::new());
    }

    // Passing checks read as "good", error metrics read inverted.
    lines.push(rate_row(CHECKS, snap.rate_value(CHECKS), true));
    lines.push(rate_row(ERRORS, snap.rate_value(ERRORS), false));
    lines.push(trend_row(HTTP_REQ_DURATION, snap.trend(HTTP_REQ_DURATION)));
    for endpoint in Endpoint::ALL {
        let name = tagged(HTTP_REQ_DURATION, endpoint);
        if let Some(trend) = snap.trend(&name).filter(|t| !t.is_empty()) {
            lines.push(trend_row(&sub_label(endpoint), Some(trend)));
        }
    }
    lines.push(rate_row(HTTP_REQ_FAILED, snap.rate_value(HTTP_REQ_FAILED), false));
    for endpoint in Endpoint::ALL {
        let name = tagged(HTTP_REQ_FAILED, endpoint);
        if let Some(rate) = snap.rate_value(&name).filter(|r| r.total > 0) {
            lines.push(rate_row(&sub_label(endpoint), Some(rate), false));
        }
    }
    lines.push(counter_row(HTTP_REQS, snap.counter(HTTP_REQS), elapsed_secs));
    lines.push(trend_row(ITERATION_DURATION, snap.trend(ITERATION_DURATION)));
    lines.push(counter_row(ITERATIONS, snap.counter(ITERATIONS), elapsed_secs));
    lines.push(format_metric_row(
        POLL_SKIPPED,
        &snap.counter(POLL_SKIPPED).to_string(),
        PAD_WIDTH,
    ));
    lines.push(format_metric_row(
        "vus_max",
        &result.peak_vus.to_string(),
        PAD_WIDTH,
    ));

    if !snap.transport_errors.is_empty() {
        lines.push(String::new());
        lines.push("  transport errors:".to_string());
        let mut categories: Vec<_> = snap.transport_errors.iter().collect();
        categories.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        for (category, count) in categories {
            lines.push(format_metric_row(
                &format!("    {category}"),
                &count.to_string().red().to_string(),
                PAD_WIDTH,
            ));
        }
    }

    lines.push(render_thresholds(result));
    lines.join("\n")
}

fn render_header(result: &LoadTestResult, config: &LoadTestConfig) -> String {
    let interrupted = if result.interrupted {
        format!("  {}", "(interrupted)".yellow())
    } else {
        String::new()
    };
    format!(
        r#"
          /\      |  {}
         /  \     |
    /\  /    \    |  target:    {}
   /  \/      \   |  stages:    {} (max {} vus)
  /    \       \  |  duration:  {}s{}
 /      \       \ |
"#,
        "anagram-loadtest".bold(),
        result.target_url,
        config.stage.len(),
        config.peak_target_vus(),
        config.total_duration().as_secs(),
        interrupted,
    )
}

fn render_thresholds(result: &LoadTestResult) -> String {
    let mut lines = vec![String::new()];
    if result.verdict.outcomes.is_empty() {
        lines.push("  thresholds: none declared".to_string());
    } else {
        lines.push("  thresholds:".to_string());
        for outcome in &result.verdict.outcomes {
            let mark = if outcome.passed {
                "✓".green()
            } else {
                "✗".red()
            };
            let observed = outcome
                .observed
                .map_or_else(|| "metric missing".to_string(), |v| format!("{v:.4}"));
            lines.push(format!(
                "    {mark} {}: {} (observed {observed})",
                outcome.metric, outcome.expression
            ));
        }
    }
    lines.push(String::new());
    let verdict = if result.verdict.passed {
        "PASSED".green().bold()
    } else {
        "FAILED".red().bold()
    };
    lines.push(format!("  verdict: {verdict}"));
    lines.join("\n")
}

fn sub_label(endpoint: Endpoint) -> String {
    format!("  {{ name:{} }}", endpoint.tag())
}

fn rate_row(name: &str, rate: Option<RateValue>, higher_is_better: bool) -> String {
    let rate = rate.unwrap_or_default();
    let pct = format!("{:.2}%", rate.rate() * 100.0);
    let healthy = if higher_is_better {
        rate.falses() == 0
    } else {
        rate.trues == 0
    };
    let pct = if healthy {
        pct.green().to_string()
    } else {
        pct.red().to_string()
    };
    format_metric_row(
        name,
        &format!("{pct}  ✓ {}  ✗ {}", rate.trues, rate.falses()),
        PAD_WIDTH,
    )
}

fn trend_row(name: &str, trend: Option<&TrendValue>) -> String {
    let value = match trend {
        Some(t) => format!(
            "avg={:.2}ms min={:.2}ms med={:.2}ms max={:.2}ms p(90)={:.2}ms p(95)={:.2}ms",
            t.avg_ms(),
            t.min_ms(),
            t.med_ms(),
            t.max_ms(),
            t.percentile_ms(90.0),
            t.percentile_ms(95.0)
        ),
        None => "no samples".to_string(),
    };
    format_metric_row(name, &value, PAD_WIDTH)
}

fn counter_row(name: &str, count: u64, elapsed_secs: f64) -> String {
    let per_sec = if elapsed_secs > 0.0 {
        count as f64 / elapsed_secs
    } else {
        0.0
    };
    format_metric_row(name, &format!("{count}  {per_sec:.1}/s"), PAD_WIDTH)
}

/// Format a single metric row with dot-padding.
///
/// Produces: `"  metric_name..................: value_string"`
fn format_metric_row(name: &str, value: &str, pad_width: usize) -> String {
    format!("  {name:.<pad_width$}: {value}")
}
