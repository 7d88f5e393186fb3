//! One virtual-user iteration: upload, poll for the result, group.
//!
//! ```text
//! Start -> Upload -> (task id obtained? -> Poll : skip) -> Group -> cool-down -> Done
//! ```
//!
//! Every step records its request metrics and checks into the shared
//! [`MetricSink`]. A step with any failed check adds `true` to the custom
//! `errors` rate, a clean step adds `false`. Nothing a step observes can
//! abort the iteration: transport failures and bad statuses are failed
//! checks, and a malformed upload body only skips the poll step.

use std::time::Duration;

use tokio::time::Instant;

use crate::loadtest::check::{check_all, Check, CheckResult, ResponseView};
use crate::loadtest::client::{AnagramApi, ApiResponse};
use crate::loadtest::config::{LoadTestConfig, PayloadConfig};
use crate::loadtest::error::RequestError;
use crate::loadtest::metrics::{
    tagged, Endpoint, MetricSink, ERRORS, HTTP_REQS, HTTP_REQ_DURATION, HTTP_REQ_FAILED,
    ITERATIONS, ITERATION_DURATION, POLL_SKIPPED,
};

pub const UPLOAD_STATUS_CHECK: &str = "upload status is 202";
pub const UPLOAD_LATENCY_CHECK: &str = "upload response time < 2000ms";
pub const POLL_STATUS_CHECK: &str = "get result status is 200 or 202";
pub const POLL_LATENCY_CHECK: &str = "get result response time < 1000ms";
pub const GROUP_STATUS_CHECK: &str = "group status is 202";
pub const GROUP_LATENCY_CHECK: &str = "group response time < 1000ms";

const UPLOAD_LATENCY_BOUND: Duration = Duration::from_millis(2000);
const POLL_LATENCY_BOUND: Duration = Duration::from_millis(1000);
const GROUP_LATENCY_BOUND: Duration = Duration::from_millis(1000);

/// Static inputs of an iteration, shared by every slot.
#[derive(Debug, Clone)]
pub struct IterationPlan {
    pub payload: PayloadConfig,
    pub poll_delay: Duration,
    pub cooldown: Duration,
    pub concurrent_group: bool,
}

impl IterationPlan {
    pub fn from_config(config: &LoadTestConfig) -> Self {
        Self {
            payload: config.payload.clone(),
            poll_delay: config.settings.poll_delay(),
            cooldown: config.settings.cooldown(),
            concurrent_group: config.settings.concurrent_group,
        }
    }
}

/// Result of trying to extract a task id from an accepted upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskIdParse {
    ParsedOk { task_id: String },
    ParseFailed { reason: String },
}

/// Parses the upload response body. Accepts a non-empty string `task_id`
/// or a non-zero numeric one.
pub fn parse_task_id(body: &[u8]) -> TaskIdParse {
    let value: serde_json::Value = match serde_json::from_slice(body) {
        Ok(value) => value,
        Err(e) => {
            return TaskIdParse::ParseFailed {
                reason: format!("invalid JSON: {e}"),
            }
        }
    };
    let failed = |reason: &str| TaskIdParse::ParseFailed {
        reason: reason.to_string(),
    };
    match value.get("task_id") {
        Some(serde_json::Value::String(id)) if !id.is_empty() => TaskIdParse::ParsedOk {
            task_id: id.clone(),
        },
        Some(serde_json::Value::Number(n)) if n.as_f64().is_some_and(|v| v != 0.0) => {
            TaskIdParse::ParsedOk {
                task_id: n.to_string(),
            }
        }
        Some(_) => failed("task_id is empty or not a string/number"),
        None => failed("task_id missing from body"),
    }
}

/// Outcome of one request step.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub endpoint: Endpoint,
    /// `None` when no response arrived.
    pub status: Option<u16>,
    pub elapsed: Duration,
    pub checks: Vec<CheckResult>,
    pub transport_error: Option<RequestError>,
}

impl StepOutcome {
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    pub fn failed_checks(&self) -> usize {
        self.checks.iter().filter(|c| !c.passed).count()
    }
}

/// Everything one iteration observed. Dropped once the slot has inspected it.
#[derive(Debug, Clone)]
pub struct IterationOutcome {
    pub task_id: Option<String>,
    pub upload: StepOutcome,
    /// `None` when the poll step was skipped.
    pub poll: Option<StepOutcome>,
    pub group: StepOutcome,
    pub duration: Duration,
}

impl IterationOutcome {
    pub fn poll_executed(&self) -> bool {
        self.poll.is_some()
    }

    pub fn steps(&self) -> impl Iterator<Item = &StepOutcome> {
        std::iter::once(&self.upload)
            .chain(self.poll.iter())
            .chain(std::iter::once(&self.group))
    }

    /// Steps with at least one failed check; equals this iteration's
    /// contribution to the `errors` true-count.
    pub fn failed_steps(&self) -> usize {
        self.steps().filter(|s| !s.passed()).count()
    }

    pub fn passed(&self) -> bool {
        self.failed_steps() == 0
    }
}

fn request_failed(result: &Result<ApiResponse, RequestError>) -> bool {
    match result {
        Ok(response) => !(200..400).contains(&response.status),
        Err(_) => true,
    }
}

/// Records request-level metrics and the step's checks.
fn finish_step(
    sink: &MetricSink,
    endpoint: Endpoint,
    result: &Result<ApiResponse, RequestError>,
    elapsed: Duration,
    checks: &[(&str, Check)],
) -> StepOutcome {
    let failed = request_failed(result);
    sink.add_count(HTTP_REQS, 1);
    sink.add_count(&tagged(HTTP_REQS, endpoint), 1);
    sink.add_rate(HTTP_REQ_FAILED, failed);
    sink.add_rate(&tagged(HTTP_REQ_FAILED, endpoint), failed);

    let transport_error = match result {
        Ok(_) => {
            sink.add_trend(HTTP_REQ_DURATION, elapsed);
            sink.add_trend(&tagged(HTTP_REQ_DURATION, endpoint), elapsed);
            None
        }
        Err(err) => {
            tracing::debug!(endpoint = %endpoint, error = %err, "request failed");
            sink.record_transport_error(err.error_category());
            Some(err.clone())
        }
    };

    let status = result.as_ref().ok().map(|r| r.status);
    let view = ResponseView { status, elapsed };
    let results = check_all(sink, checks, &view);

    let outcome = StepOutcome {
        endpoint,
        status,
        elapsed,
        checks: results,
        transport_error,
    };
    sink.add_rate(ERRORS, !outcome.passed());
    outcome
}

async fn upload_step(
    api: &dyn AnagramApi,
    sink: &MetricSink,
    plan: &IterationPlan,
) -> (StepOutcome, Option<TaskIdParse>) {
    let started = Instant::now();
    let result = api.upload(&plan.payload).await;
    let elapsed = started.elapsed();

    let outcome = finish_step(
        sink,
        Endpoint::Upload,
        &result,
        elapsed,
        &[
            (UPLOAD_STATUS_CHECK, Check::StatusIn(&[202])),
            (UPLOAD_LATENCY_CHECK, Check::LatencyBelow(UPLOAD_LATENCY_BOUND)),
        ],
    );

    let parse = match &result {
        Ok(response) if response.status == 202 => Some(parse_task_id(&response.body)),
        _ => None,
    };
    (outcome, parse)
}

async fn poll_step(
    api: &dyn AnagramApi,
    sink: &MetricSink,
    plan: &IterationPlan,
    task_id: &str,
) -> StepOutcome {
    tokio::time::sleep(plan.poll_delay).await;

    let started = Instant::now();
    let result = api.poll(task_id).await;
    let elapsed = started.elapsed();

    finish_step(
        sink,
        Endpoint::Poll,
        &result,
        elapsed,
        &[
            (POLL_STATUS_CHECK, Check::StatusIn(&[200, 202])),
            (POLL_LATENCY_CHECK, Check::LatencyBelow(POLL_LATENCY_BOUND)),
        ],
    )
}

async fn group_step(api: &dyn AnagramApi, sink: &MetricSink, plan: &IterationPlan) -> StepOutcome {
    let started = Instant::now();
    let result = api.group(&plan.payload).await;
    let elapsed = started.elapsed();

    finish_step(
        sink,
        Endpoint::Group,
        &result,
        elapsed,
        &[
            // The service queues grouping work even for inline word lists.
            (GROUP_STATUS_CHECK, Check::StatusIn(&[202])),
            (GROUP_LATENCY_CHECK, Check::LatencyBelow(GROUP_LATENCY_BOUND)),
        ],
    )
}

/// Upload, then poll when a task id came back.
async fn upload_then_poll(
    api: &dyn AnagramApi,
    sink: &MetricSink,
    plan: &IterationPlan,
) -> (StepOutcome, Option<String>, Option<StepOutcome>) {
    let (upload, parse) = upload_step(api, sink, plan).await;
    match parse {
        Some(TaskIdParse::ParsedOk { task_id }) => {
            let poll = poll_step(api, sink, plan, &task_id).await;
            (upload, Some(task_id), Some(poll))
        }
        Some(TaskIdParse::ParseFailed { reason }) => {
            tracing::debug!(%reason, "upload accepted without usable task id, skipping poll");
            sink.add_count(POLL_SKIPPED, 1);
            (upload, None, None)
        }
        None => {
            sink.add_count(POLL_SKIPPED, 1);
            (upload, None, None)
        }
    }
}

/// Runs one full iteration against `api`, recording into `sink`.
///
/// Never fails: every problem is captured in the returned outcome and the
/// sink. The cool-down is always honoured, even after fast failures.
pub async fn run_iteration(
    api: &dyn AnagramApi,
    sink: &MetricSink,
    plan: &IterationPlan,
) -> IterationOutcome {
    let started = Instant::now();

    let ((upload, task_id, poll), group) = if plan.concurrent_group {
        tokio::join!(
            upload_then_poll(api, sink, plan),
            group_step(api, sink, plan)
        )
    } else {
        let first = upload_then_poll(api, sink, plan).await;
        let group = group_step(api, sink, plan).await;
        (first, group)
    };

    tokio::time::sleep(plan.cooldown).await;

    let duration = started.elapsed();
    sink.add_count(ITERATIONS, 1);
    sink.add_trend(ITERATION_DURATION, duration);

    IterationOutcome {
        task_id,
        upload,
        poll,
        group,
        duration,
    }
}
