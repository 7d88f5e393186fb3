//! Property-based tests for scheduler, metrics and threshold invariants.
//!
//! These tests use proptest to verify that core invariants hold across a
//! wide range of random inputs.

use async_trait::async_trait;
use proptest::prelude::*;
use std::time::Duration;

use anagram_loadtest::loadtest::client::{AnagramApi, ApiResponse};
use anagram_loadtest::loadtest::config::{LoadTestConfig, PayloadConfig, Stage};
use anagram_loadtest::loadtest::error::RequestError;
use anagram_loadtest::loadtest::metrics::{MetricSink, ERRORS, HTTP_REQ_DURATION};
use anagram_loadtest::loadtest::scheduler::StageProfile;
use anagram_loadtest::loadtest::threshold::{evaluate, Threshold};
use anagram_loadtest::loadtest::workflow::{run_iteration, IterationPlan};

fn stages_strategy() -> impl Strategy<Value = Vec<Stage>> {
    prop::collection::vec(
        (1u64..60, 0u32..100).prop_map(|(d, v)| Stage::new(d, v)),
        1..6,
    )
}

/// Service answering with fixed statuses; `None` means a transport failure.
struct FixedStatuses {
    upload: Option<u16>,
    poll: Option<u16>,
    group: Option<u16>,
}

fn respond(status: Option<u16>, body: &'static str) -> Result<ApiResponse, RequestError> {
    match status {
        Some(code) => Ok(ApiResponse::new(code, body)),
        None => Err(RequestError::Timeout),
    }
}

#[async_trait]
impl AnagramApi for FixedStatuses {
    async fn upload(&self, _payload: &PayloadConfig) -> Result<ApiResponse, RequestError> {
        respond(self.upload, r#"{"task_id":"p"}"#)
    }
    async fn poll(&self, _task_id: &str) -> Result<ApiResponse, RequestError> {
        respond(self.poll, "{}")
    }
    async fn group(&self, _payload: &PayloadConfig) -> Result<ApiResponse, RequestError> {
        respond(self.group, "{}")
    }
}

fn status_strategy() -> impl Strategy<Value = Option<u16>> {
    prop_oneof![
        Just(None),
        Just(Some(200)),
        Just(Some(202)),
        Just(Some(404)),
        Just(Some(500)),
    ]
}

proptest! {
    /// C(t) always lies between the two levels of the stage containing t.
    #[test]
    fn target_stays_within_stage_levels(
        start_vus in 0u32..50,
        stages in stages_strategy(),
        fraction in 0.0f64..1.0,
    ) {
        let profile = StageProfile::new(start_vus, stages.clone());
        let total = profile.total_duration();
        let t = total.mul_f64(fraction);
        let index = profile.stage_index_at(t);
        let from = if index == 0 { start_vus } else { stages[index - 1].target_vus };
        let to = stages[index].target_vus;
        let (lo, hi) = (from.min(to) as f64, from.max(to) as f64);

        let c = profile.target_at(t);
        prop_assert!(c >= lo - 1e-9 && c <= hi + 1e-9, "C({:?}) = {} outside [{}, {}]", t, c, lo, hi);
        prop_assert!(profile.desired_vus(t) as f64 <= hi);
    }

    /// C(t) hits every stage target exactly at the stage's end.
    #[test]
    fn target_reaches_stage_levels_at_boundaries(
        start_vus in 0u32..50,
        stages in stages_strategy(),
    ) {
        let profile = StageProfile::new(start_vus, stages.clone());
        prop_assert_eq!(profile.desired_vus(Duration::ZERO), start_vus);
        let mut end = Duration::ZERO;
        for stage in &stages {
            end += stage.duration();
            prop_assert_eq!(profile.desired_vus(end), stage.target_vus);
        }
        // Holds the last level after the profile ends.
        let last = stages.last().map(|s| s.target_vus).unwrap_or(start_vus);
        prop_assert_eq!(profile.desired_vus(end + Duration::from_secs(3600)), last);
    }

    /// Recording order never changes the aggregate.
    #[test]
    fn aggregation_is_order_independent(
        samples in prop::collection::vec((any::<bool>(), 1u64..5_000), 0..300),
    ) {
        let forward = MetricSink::with_builtin_metrics();
        let backward = MetricSink::with_builtin_metrics();
        for (failed, ms) in &samples {
            forward.add_rate(ERRORS, *failed);
            forward.add_trend(HTTP_REQ_DURATION, Duration::from_millis(*ms));
        }
        for (failed, ms) in samples.iter().rev() {
            backward.add_rate(ERRORS, *failed);
            backward.add_trend(HTTP_REQ_DURATION, Duration::from_millis(*ms));
        }

        let (a, b) = (forward.snapshot(), backward.snapshot());
        prop_assert_eq!(a.rate_value(ERRORS), b.rate_value(ERRORS));
        let (ta, tb) = (a.trend(HTTP_REQ_DURATION).unwrap(), b.trend(HTTP_REQ_DURATION).unwrap());
        prop_assert_eq!(ta.count(), tb.count());
        for p in [50.0, 90.0, 95.0, 99.0] {
            prop_assert_eq!(ta.percentile_ms(p), tb.percentile_ms(p));
        }
        prop_assert_eq!(ta.max_ms(), tb.max_ms());
    }

    /// Percentiles are monotonic in p.
    #[test]
    fn percentiles_monotonic(latencies in prop::collection::vec(1u64..10_000, 1..200)) {
        let sink = MetricSink::new();
        for ms in &latencies {
            sink.add_trend(HTTP_REQ_DURATION, Duration::from_millis(*ms));
        }
        let snap = sink.snapshot();
        let trend = snap.trend(HTTP_REQ_DURATION).unwrap();
        prop_assert!(trend.min_ms() <= trend.med_ms());
        prop_assert!(trend.med_ms() <= trend.percentile_ms(95.0));
        prop_assert!(trend.percentile_ms(95.0) <= trend.percentile_ms(99.0));
        prop_assert!(trend.percentile_ms(99.0) <= trend.max_ms());
    }

    /// Evaluating the same snapshot twice yields the same verdict, and the
    /// verdict is the conjunction of the outcomes.
    #[test]
    fn threshold_evaluation_is_pure(
        latencies in prop::collection::vec(1u64..3_000, 0..100),
        error_flags in prop::collection::vec(any::<bool>(), 0..100),
        bound in 1u32..3_000,
    ) {
        let sink = MetricSink::with_builtin_metrics();
        for ms in &latencies {
            sink.add_trend(HTTP_REQ_DURATION, Duration::from_millis(*ms));
        }
        for flag in &error_flags {
            sink.add_rate(ERRORS, *flag);
        }
        let snap = sink.snapshot();
        let thresholds = vec![
            Threshold::parse(HTTP_REQ_DURATION, &format!("p(95)<{bound}")).unwrap(),
            Threshold::parse(ERRORS, "rate<0.01").unwrap(),
        ];

        let first = evaluate(&thresholds, &snap);
        let second = evaluate(&thresholds, &snap);
        prop_assert_eq!(&first, &second);
        prop_assert_eq!(first.passed, first.outcomes.iter().all(|o| o.passed));
    }

    /// The `errors` true-count equals the number of steps with a failed check.
    #[test]
    fn error_count_matches_failed_steps(
        scripts in prop::collection::vec(
            (status_strategy(), status_strategy(), status_strategy()),
            1..8,
        ),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
            .unwrap();
        let sink = MetricSink::with_builtin_metrics();
        let plan = IterationPlan::from_config(&LoadTestConfig::default());

        let mut failed_steps = 0u64;
        let mut steps = 0u64;
        for (upload, poll, group) in scripts {
            let api = FixedStatuses { upload, poll, group };
            let outcome = runtime.block_on(run_iteration(&api, &sink, &plan));
            failed_steps += outcome.failed_steps() as u64;
            steps += outcome.steps().count() as u64;
            prop_assert_eq!(outcome.poll_executed(), upload == Some(202));
        }

        let errors = sink.snapshot().rate_value(ERRORS).unwrap();
        prop_assert_eq!(errors.trues, failed_steps);
        prop_assert_eq!(errors.total, steps);
    }
}
