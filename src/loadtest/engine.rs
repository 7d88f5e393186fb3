//! Load test execution engine with threshold gating and graceful shutdown.
//!
//! [`LoadTestEngine`] is the top-level orchestrator that:
//! - Runs the [`StageScheduler`], which spawns and retires VU slots
//! - Shares one [`MetricSink`] across every slot
//! - Publishes scheduler status through a watch channel for live display
//! - Coordinates graceful shutdown via [`CancellationToken`]
//! - Freezes the sink after all slots drained and evaluates thresholds

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::loadtest::client::{AnagramApi, HttpAnagramClient};
use crate::loadtest::config::LoadTestConfig;
use crate::loadtest::display::display_loop;
use crate::loadtest::error::LoadTestError;
use crate::loadtest::metrics::{MetricSink, MetricsSnapshot};
use crate::loadtest::scheduler::{SchedulerStatus, StageScheduler};
use crate::loadtest::threshold::{evaluate, RunVerdict};
use crate::loadtest::vu::{vu_loop, ActiveVuCounter, VuContext};
use crate::loadtest::workflow::IterationPlan;

/// Compile-time Send bounds verification for types crossing task boundaries.
fn _assert_send<T: Send>() {}
#[allow(dead_code)]
fn _check_send_bounds() {
    _assert_send::<SchedulerStatus>();
    _assert_send::<MetricsSnapshot>();
    _assert_send::<VuContext>();
}

/// Top-level load test engine configuration and entry point.
pub struct LoadTestEngine {
    config: LoadTestConfig,
    api: Arc<dyn AnagramApi>,
    live_display: bool,
    signal_handling: bool,
}

impl LoadTestEngine {
    /// Creates an engine that drives the service at `config.settings.base_url`
    /// over HTTP.
    pub fn new(config: LoadTestConfig) -> Result<Self, LoadTestError> {
        config.validate()?;
        let client = HttpAnagramClient::new(
            &config.settings.base_url,
            config.settings.timeout_as_duration(),
        )?;
        Ok(Self::with_api(config, Arc::new(client)))
    }

    /// Creates an engine over any [`AnagramApi`] implementation.
    pub fn with_api(config: LoadTestConfig, api: Arc<dyn AnagramApi>) -> Self {
        Self {
            config,
            api,
            live_display: false,
            signal_handling: false,
        }
    }

    /// Enables the spinner status line on stderr.
    pub fn with_live_display(mut self, enabled: bool) -> Self {
        self.live_display = enabled;
        self
    }

    /// Installs the two-phase Ctrl+C handler for the duration of the run.
    pub fn with_signal_handling(mut self, enabled: bool) -> Self {
        self.signal_handling = enabled;
        self
    }

    /// Returns a reference to the engine's configuration.
    pub fn config(&self) -> &LoadTestConfig {
        &self.config
    }

    /// Run the load test to completion and evaluate thresholds.
    ///
    /// Errors only on invalid configuration. Anything the service does
    /// (failures, timeouts, garbage bodies) ends up in the metrics and,
    /// through thresholds, in the verdict.
    pub async fn run(&self) -> Result<LoadTestResult, LoadTestError> {
        self.config.validate()?;
        let thresholds = self.config.parsed_thresholds()?;

        let sink = Arc::new(MetricSink::with_builtin_metrics());
        let active = ActiveVuCounter::new();
        let ctx = VuContext {
            api: self.api.clone(),
            sink: sink.clone(),
            plan: Arc::new(IterationPlan::from_config(&self.config)),
            active: active.clone(),
        };

        let scheduler = StageScheduler::from_config(&self.config);
        let (status_tx, status_rx) =
            watch::channel(SchedulerStatus::initial(self.config.stage.len()));
        let cancel = CancellationToken::new();

        let display_cancel = CancellationToken::new();
        let display_handle = self.live_display.then(|| {
            tokio::spawn(display_loop(
                status_rx.clone(),
                sink.clone(),
                active.clone(),
                display_cancel.clone(),
            ))
        });
        let signal_handle = self
            .signal_handling
            .then(|| tokio::spawn(handle_ctrl_c(cancel.clone())));

        tracing::info!(
            target_url = %self.config.settings.base_url,
            stages = self.config.stage.len(),
            duration_secs = self.config.total_duration().as_secs(),
            peak_target = self.config.peak_target_vus(),
            "starting load test"
        );

        let schedule = scheduler
            .run(&cancel, &status_tx, move |vu_id, retire| {
                let ctx = ctx.clone();
                async move {
                    vu_loop(vu_id, ctx, retire).await;
                }
            })
            .await;

        display_cancel.cancel();
        if let Some(handle) = display_handle {
            if let Err(e) = handle.await {
                tracing::debug!(error = %e, "live display task ended abnormally");
            }
        }
        if let Some(handle) = signal_handle {
            handle.abort();
        }

        // Every slot has drained, so the snapshot reflects all completed writes.
        let snapshot = sink.snapshot();
        let verdict = evaluate(&thresholds, &snapshot);
        tracing::info!(
            passed = verdict.passed,
            violated = verdict.violated().count(),
            interrupted = schedule.interrupted,
            "load test finished"
        );

        Ok(LoadTestResult {
            snapshot,
            verdict,
            elapsed: schedule.elapsed,
            peak_vus: schedule.peak_vus,
            slots_spawned: schedule.slots_spawned,
            interrupted: schedule.interrupted,
            target_url: self.config.settings.base_url.clone(),
        })
    }
}

/// Result of a completed load test run.
#[derive(Debug, Clone)]
pub struct LoadTestResult {
    /// Frozen metrics, taken after every slot drained.
    pub snapshot: MetricsSnapshot,
    pub verdict: RunVerdict,
    /// Total elapsed time of the test, including the final drain.
    pub elapsed: Duration,
    /// Highest number of simultaneously live slots.
    pub peak_vus: u32,
    pub slots_spawned: u64,
    /// Whether the run was stopped early by Ctrl+C.
    pub interrupted: bool,
    pub target_url: String,
}

impl LoadTestResult {
    pub fn passed(&self) -> bool {
        self.verdict.passed
    }
}

/// Ctrl+C handler with two-phase shutdown.
///
/// First Ctrl+C triggers graceful drain via the cancellation token.
/// Second Ctrl+C performs a hard abort via `std::process::exit(1)`.
async fn handle_ctrl_c(cancel: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to install Ctrl+C handler");
        return;
    }
    eprintln!("\nReceived Ctrl+C, stopping gracefully...");
    cancel.cancel();

    if tokio::signal::ctrl_c().await.is_ok() {
        eprintln!("\nReceived second Ctrl+C, aborting immediately.");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loadtest::client::ApiResponse;
    use crate::loadtest::config::{PayloadConfig, Stage};
    use crate::loadtest::error::RequestError;
    use crate::loadtest::metrics::{ERRORS, ITERATIONS};
    use async_trait::async_trait;

    struct HealthyService;

    #[async_trait]
    impl AnagramApi for HealthyService {
        async fn upload(&self, _payload: &PayloadConfig) -> Result<ApiResponse, RequestError> {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(ApiResponse::new(202, r#"{"task_id":"t"}"#))
        }
        async fn poll(&self, _task_id: &str) -> Result<ApiResponse, RequestError> {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(ApiResponse::new(200, "{}"))
        }
        async fn group(&self, _payload: &PayloadConfig) -> Result<ApiResponse, RequestError> {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(ApiResponse::new(202, "{}"))
        }
    }

    fn short_config() -> LoadTestConfig {
        LoadTestConfig {
            stage: vec![Stage::new(2, 4), Stage::new(2, 0)],
            ..LoadTestConfig::default()
        }
    }

    #[test]
    fn test_engine_builder() {
        let engine = LoadTestEngine::with_api(short_config(), Arc::new(HealthyService))
            .with_live_display(true)
            .with_signal_handling(true);
        assert!(engine.live_display);
        assert!(engine.signal_handling);
        assert_eq!(engine.config().stage.len(), 2);
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = LoadTestConfig {
            stage: vec![],
            ..LoadTestConfig::default()
        };
        assert!(matches!(
            LoadTestEngine::new(config),
            Err(LoadTestError::ConfigValidation { .. })
        ));
    }

    #[tokio::test]
    async fn test_new_builds_http_client() {
        let engine = LoadTestEngine::new(short_config()).unwrap();
        assert_eq!(engine.config().settings.base_url, "http://localhost:8080");
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_against_healthy_service_passes() {
        let engine = LoadTestEngine::with_api(short_config(), Arc::new(HealthyService));
        let result = engine.run().await.unwrap();

        assert!(result.passed(), "verdict: {:?}", result.verdict);
        assert!(!result.interrupted);
        assert_eq!(result.peak_vus, 4);
        assert!(result.snapshot.counter(ITERATIONS) > 0);
        assert_eq!(result.snapshot.rate(ERRORS), Some(0.0));
        assert_eq!(result.verdict.outcomes.len(), 3);
        assert_eq!(result.target_url, "http://localhost:8080");
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_with_live_display_joins_display_task() {
        let engine =
            LoadTestEngine::with_api(short_config(), Arc::new(HealthyService)).with_live_display(true);
        let result = engine.run().await.unwrap();

        assert!(result.passed(), "verdict: {:?}", result.verdict);
        assert_eq!(result.peak_vus, 4);
        assert!(result.snapshot.counter(ITERATIONS) > 0);
    }
}
