//! k6-style live terminal display for load test progress.
//!
//! Renders a single in-place spinner line with the current stage, live and
//! desired VUs, iterations, requests, the custom error rate and elapsed time.
//! Refreshed once per second from the scheduler's watch channel and the
//! shared metric sink, never per request.

use std::sync::Arc;
use std::time::Duration;

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::loadtest::metrics::{MetricSink, RateValue, ERRORS, HTTP_REQS, ITERATIONS};
use crate::loadtest::scheduler::SchedulerStatus;
use crate::loadtest::vu::ActiveVuCounter;

const REFRESH_INTERVAL: Duration = Duration::from_secs(1);

/// Spinner-backed live status line on stderr.
pub struct LiveDisplay {
    status_bar: ProgressBar,
}

impl LiveDisplay {
    pub fn new() -> Self {
        let status_bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {wide_msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏");
        status_bar.set_style(style);
        status_bar.enable_steady_tick(Duration::from_millis(100));
        Self { status_bar }
    }

    /// Formats one status line.
    ///
    /// `running` counts VU tasks still executing, including retired slots
    /// finishing their last iteration, so it can briefly exceed the desired
    /// count on a ramp-down. Errors turn red once any step has failed.
    pub fn format_status(
        status: &SchedulerStatus,
        running: u32,
        iterations: u64,
        requests: u64,
        errors: RateValue,
    ) -> String {
        let vu_display = format!("{}/{}", running, status.desired_vus).green();
        let error_str = format!("{} ({:.1}%)", errors.trues, errors.rate() * 100.0);
        let error_display = if errors.trues > 0 {
            error_str.red().to_string()
        } else {
            error_str
        };

        format!(
            "  [{}]  vus: {}  |  iters: {}  |  reqs: {}  |  errors: {}  |  elapsed: {}s",
            status.stage_label(),
            vu_display,
            iterations,
            requests,
            error_display,
            status.elapsed.as_secs()
        )
    }

    pub fn update(&self, message: String) {
        self.status_bar.set_message(message);
    }

    /// Stop the display and clear the spinner.
    pub fn finish(&self) {
        self.status_bar.finish_and_clear();
    }
}

impl Default for LiveDisplay {
    fn default() -> Self {
        Self::new()
    }
}

fn render(status_rx: &watch::Receiver<SchedulerStatus>, sink: &MetricSink, active: &ActiveVuCounter) -> String {
    let status = *status_rx.borrow();
    LiveDisplay::format_status(
        &status,
        active.get(),
        sink.counter_value(ITERATIONS),
        sink.counter_value(HTTP_REQS),
        sink.rate_value(ERRORS).unwrap_or_default(),
    )
}

/// Runs the live display until `cancel` fires or the scheduler drops its
/// status sender.
pub async fn display_loop(
    mut status_rx: watch::Receiver<SchedulerStatus>,
    sink: Arc<MetricSink>,
    active: ActiveVuCounter,
    cancel: CancellationToken,
) {
    let display = LiveDisplay::new();
    eprintln!();
    eprintln!("  Running load test...");
    eprintln!();

    let mut tick = tokio::time::interval(REFRESH_INTERVAL);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,
            _ = tick.tick() => {
                display.update(render(&status_rx, &sink, &active));
            }
            changed = status_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    display.finish();
}
