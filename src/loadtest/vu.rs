//! Virtual user (VU) slot loop.
//!
//! A slot repeats the anagram workflow until its retirement token fires.
//! Retirement is checked only between iterations, so an in-flight iteration
//! always completes and records its metrics.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::loadtest::client::AnagramApi;
use crate::loadtest::metrics::MetricSink;
use crate::loadtest::workflow::{run_iteration, IterationPlan};

/// Atomic counter tracking the number of currently running VU tasks,
/// including retired slots still finishing their last iteration.
///
/// Lightweight wrapper around `Arc<AtomicU32>` for clone-friendly sharing
/// across VU tasks and the engine orchestrator.
#[derive(Clone, Debug)]
pub struct ActiveVuCounter(Arc<AtomicU32>);

impl ActiveVuCounter {
    /// Creates a new counter initialized to zero.
    pub fn new() -> Self {
        Self(Arc::new(AtomicU32::new(0)))
    }

    pub fn increment(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decrement(&self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }

    /// Returns the current number of running VUs.
    pub fn get(&self) -> u32 {
        self.0.load(Ordering::Relaxed)
    }
}

impl Default for ActiveVuCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared handles every slot needs.
#[derive(Clone)]
pub struct VuContext {
    pub api: Arc<dyn AnagramApi>,
    pub sink: Arc<MetricSink>,
    pub plan: Arc<IterationPlan>,
    pub active: ActiveVuCounter,
}

/// Runs iterations back to back until `retire` is cancelled.
///
/// Returns the number of iterations this slot completed.
pub async fn vu_loop(vu_id: u32, ctx: VuContext, retire: CancellationToken) -> u64 {
    ctx.active.increment();
    tracing::debug!(vu_id, "VU started");

    let mut iterations = 0u64;
    while !retire.is_cancelled() {
        let outcome = run_iteration(ctx.api.as_ref(), &ctx.sink, &ctx.plan).await;
        iterations += 1;
        if !outcome.passed() {
            tracing::trace!(
                vu_id,
                failed_steps = outcome.failed_steps(),
                "iteration had failed checks"
            );
        }
        // Keep a slot with an instantly-failing service from starving the runtime.
        tokio::task::yield_now().await;
    }

    tracing::debug!(vu_id, iterations, "VU retired");
    ctx.active.decrement();
    iterations
}
