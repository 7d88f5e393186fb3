//! Stage scheduler: keeps the live virtual-user population on the ramp.
//!
//! [`StageProfile`] is the pure ramp function C(t): piecewise-linear between
//! stage boundaries, starting from `settings.start_vus` and holding the last
//! target after the final stage. [`StageScheduler`] reconciles the slot pool
//! with `floor(C(t))` on a fixed interval:
//!
//! - **Below target**: spawn slots, each with its own child
//!   [`CancellationToken`] tracked by a [`TaskTracker`].
//! - **Above target**: retire slots LIFO (last spawned, first retired). A
//!   retired slot finishes its in-flight iteration and exits.
//! - **End of profile** (or Ctrl+C): retire everything and wait for the pool
//!   to drain.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::loadtest::config::{LoadTestConfig, Stage};

/// Guards `floor` against float noise at exact stage boundaries.
const FLOOR_EPSILON: f64 = 1e-9;

/// Piecewise-linear target concurrency over time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageProfile {
    start_vus: u32,
    stages: Vec<Stage>,
}

impl StageProfile {
    pub fn new(start_vus: u32, stages: Vec<Stage>) -> Self {
        Self { start_vus, stages }
    }

    pub fn from_config(config: &LoadTestConfig) -> Self {
        Self::new(config.settings.start_vus, config.stage.clone())
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    pub fn total_duration(&self) -> Duration {
        self.stages.iter().map(Stage::duration).sum()
    }

    /// C(t): interpolated target concurrency at offset `t` from run start.
    pub fn target_at(&self, t: Duration) -> f64 {
        let t = t.as_secs_f64();
        let mut level = f64::from(self.start_vus);
        let mut stage_start = 0.0;
        for stage in &self.stages {
            let length = stage.duration().as_secs_f64();
            let target = f64::from(stage.target_vus);
            if length > 0.0 && t < stage_start + length {
                let progress = (t - stage_start).max(0.0) / length;
                return level + (target - level) * progress;
            }
            level = target;
            stage_start += length;
        }
        level
    }

    /// Number of slots that should be live at `t`: `floor(C(t))`.
    pub fn desired_vus(&self, t: Duration) -> u32 {
        let target = self.target_at(t) + FLOOR_EPSILON;
        target.floor().clamp(0.0, f64::from(u32::MAX)) as u32
    }

    /// Zero-based index of the stage active at `t`, clamped to the last stage.
    pub fn stage_index_at(&self, t: Duration) -> usize {
        let mut stage_end = Duration::ZERO;
        for (i, stage) in self.stages.iter().enumerate() {
            stage_end += stage.duration();
            if t < stage_end {
                return i;
            }
        }
        self.stages.len().saturating_sub(1)
    }
}

/// Scheduler state published on every reconcile for the live display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerStatus {
    pub stage_index: usize,
    pub stage_count: usize,
    pub desired_vus: u32,
    /// Slots not yet retired.
    pub live_vus: u32,
    pub elapsed: Duration,
}

impl SchedulerStatus {
    pub fn initial(stage_count: usize) -> Self {
        Self {
            stage_index: 0,
            stage_count,
            desired_vus: 0,
            live_vus: 0,
            elapsed: Duration::ZERO,
        }
    }

    /// Human-readable stage position, e.g. `"stage 2/4"`.
    pub fn stage_label(&self) -> String {
        format!("stage {}/{}", self.stage_index + 1, self.stage_count)
    }
}

/// What the scheduler did over a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleReport {
    /// Highest number of simultaneously live slots.
    pub peak_vus: u32,
    /// Slots spawned over the whole run.
    pub slots_spawned: u64,
    pub elapsed: Duration,
    /// `true` when the run was cut short by cancellation.
    pub interrupted: bool,
}

/// Live slots and their retirement tokens, newest last.
struct SlotPool {
    parent: CancellationToken,
    tracker: TaskTracker,
    slots: Vec<CancellationToken>,
    next_id: u32,
    spawned: u64,
    peak: u32,
}

impl SlotPool {
    fn new(parent: CancellationToken) -> Self {
        Self {
            parent,
            tracker: TaskTracker::new(),
            slots: Vec::new(),
            next_id: 0,
            spawned: 0,
            peak: 0,
        }
    }

    fn live(&self) -> u32 {
        u32::try_from(self.slots.len()).unwrap_or(u32::MAX)
    }

    fn spawn<F, Fut>(&mut self, spawn_slot: &mut F)
    where
        F: FnMut(u32, CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = self.parent.child_token();
        let id = self.next_id;
        self.tracker.spawn(spawn_slot(id, token.clone()));
        self.slots.push(token);
        self.next_id += 1;
        self.spawned += 1;
        self.peak = self.peak.max(self.live());
        tracing::debug!(vu_id = id, live = self.live(), "spawned slot");
    }

    fn retire_newest(&mut self) {
        if let Some(token) = self.slots.pop() {
            token.cancel();
            tracing::debug!(live = self.live(), "retired slot");
        }
    }

    fn reconcile<F, Fut>(&mut self, target: u32, spawn_slot: &mut F)
    where
        F: FnMut(u32, CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        while self.live() < target {
            self.spawn(spawn_slot);
        }
        while self.live() > target {
            self.retire_newest();
        }
    }

    /// Retires every slot and waits until all of them have exited.
    async fn drain(mut self) {
        while !self.slots.is_empty() {
            self.retire_newest();
        }
        self.tracker.close();
        self.tracker.wait().await;
    }
}

/// Drives the slot pool along a [`StageProfile`].
#[derive(Debug, Clone)]
pub struct StageScheduler {
    profile: StageProfile,
    reconcile_interval: Duration,
    max_vus: Option<u32>,
}

impl StageScheduler {
    pub fn new(profile: StageProfile, reconcile_interval: Duration) -> Self {
        Self {
            profile,
            reconcile_interval,
            max_vus: None,
        }
    }

    pub fn from_config(config: &LoadTestConfig) -> Self {
        Self::new(
            StageProfile::from_config(config),
            config.settings.reconcile_interval(),
        )
        .with_max_vus(config.settings.max_vus)
    }

    /// Caps live slots; above the cap the scheduler stops spawning.
    pub fn with_max_vus(mut self, max_vus: Option<u32>) -> Self {
        self.max_vus = max_vus;
        self
    }

    pub fn profile(&self) -> &StageProfile {
        &self.profile
    }

    fn status(&self, elapsed: Duration, desired_vus: u32, live_vus: u32) -> SchedulerStatus {
        SchedulerStatus {
            stage_index: self.profile.stage_index_at(elapsed),
            stage_count: self.profile.stage_count(),
            desired_vus,
            live_vus,
            elapsed,
        }
    }

    /// Runs the profile to completion (or until `cancel` fires), spawning
    /// slots through `spawn_slot(vu_id, retire_token)`.
    ///
    /// Returns only after every spawned slot has exited.
    pub async fn run<F, Fut>(
        &self,
        cancel: &CancellationToken,
        status_tx: &watch::Sender<SchedulerStatus>,
        mut spawn_slot: F,
    ) -> ScheduleReport
    where
        F: FnMut(u32, CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let started = Instant::now();
        let deadline = started + self.profile.total_duration();
        let mut pool = SlotPool::new(cancel.clone());
        let mut ticker = tokio::time::interval(self.reconcile_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let profile_end = tokio::time::sleep_until(deadline);
        tokio::pin!(profile_end);

        let mut current_stage: Option<usize> = None;
        let mut cap_warned = false;
        let mut interrupted = false;

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    interrupted = true;
                    break;
                }
                _ = &mut profile_end => break,
                _ = ticker.tick() => {}
            }

            let elapsed = started.elapsed();
            let stage_index = self.profile.stage_index_at(elapsed);
            if current_stage != Some(stage_index) {
                tracing::info!(
                    stage = stage_index + 1,
                    of = self.profile.stage_count(),
                    "entering stage"
                );
                current_stage = Some(stage_index);
            }

            let desired = self.profile.desired_vus(elapsed);
            let allowed = match self.max_vus {
                Some(cap) if desired > cap => {
                    if !cap_warned {
                        tracing::warn!(
                            desired,
                            max_vus = cap,
                            "target concurrency exceeds max_vus; holding at cap"
                        );
                        cap_warned = true;
                    }
                    cap
                }
                _ => desired,
            };

            pool.reconcile(allowed, &mut spawn_slot);
            status_tx.send_replace(self.status(elapsed, desired, pool.live()));
        }

        let peak_vus = pool.peak;
        let slots_spawned = pool.spawned;
        tracing::debug!(interrupted, "schedule finished, draining slots");
        status_tx.send_replace(self.status(started.elapsed(), 0, 0));
        pool.drain().await;

        ScheduleReport {
            peak_vus,
            slots_spawned,
            elapsed: started.elapsed(),
            interrupted,
        }
    }
}
