//! Scheduler background loop.
//!
//! `Idle -> Scheduled(fire_at) -> Firing -> Scheduled(...)`. Each entry into
//! `Scheduled` draws a fresh delay uniformly from `[0, max_wait)`. The coarse
//! re-arm tick only matters while `Idle`; while a timer is pending or a cycle
//! is running it is dropped, so timer-driven cycles never overlap.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::cycle::{CycleReport, CycleRunner};
use crate::config::SchedulerConfig;
use crate::context::BotContext;
use crate::roster::CommunityId;

/// Observable scheduler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerPhase {
    Idle,
    Scheduled { fire_at: Instant },
    Firing,
    Stopped,
}

/// Timer-driven notification loop. Call [`NotificationScheduler::start`] to
/// spawn it.
pub struct NotificationScheduler {
    runner: Arc<CycleRunner>,
    max_wait: Duration,
    rearm_interval: Duration,
    rng: StdRng,
}

impl NotificationScheduler {
    pub fn new(ctx: BotContext, config: &SchedulerConfig, message: impl Into<String>) -> Self {
        Self {
            runner: Arc::new(CycleRunner::new(ctx, message)),
            max_wait: Duration::from_secs(config.max_wait_secs),
            rearm_interval: Duration::from_secs(config.rearm_interval_secs.max(1)),
            rng: StdRng::from_entropy(),
        }
    }

    /// Use a deterministic delay sequence.
    #[must_use]
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Spawn the loop on the current runtime.
    pub fn start(self) -> SchedulerHandle {
        let (phase_tx, _) = watch::channel(SchedulerPhase::Idle);
        let shared = Arc::new(Shared {
            runner: Arc::clone(&self.runner),
            phase: phase_tx,
            wake: Notify::new(),
            cancel: CancellationToken::new(),
            completed_cycles: AtomicU64::new(0),
            task: Mutex::new(None),
        });

        let task = tokio::spawn(run_loop(
            Arc::clone(&shared),
            self.max_wait,
            self.rearm_interval,
            self.rng,
        ));
        *shared.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(task);

        SchedulerHandle { shared }
    }
}

struct Shared {
    runner: Arc<CycleRunner>,
    phase: watch::Sender<SchedulerPhase>,
    wake: Notify,
    cancel: CancellationToken,
    completed_cycles: AtomicU64,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Shared {
    fn set_phase(&self, phase: SchedulerPhase) {
        self.phase.send_replace(phase);
    }
}

/// Cloneable control surface for a running scheduler.
#[derive(Clone)]
pub struct SchedulerHandle {
    shared: Arc<Shared>,
}

impl SchedulerHandle {
    /// Subscribe to phase changes.
    pub fn phase(&self) -> watch::Receiver<SchedulerPhase> {
        self.shared.phase.subscribe()
    }

    #[must_use]
    pub fn current_phase(&self) -> SchedulerPhase {
        *self.shared.phase.borrow()
    }

    /// Timer-driven cycles finished so far.
    #[must_use]
    pub fn completed_cycles(&self) -> u64 {
        self.shared.completed_cycles.load(Ordering::Acquire)
    }

    /// Run a cycle for `communities` now. Shares the per-community in-flight
    /// guard with the timer loop. Does nothing once shut down.
    pub async fn fire(&self, communities: &[CommunityId]) -> CycleReport {
        if self.shared.cancel.is_cancelled() {
            return CycleReport::default();
        }
        self.shared.runner.run_for(communities).await
    }

    /// Leave `Idle` without waiting for the re-arm tick.
    pub fn wake(&self) {
        self.shared.wake.notify_one();
    }

    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    /// Cancel any pending timer and wait for the loop to exit. An in-flight
    /// cycle finishes first.
    pub async fn shutdown(&self) {
        self.shared.cancel.cancel();
        let task = self
            .shared
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task
            && let Err(e) = task.await
        {
            tracing::error!("scheduler task ended abnormally: {e}");
        }
    }
}

fn draw_delay<R: Rng + ?Sized>(rng: &mut R, max_wait: Duration) -> Duration {
    if max_wait.is_zero() {
        return Duration::ZERO;
    }
    rng.gen_range(Duration::ZERO..max_wait)
}

async fn run_loop(
    shared: Arc<Shared>,
    max_wait: Duration,
    rearm_interval: Duration,
    mut rng: StdRng,
) {
    info!(
        max_wait_secs = max_wait.as_secs(),
        rearm_secs = rearm_interval.as_secs(),
        "notification scheduler started"
    );
    let mut rearm = tokio::time::interval_at(Instant::now() + rearm_interval, rearm_interval);
    rearm.set_missed_tick_behavior(MissedTickBehavior::Skip);

    'outer: loop {
        if !shared.runner.has_enabled_communities() {
            shared.set_phase(SchedulerPhase::Idle);
            debug!("no enabled communities; scheduler idle");
            tokio::select! {
                _ = shared.cancel.cancelled() => break 'outer,
                _ = rearm.tick() => {}
                _ = shared.wake.notified() => {}
            }
            continue;
        }

        let fire_at = Instant::now() + draw_delay(&mut rng, max_wait);
        shared.set_phase(SchedulerPhase::Scheduled { fire_at });
        debug!(
            in_secs = fire_at.saturating_duration_since(Instant::now()).as_secs(),
            "next cycle scheduled"
        );

        let timer = tokio::time::sleep_until(fire_at);
        tokio::pin!(timer);
        loop {
            tokio::select! {
                biased;
                _ = shared.cancel.cancelled() => break 'outer,
                _ = &mut timer => break,
                _ = rearm.tick() => {
                    debug!("re-arm tick ignored; a cycle is already scheduled");
                }
            }
        }

        shared.set_phase(SchedulerPhase::Firing);
        let report = shared.runner.run_enabled().await;
        shared.completed_cycles.fetch_add(1, Ordering::AcqRel);
        info!(
            communities = report.outcomes.len(),
            delivered = report.delivered(),
            "cycle complete"
        );
    }

    shared.set_phase(SchedulerPhase::Stopped);
    info!("notification scheduler stopped");
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::dispatch::RecordingDispatcher;
    use crate::roster::{ObservedCommunity, ObservedMember, PermissionStore, RosterSynchronizer};

    fn config(max_wait_secs: u64, rearm_interval_secs: u64) -> SchedulerConfig {
        SchedulerConfig {
            max_wait_secs,
            rearm_interval_secs,
        }
    }

    fn store_with_member() -> Arc<PermissionStore> {
        let store = Arc::new(PermissionStore::open_in_memory().expect("open"));
        RosterSynchronizer::new(Arc::clone(&store))
            .reconcile(
                &ObservedMember::new("u1", "one"),
                Some(&ObservedCommunity::new("g1", "Guild")),
            )
            .expect("seed");
        store
    }

    #[test]
    fn delay_is_within_bounds() {
        let mut rng = StdRng::seed_from_u64(1);
        let max = Duration::from_secs(10);
        for _ in 0..500 {
            assert!(draw_delay(&mut rng, max) < max);
        }
        assert_eq!(draw_delay(&mut rng, Duration::ZERO), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn fires_repeatedly_with_fresh_delays() {
        let store = store_with_member();
        let dispatcher = Arc::new(RecordingDispatcher::new());
        let handle = NotificationScheduler::new(
            BotContext::new(store, dispatcher.clone()),
            &config(30, 3_600),
            "hi",
        )
        .with_rng_seed(3)
        .start();

        while handle.completed_cycles() < 4 {
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        handle.shutdown().await;

        assert!(dispatcher.sent().len() >= 4);
        assert_eq!(handle.current_phase(), SchedulerPhase::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn rearm_ticks_never_add_cycles() {
        let store = store_with_member();
        let dispatcher = Arc::new(RecordingDispatcher::new());
        let handle = NotificationScheduler::new(
            BotContext::new(store, dispatcher.clone()),
            &config(100, 1),
            "hi",
        )
        .with_rng_seed(9)
        .start();

        tokio::time::sleep(Duration::from_secs(1_000)).await;
        handle.shutdown().await;

        let cycles = handle.completed_cycles();
        assert!(cycles > 0);
        // One enabled community with one eligible member: one send per cycle.
        assert_eq!(dispatcher.send_attempts() as u64, cycles);
    }

    #[tokio::test(start_paused = true)]
    async fn idles_without_enabled_communities_until_woken() {
        let store = store_with_member();
        let g1 = CommunityId::new("g1");
        store.set_enabled(&g1, false).expect("disable");
        let dispatcher = Arc::new(RecordingDispatcher::new());
        let handle = NotificationScheduler::new(
            BotContext::new(Arc::clone(&store), dispatcher.clone()),
            &config(10, 86_400),
            "hi",
        )
        .start();

        let mut phase = handle.phase();
        phase
            .wait_for(|p| *p == SchedulerPhase::Idle)
            .await
            .expect("idle");
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(dispatcher.send_attempts(), 0);

        store.set_enabled(&g1, true).expect("enable");
        handle.wake();
        phase
            .wait_for(|p| matches!(p, SchedulerPhase::Scheduled { .. }))
            .await
            .expect("scheduled");

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_pending_timer() {
        let store = store_with_member();
        let dispatcher = Arc::new(RecordingDispatcher::new());
        let handle = NotificationScheduler::new(
            BotContext::new(store, dispatcher.clone()),
            &config(86_400, 3_600),
            "hi",
        )
        .start();

        let mut phase = handle.phase();
        phase
            .wait_for(|p| matches!(p, SchedulerPhase::Scheduled { .. }))
            .await
            .expect("scheduled");
        handle.shutdown().await;
        assert!(handle.is_shut_down());

        tokio::time::sleep(Duration::from_secs(200_000)).await;
        assert_eq!(dispatcher.send_attempts(), 0);
        assert!(handle.fire(&[CommunityId::new("g1")]).await.outcomes.is_empty());
    }
}
