//! Runtime wiring: event source, sequential event queue and scheduler.
//!
//! Inbound events are applied one at a time from a single queue, so no two
//! events race on the roster. The scheduler runs beside it and shares only
//! the store and dispatcher through [`BotContext`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::BotConfig;
use crate::context::BotContext;
use crate::gateway::{EventSource, GatewayEvent};
use crate::handler::EventHandler;
use crate::roster::PermissionStore;
use crate::scheduler::{NotificationScheduler, SchedulerHandle};

const EVENT_QUEUE_SIZE: usize = 256;
const INITIAL_BACKOFF_SECS: u64 = 2;
const MAX_BACKOFF_SECS: u64 = 60;
/// A session that lasted this long resets the backoff.
const HEALTHY_SESSION: Duration = Duration::from_secs(60);

/// Running bot. Dropping it without [`BotRuntime::shutdown`] aborts the
/// background tasks.
pub struct BotRuntime {
    cancel: CancellationToken,
    scheduler: SchedulerHandle,
    workers: JoinSet<()>,
}

impl BotRuntime {
    /// Start the scheduler, the event worker and the event source.
    pub fn start(ctx: BotContext, config: &BotConfig, source: Arc<dyn EventSource>) -> Self {
        let cancel = CancellationToken::new();
        let scheduler = NotificationScheduler::new(
            ctx.clone(),
            &config.scheduler,
            config.messages.default.clone(),
        )
        .start();
        let handler = EventHandler::new(&ctx, scheduler.clone(), config.messages.clone())
            .with_bot_name(config.discord.bot_name.clone());

        let (tx, rx) = mpsc::channel::<GatewayEvent>(EVENT_QUEUE_SIZE);
        let mut workers = JoinSet::new();
        workers.spawn(run_event_worker(
            handler,
            Arc::clone(&ctx.store),
            rx,
            cancel.clone(),
        ));
        workers.spawn(run_source(source, tx, cancel.clone()));

        info!("bot runtime started");
        Self {
            cancel,
            scheduler,
            workers,
        }
    }

    pub fn scheduler(&self) -> &SchedulerHandle {
        &self.scheduler
    }

    /// Stop the event source, let the current event finish, stop the
    /// scheduler and wait for everything to exit.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        self.scheduler.shutdown().await;
        while let Some(result) = self.workers.join_next().await {
            if let Err(e) = result {
                warn!("runtime worker ended abnormally: {e}");
            }
        }
        info!("bot runtime stopped");
    }
}

async fn run_source(
    source: Arc<dyn EventSource>,
    tx: mpsc::Sender<GatewayEvent>,
    cancel: CancellationToken,
) {
    let mut backoff_secs = INITIAL_BACKOFF_SECS;
    loop {
        let started = Instant::now();
        tokio::select! {
            _ = cancel.cancelled() => break,
            result = source.run(tx.clone()) => match result {
                Ok(()) => warn!("event source {} stopped; restarting", source.id()),
                Err(err) => warn!(
                    "event source {} failed: {err}; retrying in {backoff_secs}s",
                    source.id()
                ),
            },
        }
        if started.elapsed() >= HEALTHY_SESSION {
            backoff_secs = INITIAL_BACKOFF_SECS;
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(Duration::from_secs(backoff_secs)) => {}
        }
        backoff_secs = backoff_secs.saturating_mul(2).min(MAX_BACKOFF_SECS);
    }
    debug!("event source {} stopped", source.id());
}

async fn run_event_worker(
    handler: EventHandler,
    store: Arc<PermissionStore>,
    mut rx: mpsc::Receiver<GatewayEvent>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        apply_event(&handler, &store, event).await;
    }
}

/// Apply one gateway event. Failures are logged and scoped to the event.
pub async fn apply_event(handler: &EventHandler, store: &PermissionStore, event: GatewayEvent) {
    match event {
        GatewayEvent::Ready { bot_id } => debug!(bot_id = %bot_id, "gateway ready"),
        GatewayEvent::Message(inbound) => {
            let outcome = handler.handle(&inbound).await;
            debug!(member = %inbound.author.id, ?outcome, "message handled");
        }
        GatewayEvent::RosterSnapshot(snapshot) => {
            if let Err(e) = handler.synchronizer().reconcile_roster(&snapshot) {
                warn!(community = %snapshot.community.id, "roster snapshot skipped: {e}");
            }
        }
        GatewayEvent::MemberObserved { community, member } => {
            if let Err(e) = handler.synchronizer().reconcile(&member, Some(&community)) {
                warn!(community = %community.id, "member update skipped: {e}");
            }
        }
        GatewayEvent::CommunityRemoved(community) => match store.remove_community(&community) {
            Ok(true) => info!(community = %community, "community removed"),
            Ok(false) => debug!(community = %community, "removed community was unknown"),
            Err(e) => warn!(community = %community, "cannot remove community: {e}"),
        },
    }
}
