//! Inbound event handling.
//!
//! Every event is reconciled into the roster first and only then, if it was
//! addressed to the bot, interpreted as a command. Reconciliation is fully
//! finished before any read that depends on it.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::auth::{Authorization, CommandAuthorizer};
use crate::commands::{self, CommandKind, CommandSpec};
use crate::config::MessageTemplates;
use crate::context::BotContext;
use crate::dispatch::{DeliveryOutcome, MessageDispatcher};
use crate::roster::{
    CommunityId, ObservedCommunity, ObservedMember, PermissionStore, RosterSynchronizer,
};
use crate::scheduler::SchedulerHandle;

/// Reply to `ping`.
pub const PONG: &str = "pong";
/// Reply to `fire` before the cycle runs.
pub const FIRING: &str = "Firing.";

/// A message as delivered by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    /// Author, with `is_admin` carrying the platform's live admin signal for
    /// `community`.
    pub author: ObservedMember,
    pub community: Option<ObservedCommunity>,
    /// Channel to answer in.
    pub reply_target: String,
    pub text: String,
    pub mentions_this_bot: bool,
    pub is_direct_message: bool,
}

impl InboundEvent {
    fn addressed_to_bot(&self) -> bool {
        self.is_direct_message || self.mentions_this_bot
    }

    fn community_id(&self) -> Option<&CommunityId> {
        self.community.as_ref().map(|c| &c.id)
    }
}

/// What the handler did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOutcome {
    /// Bot author; nothing recorded.
    Ignored,
    /// Roster reconciliation failed; command effects were skipped.
    ReconcileFailed,
    /// Reconciled; the text was not a command for this bot.
    NoCommand,
    /// Command not valid in this context.
    Rejected(CommandKind),
    /// Privileged command refused.
    Denied(CommandKind),
    /// Command ran but a store operation failed.
    Failed(CommandKind),
    Executed(CommandKind),
}

/// Applies inbound events: reconcile, gate, authorize, act, reply.
pub struct EventHandler {
    store: Arc<PermissionStore>,
    dispatcher: Arc<dyn MessageDispatcher>,
    synchronizer: RosterSynchronizer,
    authorizer: CommandAuthorizer,
    scheduler: SchedulerHandle,
    templates: MessageTemplates,
    bot_name: String,
}

impl EventHandler {
    pub fn new(ctx: &BotContext, scheduler: SchedulerHandle, templates: MessageTemplates) -> Self {
        Self {
            store: Arc::clone(&ctx.store),
            dispatcher: Arc::clone(&ctx.dispatcher),
            synchronizer: RosterSynchronizer::new(Arc::clone(&ctx.store)),
            authorizer: CommandAuthorizer::new(Arc::clone(&ctx.store)),
            scheduler,
            templates,
            bot_name: "Nudge".to_owned(),
        }
    }

    /// Name used in the help text.
    #[must_use]
    pub fn with_bot_name(mut self, name: impl Into<String>) -> Self {
        self.bot_name = name.into();
        self
    }

    pub fn synchronizer(&self) -> &RosterSynchronizer {
        &self.synchronizer
    }

    pub async fn handle(&self, event: &InboundEvent) -> HandleOutcome {
        if event.author.is_bot {
            return HandleOutcome::Ignored;
        }

        if let Err(e) = self
            .synchronizer
            .reconcile(&event.author, event.community.as_ref())
        {
            warn!(
                member = %e.member,
                community = ?event.community_id().map(CommunityId::as_str),
                "event skipped: {e}"
            );
            return HandleOutcome::ReconcileFailed;
        }

        if !event.addressed_to_bot() {
            return HandleOutcome::NoCommand;
        }
        let Some(spec) = commands::parse(&event.text) else {
            return HandleOutcome::NoCommand;
        };

        if let Some(reason) = spec
            .capabilities
            .context_violation(event.is_direct_message, event.community.is_some())
        {
            debug!(command = spec.name, member = %event.author.id, "{reason}");
            return HandleOutcome::Rejected(spec.kind);
        }

        let authorization = if spec.capabilities.needs_admin
            || matches!(spec.kind, CommandKind::Help | CommandKind::AmAdmin)
        {
            match self.authorizer.authorize(&event.author.id, event.community_id()) {
                Ok(decision) => decision,
                Err(e) => {
                    warn!(command = spec.name, member = %event.author.id, "authorization failed: {e}");
                    return HandleOutcome::Failed(spec.kind);
                }
            }
        } else {
            Authorization::Denied
        };

        if spec.capabilities.needs_admin && !authorization.is_allowed() {
            info!(command = spec.name, member = %event.author.id, "permission denied");
            self.reply(event, &self.templates.denied).await;
            return HandleOutcome::Denied(spec.kind);
        }

        self.execute(spec, event, &authorization).await
    }

    async fn execute(
        &self,
        spec: &CommandSpec,
        event: &InboundEvent,
        authorization: &Authorization,
    ) -> HandleOutcome {
        let kind = spec.kind;
        match kind {
            CommandKind::Help => {
                let text = commands::help_text(&self.bot_name, authorization.is_allowed());
                self.reply(event, &text).await;
            }
            CommandKind::Ping => self.reply(event, PONG).await,
            CommandKind::AmAdmin => {
                let answer = if authorization.is_allowed() { "Yes" } else { "No" };
                self.reply(event, answer).await;
            }
            CommandKind::Enable | CommandKind::Disable => {
                let enabled = kind == CommandKind::Enable;
                for community in authorization.scope() {
                    if let Err(e) = self.store.set_enabled(&community, enabled) {
                        warn!(community = %community, "cannot update community: {e}");
                        return HandleOutcome::Failed(kind);
                    }
                    info!(community = %community, enabled, member = %event.author.id, "community toggled");
                }
                if enabled {
                    self.scheduler.wake();
                }
                let template = if enabled {
                    &self.templates.activate
                } else {
                    &self.templates.deactivate
                };
                self.reply(event, template).await;
            }
            CommandKind::Fire => {
                self.reply(event, FIRING).await;
                // Runs beside the event worker; a cycle can wait on rate limits.
                let scheduler = self.scheduler.clone();
                let scope = authorization.scope();
                let member = event.author.id.clone();
                tokio::spawn(async move {
                    let report = scheduler.fire(&scope).await;
                    info!(
                        member = %member,
                        delivered = report.delivered(),
                        "manual cycle complete"
                    );
                });
            }
            CommandKind::Stop | CommandKind::Start => {
                let consent = kind == CommandKind::Start;
                if let Err(e) = self.store.set_consent(&event.author.id, consent) {
                    warn!(member = %event.author.id, "cannot update consent: {e}");
                    return HandleOutcome::Failed(kind);
                }
                let template = if consent {
                    &self.templates.yes
                } else {
                    &self.templates.no
                };
                self.reply(event, template).await;
            }
        }
        HandleOutcome::Executed(kind)
    }

    async fn reply(&self, event: &InboundEvent, text: &str) {
        match self.dispatcher.reply(&event.reply_target, text).await {
            DeliveryOutcome::Sent => {}
            other => debug!(reply_target = %event.reply_target, ?other, "reply not delivered"),
        }
    }
}
