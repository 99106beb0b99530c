//! One firing cycle: pick and message one eligible member per community.

use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

use tracing::{debug, info, warn};

use crate::context::BotContext;
use crate::dispatch::DeliveryOutcome;
use crate::roster::{CommunityId, MemberId};

/// What happened to one community during a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommunityOutcome {
    Delivered(MemberId),
    NoEligibleRecipient,
    RecipientUnavailable(MemberId),
    TransportFailed { recipient: MemberId, reason: String },
    StorageFailed(String),
    /// The community is disabled or no longer known.
    Disabled,
    /// Another cycle is already working on this community.
    AlreadyInFlight,
}

/// Per-community results of one cycle, in processing order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub outcomes: Vec<(CommunityId, CommunityOutcome)>,
}

impl CycleReport {
    #[must_use]
    pub fn delivered(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, CommunityOutcome::Delivered(_)))
            .count()
    }

    #[must_use]
    pub fn outcome_for(&self, community: &CommunityId) -> Option<&CommunityOutcome> {
        self.outcomes
            .iter()
            .find(|(id, _)| id == community)
            .map(|(_, outcome)| outcome)
    }
}

/// Runs cycles and guarantees at most one in-flight cycle per community.
pub struct CycleRunner {
    ctx: BotContext,
    message: String,
    in_flight: Mutex<HashSet<CommunityId>>,
}

struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<CommunityId>>,
    community: CommunityId,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.community);
    }
}

impl CycleRunner {
    pub fn new(ctx: BotContext, message: impl Into<String>) -> Self {
        Self {
            ctx,
            message: message.into(),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Whether any community is currently enabled. Storage errors count as
    /// "no" so the caller parks instead of spinning.
    pub fn has_enabled_communities(&self) -> bool {
        match self.ctx.store.enabled_communities() {
            Ok(communities) => !communities.is_empty(),
            Err(e) => {
                warn!("cannot list enabled communities: {e}");
                false
            }
        }
    }

    /// Cycle over every enabled community.
    pub async fn run_enabled(&self) -> CycleReport {
        let communities = match self.ctx.store.enabled_communities() {
            Ok(communities) => communities,
            Err(e) => {
                warn!("cycle skipped, cannot list enabled communities: {e}");
                return CycleReport::default();
            }
        };
        self.run_for(&communities).await
    }

    /// Cycle over `communities`. Each community is handled independently;
    /// an empty roster or a failed send never affects the others.
    pub async fn run_for(&self, communities: &[CommunityId]) -> CycleReport {
        let mut report = CycleReport::default();
        for community in communities {
            let outcome = match self.claim(community) {
                Some(_guard) => self.deliver_one(community).await,
                None => CommunityOutcome::AlreadyInFlight,
            };
            log_outcome(community, &outcome);
            report.outcomes.push((community.clone(), outcome));
        }
        report
    }

    fn claim(&self, community: &CommunityId) -> Option<InFlightGuard<'_>> {
        let mut set = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !set.insert(community.clone()) {
            return None;
        }
        Some(InFlightGuard {
            set: &self.in_flight,
            community: community.clone(),
        })
    }

    async fn deliver_one(&self, community: &CommunityId) -> CommunityOutcome {
        let store = &self.ctx.store;
        match store.community(community) {
            Ok(Some(row)) if row.enabled => {}
            Ok(_) => return CommunityOutcome::Disabled,
            Err(e) => return CommunityOutcome::StorageFailed(e.to_string()),
        }

        let recipient = match store.pick_eligible_recipient(community) {
            Ok(Some(recipient)) => recipient,
            Ok(None) => return CommunityOutcome::NoEligibleRecipient,
            Err(e) => return CommunityOutcome::StorageFailed(e.to_string()),
        };

        match self.ctx.dispatcher.send(&recipient, &self.message).await {
            DeliveryOutcome::Sent => CommunityOutcome::Delivered(recipient),
            DeliveryOutcome::RecipientUnavailable => {
                CommunityOutcome::RecipientUnavailable(recipient)
            }
            DeliveryOutcome::TransportError(reason) => {
                CommunityOutcome::TransportFailed { recipient, reason }
            }
        }
    }
}

fn log_outcome(community: &CommunityId, outcome: &CommunityOutcome) {
    match outcome {
        CommunityOutcome::Delivered(member) => {
            info!(community = %community, member = %member, "invitation sent");
        }
        CommunityOutcome::RecipientUnavailable(member) => {
            info!(community = %community, member = %member, "skipped unreachable member");
        }
        CommunityOutcome::TransportFailed { recipient, reason } => {
            warn!(community = %community, member = %recipient, "delivery failed: {reason}");
        }
        CommunityOutcome::StorageFailed(reason) => {
            warn!(community = %community, "storage error during cycle: {reason}");
        }
        CommunityOutcome::NoEligibleRecipient
        | CommunityOutcome::Disabled
        | CommunityOutcome::AlreadyInFlight => {
            debug!(community = %community, ?outcome, "community skipped");
        }
    }
}
