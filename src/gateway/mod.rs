//! Inbound platform events.
//!
//! An [`EventSource`] pushes [`GatewayEvent`]s into the runtime's queue. The
//! Discord implementation lives in [`discord`]; payload parsing is kept apart
//! in [`payload`] so it can be tested without a socket.

pub mod discord;
pub mod payload;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::handler::InboundEvent;
use crate::roster::{CommunityId, ObservedCommunity, ObservedMember, RosterSnapshot};

pub use discord::DiscordGateway;
pub use payload::{AdminPolicy, GatewayTranslator};

/// Platform event, already translated into roster terms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    /// Session established.
    Ready { bot_id: String },
    /// A message the bot can see.
    Message(InboundEvent),
    /// Full (or chunked) roster of one community.
    RosterSnapshot(RosterSnapshot),
    /// A member joined or their roles changed.
    MemberObserved {
        community: ObservedCommunity,
        member: ObservedMember,
    },
    /// The bot was removed from a community.
    CommunityRemoved(CommunityId),
}

/// Source of inbound events. `run` returns when the connection ends; the
/// runtime restarts it with backoff.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Stable identifier for logs.
    fn id(&self) -> &'static str;

    async fn run(&self, events: mpsc::Sender<GatewayEvent>) -> anyhow::Result<()>;
}
