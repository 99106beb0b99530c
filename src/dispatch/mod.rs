//! Outbound message delivery.
//!
//! The scheduler and the command handler talk to the platform only through
//! [`MessageDispatcher`]. Delivery problems come back as a
//! [`DeliveryOutcome`] value rather than an error, so a batch can inspect
//! each result and keep going.

pub mod discord;
pub mod rate_limit;
pub mod recording;

use async_trait::async_trait;

use crate::roster::MemberId;

pub use discord::DiscordDispatcher;
pub use rate_limit::{RateLimitConfig, RateLimitError, RateLimiter};
pub use recording::RecordingDispatcher;

/// Result of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Sent,
    /// The recipient cannot be reached (left, blocked DMs, unknown user).
    RecipientUnavailable,
    /// The transport failed; the message may be retried on a later cycle.
    TransportError(String),
}

impl DeliveryOutcome {
    #[must_use]
    pub fn is_sent(&self) -> bool {
        matches!(self, Self::Sent)
    }
}

/// Send-side contract for the platform client.
#[async_trait]
pub trait MessageDispatcher: Send + Sync {
    /// Deliver `text` privately to `recipient`.
    async fn send(&self, recipient: &MemberId, text: &str) -> DeliveryOutcome;

    /// Post `text` to the channel a command arrived on.
    async fn reply(&self, reply_target: &str, text: &str) -> DeliveryOutcome;
}
