//! In-process dispatcher that records deliveries instead of sending them.
//!
//! Used by tests and by dry runs. Recipients can be marked unreachable or
//! failing to exercise the skip-and-continue paths.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{DeliveryOutcome, MessageDispatcher};
use crate::roster::MemberId;

#[derive(Debug, Default)]
struct Recorded {
    sent: Vec<(MemberId, String)>,
    replies: Vec<(String, String)>,
    attempts: usize,
}

/// Records every delivery attempt.
#[derive(Debug, Default)]
pub struct RecordingDispatcher {
    recorded: Mutex<Recorded>,
    unavailable: Mutex<HashSet<MemberId>>,
    failing: Mutex<HashSet<MemberId>>,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sends to `member` report [`DeliveryOutcome::RecipientUnavailable`].
    pub fn mark_unavailable(&self, member: MemberId) {
        if let Ok(mut set) = self.unavailable.lock() {
            set.insert(member);
        }
    }

    /// Sends to `member` report [`DeliveryOutcome::TransportError`].
    pub fn mark_failing(&self, member: MemberId) {
        if let Ok(mut set) = self.failing.lock() {
            set.insert(member);
        }
    }

    /// Successful direct messages, in order.
    pub fn sent(&self) -> Vec<(MemberId, String)> {
        self.recorded
            .lock()
            .map(|r| r.sent.clone())
            .unwrap_or_default()
    }

    /// Channel replies, in order, as `(reply_target, text)`.
    pub fn replies(&self) -> Vec<(String, String)> {
        self.recorded
            .lock()
            .map(|r| r.replies.clone())
            .unwrap_or_default()
    }

    /// Every `send` call, including ones that did not deliver.
    pub fn send_attempts(&self) -> usize {
        self.recorded.lock().map(|r| r.attempts).unwrap_or_default()
    }

    fn contains(set: &Mutex<HashSet<MemberId>>, member: &MemberId) -> bool {
        set.lock().map(|s| s.contains(member)).unwrap_or(false)
    }
}

#[async_trait]
impl MessageDispatcher for RecordingDispatcher {
    async fn send(&self, recipient: &MemberId, text: &str) -> DeliveryOutcome {
        let Ok(mut recorded) = self.recorded.lock() else {
            return DeliveryOutcome::TransportError("recorder lock poisoned".to_owned());
        };
        recorded.attempts += 1;

        if Self::contains(&self.unavailable, recipient) {
            return DeliveryOutcome::RecipientUnavailable;
        }
        if Self::contains(&self.failing, recipient) {
            return DeliveryOutcome::TransportError("simulated failure".to_owned());
        }
        recorded.sent.push((recipient.clone(), text.to_owned()));
        DeliveryOutcome::Sent
    }

    async fn reply(&self, reply_target: &str, text: &str) -> DeliveryOutcome {
        let Ok(mut recorded) = self.recorded.lock() else {
            return DeliveryOutcome::TransportError("recorder lock poisoned".to_owned());
        };
        recorded
            .replies
            .push((reply_target.to_owned(), text.to_owned()));
        DeliveryOutcome::Sent
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[tokio::test]
    async fn unavailable_recipient_is_not_recorded_as_sent() {
        let dispatcher = RecordingDispatcher::new();
        let gone = MemberId::new("gone");
        dispatcher.mark_unavailable(gone.clone());

        assert_eq!(
            dispatcher.send(&gone, "hi").await,
            DeliveryOutcome::RecipientUnavailable
        );
        assert!(dispatcher.send(&MemberId::new("here"), "hi").await.is_sent());

        assert_eq!(dispatcher.send_attempts(), 2);
        assert_eq!(dispatcher.sent(), vec![(MemberId::new("here"), "hi".to_owned())]);
    }

    #[tokio::test]
    async fn replies_are_kept_separately() {
        let dispatcher = RecordingDispatcher::new();
        dispatcher.reply("chan-1", "pong").await;
        assert!(dispatcher.sent().is_empty());
        assert_eq!(
            dispatcher.replies(),
            vec![("chan-1".to_owned(), "pong".to_owned())]
        );
    }
}
