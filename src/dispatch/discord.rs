//! Discord REST delivery.
//!
//! Direct messages wait for room in the per-minute window, so a cycle that
//! touches more communities than the limit is paced rather than truncated.
//! Replies never wait: a reply that does not fit is dropped.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::rate_limit::{OutboundRateLimiters, OutboundRoute, RateLimitConfig, RateLimitError};
use super::{DeliveryOutcome, MessageDispatcher};
use crate::config::DiscordConfig;
use crate::roster::MemberId;

/// Discord REST delivery: opens (and caches) a DM channel per recipient,
/// then posts to it.
pub struct DiscordDispatcher {
    bot_token: String,
    api_base_url: String,
    client: reqwest::Client,
    limiters: Mutex<OutboundRateLimiters>,
    dm_channels: Mutex<HashMap<MemberId, String>>,
    max_rate_wait: Duration,
    shutdown: CancellationToken,
}

/// Upper bound on how long one direct message waits for the rate limiter.
const DEFAULT_MAX_RATE_WAIT: Duration = Duration::from_secs(300);

impl DiscordDispatcher {
    pub fn new(config: &DiscordConfig, limits: &RateLimitConfig) -> Self {
        Self {
            bot_token: config.bot_token.clone(),
            api_base_url: config.api_base_url.trim_end_matches('/').to_owned(),
            client: reqwest::Client::new(),
            limiters: Mutex::new(OutboundRateLimiters::new(limits)),
            dm_channels: Mutex::new(HashMap::new()),
            max_rate_wait: DEFAULT_MAX_RATE_WAIT,
            shutdown: CancellationToken::new(),
        }
    }

    /// Abandon rate-limit waits once `token` is cancelled.
    #[must_use]
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    #[must_use]
    pub fn with_max_rate_wait(mut self, max: Duration) -> Self {
        self.max_rate_wait = max;
        self
    }

    fn authorization(&self) -> String {
        format!("Bot {}", self.bot_token)
    }

    fn check_rate(&self, route: OutboundRoute) -> Result<(), RateLimitError> {
        match self.limiters.lock() {
            Ok(mut limiters) => limiters.try_send(route),
            Err(poisoned) => poisoned.into_inner().try_send(route),
        }
    }

    /// Wait until the direct-message window has room, up to
    /// `max_rate_wait` in total.
    async fn acquire_direct(&self) -> Result<(), DeliveryOutcome> {
        let mut waited = Duration::ZERO;
        loop {
            let retry_after_secs = match self.check_rate(OutboundRoute::Direct) {
                Ok(()) => return Ok(()),
                Err(RateLimitError::Exceeded { retry_after_secs }) => retry_after_secs,
            };
            let pause = Duration::from_secs(retry_after_secs.max(1));
            if waited + pause > self.max_rate_wait {
                return Err(DeliveryOutcome::TransportError(format!(
                    "direct message rate limit still full after {}s",
                    waited.as_secs()
                )));
            }
            debug!(retry_after_secs, "direct message rate limit reached; waiting");
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    return Err(DeliveryOutcome::TransportError(
                        "shutting down while rate limited".to_owned(),
                    ));
                }
                _ = tokio::time::sleep(pause) => waited += pause,
            }
        }
    }

    fn cached_dm_channel(&self, recipient: &MemberId) -> Option<String> {
        self.dm_channels
            .lock()
            .ok()
            .and_then(|cache| cache.get(recipient).cloned())
    }

    async fn open_dm_channel(&self, recipient: &MemberId) -> Result<String, DeliveryOutcome> {
        if let Some(channel) = self.cached_dm_channel(recipient) {
            return Ok(channel);
        }

        let url = format!("{}/users/@me/channels", self.api_base_url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", self.authorization())
            .json(&json!({ "recipient_id": recipient.as_str() }))
            .send()
            .await
            .map_err(|e| DeliveryOutcome::TransportError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_failure(status, &body));
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| DeliveryOutcome::TransportError(e.to_string()))?;
        let channel = payload
            .get("id")
            .and_then(serde_json::Value::as_str)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                DeliveryOutcome::TransportError("DM channel response without id".to_owned())
            })?
            .to_owned();

        if let Ok(mut cache) = self.dm_channels.lock() {
            cache.insert(recipient.clone(), channel.clone());
        }
        Ok(channel)
    }

    async fn post_message(&self, channel_id: &str, text: &str) -> DeliveryOutcome {
        let url = format!("{}/channels/{channel_id}/messages", self.api_base_url);
        let response = match self
            .client
            .post(&url)
            .header("Authorization", self.authorization())
            .json(&json!({ "content": text }))
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return DeliveryOutcome::TransportError(e.to_string()),
        };

        let status = response.status();
        if status.is_success() {
            return DeliveryOutcome::Sent;
        }
        let body = response.text().await.unwrap_or_default();
        classify_failure(status, &body)
    }
}

fn classify_failure(status: StatusCode, body: &str) -> DeliveryOutcome {
    match status {
        StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => {
            debug!(%status, "discord recipient unavailable: {body}");
            DeliveryOutcome::RecipientUnavailable
        }
        _ => {
            warn!(%status, "discord send failed: {body}");
            DeliveryOutcome::TransportError(format!("discord send failed ({status})"))
        }
    }
}

#[async_trait]
impl MessageDispatcher for DiscordDispatcher {
    async fn send(&self, recipient: &MemberId, text: &str) -> DeliveryOutcome {
        if let Err(outcome) = self.acquire_direct().await {
            return outcome;
        }
        let channel = match self.open_dm_channel(recipient).await {
            Ok(channel) => channel,
            Err(outcome) => return outcome,
        };
        let outcome = self.post_message(&channel, text).await;
        if outcome == DeliveryOutcome::RecipientUnavailable
            && let Ok(mut cache) = self.dm_channels.lock()
        {
            cache.remove(recipient);
        }
        outcome
    }

    async fn reply(&self, reply_target: &str, text: &str) -> DeliveryOutcome {
        if let Err(e) = self.check_rate(OutboundRoute::Reply) {
            return DeliveryOutcome::TransportError(e.to_string());
        }
        self.post_message(reply_target, text).await
    }
}
