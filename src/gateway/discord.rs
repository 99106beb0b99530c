//! Discord gateway session.
//!
//! Each [`EventSource::run`] call drives one websocket session and turns
//! dispatches into [`GatewayEvent`]s. Every way a session can end is an
//! error; reconnecting is left to the runtime's backoff loop.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info};

use super::payload::{AdminPolicy, GatewayTranslator, needs_member_request};
use super::{EventSource, GatewayEvent};
use crate::config::DiscordConfig;

/// GUILDS | GUILD_MEMBERS | GUILD_MESSAGES | DIRECT_MESSAGES | MESSAGE_CONTENT
pub const INTENTS: u64 = 1 | (1 << 1) | (1 << 9) | (1 << 12) | (1 << 15);

const DEFAULT_HEARTBEAT_MS: u64 = 41_250;

const OP_DISPATCH: u64 = 0;
const OP_HEARTBEAT: u64 = 1;
const OP_IDENTIFY: u64 = 2;
const OP_REQUEST_GUILD_MEMBERS: u64 = 8;
const OP_RECONNECT: u64 = 7;
const OP_INVALID_SESSION: u64 = 9;
const OP_HEARTBEAT_ACK: u64 = 11;

/// Discord gateway client: websocket session plus the REST call that
/// discovers the gateway URL.
pub struct DiscordGateway {
    bot_token: String,
    api_base_url: String,
    gateway_url: Option<String>,
    activity: String,
    policy: AdminPolicy,
    client: reqwest::Client,
}

impl DiscordGateway {
    pub fn new(config: &DiscordConfig) -> Self {
        Self {
            bot_token: config.bot_token.clone(),
            api_base_url: config.api_base_url.trim_end_matches('/').to_owned(),
            gateway_url: config.gateway_url.clone(),
            activity: config.activity.clone(),
            policy: AdminPolicy::from_config(config),
            client: reqwest::Client::new(),
        }
    }

    /// Bot tokens start with the base64-encoded user id.
    fn bot_user_id_from_token(token: &str) -> Option<String> {
        let first = token.split('.').next()?;
        let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(first.trim_end_matches('='))
            .ok()?;
        String::from_utf8(decoded).ok()
    }

    async fn resolve_gateway_url(&self) -> anyhow::Result<String> {
        let base = match &self.gateway_url {
            Some(url) => url.clone(),
            None => {
                let response: Value = self
                    .client
                    .get(format!("{}/gateway/bot", self.api_base_url))
                    .header("Authorization", format!("Bot {}", self.bot_token))
                    .send()
                    .await?
                    .error_for_status()?
                    .json()
                    .await?;
                response
                    .get("url")
                    .and_then(Value::as_str)
                    .unwrap_or("wss://gateway.discord.gg")
                    .to_owned()
            }
        };
        Ok(with_query(&base))
    }

    fn identify_payload(&self) -> Value {
        let presence = if self.activity.trim().is_empty() {
            Value::Null
        } else {
            json!({
                "since": Value::Null,
                "activities": [{"name": self.activity, "type": 0}],
                "status": "online",
                "afk": false
            })
        };
        json!({
            "op": OP_IDENTIFY,
            "d": {
                "token": self.bot_token,
                "intents": INTENTS,
                "properties": {
                    "os": std::env::consts::OS,
                    "browser": "nudge",
                    "device": "nudge"
                },
                "presence": presence
            }
        })
    }
}

fn with_query(base: &str) -> String {
    if base.contains('?') {
        base.to_owned()
    } else {
        format!("{}/?v=10&encoding=json", base.trim_end_matches('/'))
    }
}

fn heartbeat_payload(seq: Option<u64>) -> Value {
    json!({"op": OP_HEARTBEAT, "d": seq})
}

fn request_members_payload(guild_id: &str) -> Value {
    json!({
        "op": OP_REQUEST_GUILD_MEMBERS,
        "d": {"guild_id": guild_id, "query": "", "limit": 0}
    })
}

#[async_trait]
impl EventSource for DiscordGateway {
    fn id(&self) -> &'static str {
        "discord"
    }

    async fn run(&self, events: mpsc::Sender<GatewayEvent>) -> anyhow::Result<()> {
        if self.bot_token.trim().is_empty() {
            anyhow::bail!("discord bot token is empty");
        }

        let ws_url = self.resolve_gateway_url().await?;
        let (stream, _) = tokio_tungstenite::connect_async(&ws_url).await?;
        let (mut write, mut read) = stream.split();

        let hello = read
            .next()
            .await
            .ok_or_else(|| anyhow::anyhow!("no hello"))??;
        let hello_text = match hello {
            Message::Text(text) => text.to_string(),
            _ => anyhow::bail!("unexpected discord hello payload"),
        };
        let hello_json: Value = serde_json::from_str(&hello_text)?;
        let heartbeat_ms = hello_json
            .get("d")
            .and_then(|v| v.get("heartbeat_interval"))
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_HEARTBEAT_MS);

        write
            .send(Message::Text(self.identify_payload().to_string()))
            .await?;

        let mut translator = GatewayTranslator::new(
            self.policy.clone(),
            Self::bot_user_id_from_token(&self.bot_token),
        );
        let period = Duration::from_millis(heartbeat_ms);
        let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
        let mut seq: Option<u64> = None;
        let mut awaiting_ack = false;

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    if awaiting_ack {
                        anyhow::bail!("discord heartbeat not acknowledged");
                    }
                    write.send(Message::Text(heartbeat_payload(seq).to_string())).await?;
                    awaiting_ack = true;
                }
                maybe_msg = read.next() => {
                    let raw = match maybe_msg {
                        Some(Ok(Message::Text(text))) => text.to_string(),
                        Some(Ok(Message::Close(frame))) => {
                            anyhow::bail!("discord websocket closed: {frame:?}");
                        }
                        None => anyhow::bail!("discord websocket closed"),
                        Some(Ok(_)) => continue,
                        Some(Err(err)) => anyhow::bail!("discord websocket error: {err}"),
                    };

                    let payload: Value = match serde_json::from_str(&raw) {
                        Ok(v) => v,
                        Err(_) => continue,
                    };
                    if let Some(s) = payload.get("s").and_then(Value::as_u64) {
                        seq = Some(s);
                    }

                    match payload.get("op").and_then(Value::as_u64) {
                        Some(OP_DISPATCH) => {
                            let name = payload.get("t").and_then(Value::as_str).unwrap_or_default();
                            let data = payload.get("d").unwrap_or(&Value::Null);
                            if name == "GUILD_CREATE" && needs_member_request(data)
                                && let Some(guild_id) = data.get("id").and_then(Value::as_str)
                            {
                                write
                                    .send(Message::Text(request_members_payload(guild_id).to_string()))
                                    .await?;
                            }
                            if let Some(event) = translator.translate(name, data) {
                                if let GatewayEvent::Ready { bot_id } = &event {
                                    info!(bot_id = %bot_id, "discord session ready");
                                }
                                if events.send(event).await.is_err() {
                                    anyhow::bail!("discord inbound channel closed");
                                }
                            }
                        }
                        Some(OP_HEARTBEAT) => {
                            write.send(Message::Text(heartbeat_payload(seq).to_string())).await?;
                        }
                        Some(OP_HEARTBEAT_ACK) => awaiting_ack = false,
                        Some(OP_RECONNECT) => anyhow::bail!("discord requested reconnect"),
                        Some(OP_INVALID_SESSION) => anyhow::bail!("discord session invalidated"),
                        other => debug!(op = ?other, "ignoring gateway payload"),
                    }
                }
            }
        }
    }
}
