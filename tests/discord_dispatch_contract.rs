//! Discord REST delivery contract.
//!
//! Verifies the request sequence the dispatcher issues and how HTTP failures
//! map onto delivery outcomes.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use nudge::config::DiscordConfig;
use nudge::dispatch::{DiscordDispatcher, RateLimitConfig};
use nudge::roster::{MemberId, ObservedCommunity, ObservedMember};
use nudge::scheduler::{CommunityOutcome, CycleRunner};
use nudge::{BotContext, DeliveryOutcome, MessageDispatcher, PermissionStore, RosterSynchronizer};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn dispatcher(server: &MockServer, limits: RateLimitConfig) -> DiscordDispatcher {
    let config = DiscordConfig {
        bot_token: "test-token".to_owned(),
        api_base_url: server.uri(),
        ..DiscordConfig::default()
    };
    DiscordDispatcher::new(&config, &limits)
}

async fn mount_dm_channel(server: &MockServer, recipient: &str, channel: &str, times: u64) {
    Mock::given(method("POST"))
        .and(path("/users/@me/channels"))
        .and(header("Authorization", "Bot test-token"))
        .and(body_partial_json(json!({"recipient_id": recipient})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": channel, "type": 1})))
        .expect(times)
        .mount(server)
        .await;
}

// ────────────────────────────────────────────────────────────────────────────
// Direct messages
// ────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn direct_message_opens_channel_then_posts() {
    let server = MockServer::start().await;
    mount_dm_channel(&server, "42", "dm-42", 1).await;
    Mock::given(method("POST"))
        .and(path("/channels/dm-42/messages"))
        .and(body_partial_json(json!({"content": "come over"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "m1"})))
        .expect(2)
        .mount(&server)
        .await;

    let dispatcher = dispatcher(&server, RateLimitConfig::default());
    let member = MemberId::new("42");
    assert_eq!(dispatcher.send(&member, "come over").await, DeliveryOutcome::Sent);
    // Second send reuses the cached channel.
    assert_eq!(dispatcher.send(&member, "come over").await, DeliveryOutcome::Sent);
}

#[tokio::test]
async fn forbidden_recipient_is_unavailable() {
    let server = MockServer::start().await;
    mount_dm_channel(&server, "7", "dm-7", 1).await;
    Mock::given(method("POST"))
        .and(path("/channels/dm-7/messages"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "message": "Cannot send messages to this user",
            "code": 50007
        })))
        .mount(&server)
        .await;

    let dispatcher = dispatcher(&server, RateLimitConfig::default());
    assert_eq!(
        dispatcher.send(&MemberId::new("7"), "hi").await,
        DeliveryOutcome::RecipientUnavailable
    );
}

#[tokio::test]
async fn unknown_user_when_opening_channel_is_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/users/@me/channels"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "message": "Unknown User",
            "code": 10013
        })))
        .mount(&server)
        .await;

    let dispatcher = dispatcher(&server, RateLimitConfig::default());
    assert_eq!(
        dispatcher.send(&MemberId::new("gone"), "hi").await,
        DeliveryOutcome::RecipientUnavailable
    );
}

#[tokio::test]
async fn server_error_is_a_transport_failure() {
    let server = MockServer::start().await;
    mount_dm_channel(&server, "9", "dm-9", 1).await;
    Mock::given(method("POST"))
        .and(path("/channels/dm-9/messages"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let dispatcher = dispatcher(&server, RateLimitConfig::default());
    let outcome = dispatcher.send(&MemberId::new("9"), "hi").await;
    assert!(matches!(outcome, DeliveryOutcome::TransportError(_)), "{outcome:?}");
}

#[tokio::test(start_paused = true)]
async fn cycles_past_the_direct_limit_are_paced_not_truncated() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/users/@me/channels"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "dm", "type": 1})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/channels/dm/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "m"})))
        .expect(16)
        .mount(&server)
        .await;

    let store = Arc::new(PermissionStore::open_in_memory().expect("open"));
    let sync = RosterSynchronizer::new(Arc::clone(&store));
    for i in 0..8 {
        sync.reconcile(
            &ObservedMember::new(format!("u{i}"), format!("member {i}")),
            Some(&ObservedCommunity::new(format!("g{i}"), format!("guild {i}"))),
        )
        .expect("reconcile");
    }
    let dispatcher = dispatcher(
        &server,
        RateLimitConfig {
            direct_per_minute: 5,
            replies_per_minute: 30,
        },
    );
    let runner = CycleRunner::new(BotContext::new(store, Arc::new(dispatcher)), "come over");

    for cycle in 0..2 {
        let report = runner.run_enabled().await;
        let missed: Vec<_> = report
            .outcomes
            .iter()
            .filter(|(_, outcome)| !matches!(outcome, CommunityOutcome::Delivered(_)))
            .collect();
        assert!(missed.is_empty(), "cycle {cycle} missed {missed:?}");
        assert_eq!(report.delivered(), 8);
    }
}

#[tokio::test]
async fn rate_limit_wait_is_bounded() {
    let server = MockServer::start().await;
    mount_dm_channel(&server, "1", "dm-1", 1).await;
    Mock::given(method("POST"))
        .and(path("/channels/dm-1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "m"})))
        .expect(1)
        .mount(&server)
        .await;

    let dispatcher = dispatcher(
        &server,
        RateLimitConfig {
            direct_per_minute: 1,
            replies_per_minute: 30,
        },
    )
    .with_max_rate_wait(Duration::ZERO);
    let member = MemberId::new("1");
    assert_eq!(dispatcher.send(&member, "a").await, DeliveryOutcome::Sent);
    let outcome = dispatcher.send(&member, "b").await;
    assert!(matches!(outcome, DeliveryOutcome::TransportError(_)), "{outcome:?}");
}

#[tokio::test]
async fn shutdown_abandons_rate_limit_wait() {
    let server = MockServer::start().await;
    mount_dm_channel(&server, "1", "dm-1", 1).await;
    Mock::given(method("POST"))
        .and(path("/channels/dm-1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "m"})))
        .expect(1)
        .mount(&server)
        .await;

    let shutdown = CancellationToken::new();
    let dispatcher = dispatcher(
        &server,
        RateLimitConfig {
            direct_per_minute: 1,
            replies_per_minute: 30,
        },
    )
    .with_shutdown(shutdown.clone());
    let member = MemberId::new("1");
    assert_eq!(dispatcher.send(&member, "a").await, DeliveryOutcome::Sent);

    shutdown.cancel();
    let outcome = tokio::time::timeout(Duration::from_secs(5), dispatcher.send(&member, "b"))
        .await
        .expect("send returns promptly after shutdown");
    assert!(matches!(outcome, DeliveryOutcome::TransportError(_)), "{outcome:?}");
}

// ────────────────────────────────────────────────────────────────────────────
// Channel replies
// ────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn reply_posts_to_the_origin_channel() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/channels/555/messages"))
        .and(header("Authorization", "Bot test-token"))
        .and(body_partial_json(json!({"content": "pong"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "m"})))
        .expect(1)
        .mount(&server)
        .await;

    let dispatcher = dispatcher(&server, RateLimitConfig::default());
    assert_eq!(dispatcher.reply("555", "pong").await, DeliveryOutcome::Sent);
}
