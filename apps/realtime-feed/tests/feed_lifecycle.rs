//! Feed Lifecycle Integration Tests
//!
//! Drives `FeedManager` through connect, fallback, reconnect and teardown
//! with a scripted connector under paused time.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;

use realtime_feed::{
    ChannelConfig, ChannelSnapshot, FeedManager, FeedManagerConfig, FeedManagerError, FeedState,
    FeedSubscription, ReconnectConfig, ScriptedConnector, StateChange, Trend,
};

fn manager(connector: &Arc<ScriptedConnector>) -> FeedManager {
    FeedManager::new(connector.clone(), FeedManagerConfig::default())
}

async fn wait_for(sub: &mut FeedSubscription, status: FeedState) -> ChannelSnapshot {
    timeout(Duration::from_secs(60), async {
        loop {
            let snapshot = sub.snapshot();
            if snapshot.status == status {
                return snapshot;
            }
            sub.changed().await.expect("channel closed");
        }
    })
    .await
    .expect("status not reached")
}

#[tokio::test(start_paused = true)]
async fn live_feed_falls_back_and_recovers() {
    let connector = Arc::new(ScriptedConnector::new());
    let first = connector.push_session("btcusdt");
    let second = connector.push_session("btcusdt");
    let manager = manager(&connector);

    let mut sub = manager
        .subscribe("btcusdt", ChannelConfig::new().with_rng_seed(7))
        .unwrap();
    assert_eq!(sub.snapshot().status, FeedState::Connecting);

    first.send(r#"{"e":"trade","p":"250.5"}"#);
    assert_eq!(sub.next_tick().await.unwrap().value, 250.5);
    assert_eq!(sub.snapshot().status, FeedState::Connected);

    first.close();
    wait_for(&mut sub, FeedState::Simulating).await;
    assert_eq!(sub.next_tick().await.unwrap().value, 250.5);

    wait_for(&mut sub, FeedState::Connecting).await;
    second.send(r#"{"p":260}"#);
    wait_for(&mut sub, FeedState::Connected).await;
    assert_eq!(sub.snapshot().latest.unwrap().value, 260.0);
    assert_eq!(connector.attempts("btcusdt"), 2);

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(sub.snapshot().latest.unwrap().value, 260.0);

    let status = &manager.channel_statuses()[0];
    assert_eq!(status.status, FeedState::Connected);
    assert_eq!(status.stats.live_ticks, 2);
    assert_eq!(status.stats.synthetic_episodes, 1);
    assert!(status.stats.synthetic_ticks >= 5);
    assert_eq!(status.reconnect_attempts, 0);
}

async fn next_edge(sub: &mut FeedSubscription) -> StateChange {
    timeout(Duration::from_secs(60), sub.next_transition())
        .await
        .expect("no transition")
        .expect("transitions closed")
}

#[tokio::test(start_paused = true)]
async fn every_lifecycle_edge_is_legal_and_ordered() {
    use FeedState::{Connected, Connecting, Disconnected, Simulating};

    let connector = Arc::new(ScriptedConnector::new());
    let first = connector.push_session("btcusdt");
    connector.push_refusal("btcusdt", "upstream busy");
    let third = connector.push_session("btcusdt");
    let manager = manager(&connector);

    let mut sub = manager.subscribe("btcusdt", ChannelConfig::new()).unwrap();
    let mut edges = vec![next_edge(&mut sub).await];
    assert_eq!(sub.snapshot().status, Connecting);

    first.send(r#"{"p":100}"#);
    edges.push(next_edge(&mut sub).await);
    assert_eq!(sub.snapshot().status, Connected);

    first.close();
    edges.push(next_edge(&mut sub).await);
    edges.push(next_edge(&mut sub).await);
    edges.push(next_edge(&mut sub).await);
    edges.push(next_edge(&mut sub).await);
    assert_eq!(sub.snapshot().status, Connecting);

    third.send(r#"{"p":101}"#);
    edges.push(next_edge(&mut sub).await);
    assert_eq!(sub.snapshot().status, Connected);

    manager.teardown();
    edges.push(next_edge(&mut sub).await);
    assert!(sub.next_transition().await.is_none());
    assert_eq!(sub.snapshot().status, Disconnected);

    let path: Vec<_> = edges.iter().map(|e| (e.from, e.to)).collect();
    assert_eq!(
        path,
        vec![
            (Disconnected, Connecting),
            (Connecting, Connected),
            (Connected, Simulating),
            (Simulating, Connecting),
            (Connecting, Simulating),
            (Simulating, Connecting),
            (Connecting, Connected),
            (Connected, Disconnected),
        ]
    );
    assert!(edges.iter().all(StateChange::is_legal));
    assert!(edges.windows(2).all(|w| w[0].to == w[1].from));
    assert_eq!(connector.attempts("btcusdt"), 3);
}

#[tokio::test(start_paused = true)]
async fn refused_connection_simulates_from_configured_seed() {
    let connector = Arc::new(ScriptedConnector::new());
    let manager = manager(&connector);

    let mut sub = manager
        .subscribe("portfolio", ChannelConfig::new().with_seed_value(1000.0))
        .unwrap();

    wait_for(&mut sub, FeedState::Simulating).await;
    assert_eq!(sub.next_tick().await.unwrap().value, 1000.0);

    tokio::time::sleep(Duration::from_millis(11_000)).await;

    assert_eq!(connector.attempts("portfolio"), 3);
    let status = &manager.channel_statuses()[0];
    assert_eq!(status.status, FeedState::Simulating);
    assert_eq!(status.reconnect_attempts, 3);
    assert_eq!(status.stats.synthetic_episodes, 1);
}

#[tokio::test(start_paused = true)]
async fn synthetic_seed_falls_back_to_manager_default() {
    let connector = Arc::new(ScriptedConnector::new());
    let manager = manager(&connector);

    let mut sub = manager.subscribe("ethusdt", ChannelConfig::new()).unwrap();

    assert_eq!(sub.next_tick().await.unwrap().value, 100.0);
    assert_eq!(sub.snapshot().trend, Trend::Neutral);
}

#[tokio::test(start_paused = true)]
async fn exhausted_attempts_stay_simulating() {
    let connector = Arc::new(ScriptedConnector::new());
    let manager = FeedManager::new(
        connector.clone(),
        FeedManagerConfig {
            reconnect: ReconnectConfig::fixed(Duration::from_secs(5)).with_max_attempts(1),
            ..FeedManagerConfig::default()
        },
    );

    let mut sub = manager.subscribe("btcusdt", ChannelConfig::new()).unwrap();
    wait_for(&mut sub, FeedState::Simulating).await;

    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(connector.attempts("btcusdt"), 2);
    assert_eq!(sub.snapshot().status, FeedState::Simulating);
    assert!(sub.next_tick().await.is_some());
}

#[tokio::test(start_paused = true)]
async fn trend_follows_accepted_values() {
    let connector = Arc::new(ScriptedConnector::new());
    let session = connector.push_session("btcusdt");
    let manager = manager(&connector);
    let mut sub = manager.subscribe("btcusdt", ChannelConfig::new()).unwrap();

    let mut trends = Vec::new();
    for price in ["10", "10", "12", "11"] {
        session.send(&format!(r#"{{"p":"{price}"}}"#));
        sub.next_tick().await.unwrap();
        trends.push(sub.snapshot().trend);
    }

    assert_eq!(
        trends,
        vec![Trend::Neutral, Trend::Neutral, Trend::Up, Trend::Down]
    );
}

#[tokio::test(start_paused = true)]
async fn out_of_order_ticks_are_rejected() {
    let connector = Arc::new(ScriptedConnector::new());
    let session = connector.push_session("btcusdt");
    let manager = manager(&connector);
    let mut sub = manager.subscribe("btcusdt", ChannelConfig::new()).unwrap();

    session.send(r#"{"p":"10","T":1700000002000}"#);
    session.send(r#"{"p":"11","T":1700000001000}"#);
    session.send(r#"{"p":"12","T":1700000002000}"#);

    assert_eq!(sub.next_tick().await.unwrap().value, 10.0);
    assert_eq!(sub.next_tick().await.unwrap().value, 12.0);

    let status = &manager.channel_statuses()[0];
    assert_eq!(status.stats.rejected, 1);
    assert_eq!(status.stats.live_ticks, 2);
}

#[tokio::test(start_paused = true)]
async fn malformed_messages_are_counted_and_dropped() {
    let connector = Arc::new(ScriptedConnector::new());
    let session = connector.push_session("btcusdt");
    let manager = manager(&connector);
    let mut sub = manager.subscribe("btcusdt", ChannelConfig::new()).unwrap();

    session.send("not json");
    session.send(r#"{"p":"abc"}"#);
    session.send(r#"{"type":"UPDATE","payload":{"value":42.5}}"#);

    assert_eq!(sub.next_tick().await.unwrap().value, 42.5);
    let status = &manager.channel_statuses()[0];
    assert_eq!(status.status, FeedState::Connected);
    assert_eq!(status.stats.malformed, 2);
}

#[tokio::test(start_paused = true)]
async fn shared_channel_closes_with_last_subscriber() {
    let connector = Arc::new(ScriptedConnector::new());
    let session = connector.push_session("btcusdt");
    let manager = manager(&connector);

    let mut a = manager.subscribe("btcusdt", ChannelConfig::new()).unwrap();
    let mut b = manager.subscribe("btcusdt", ChannelConfig::new()).unwrap();

    session.send(r#"{"p":"1"}"#);
    assert_eq!(a.next_tick().await.unwrap().value, 1.0);
    assert_eq!(b.next_tick().await.unwrap().value, 1.0);
    assert_eq!(connector.attempts("btcusdt"), 1);

    a.unsubscribe();
    a.unsubscribe();
    assert_eq!(manager.status("btcusdt"), Some(FeedState::Connected));
    assert!(!session.is_closed());

    drop(b);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(manager.status("btcusdt"), None);
    assert!(session.is_closed());
    assert!(manager.channel_statuses().is_empty());
}

#[tokio::test(start_paused = true)]
async fn resubscribe_opens_a_fresh_channel() {
    let connector = Arc::new(ScriptedConnector::new());
    let stale = connector.push_session("btcusdt");
    let second = connector.push_session("btcusdt");
    let manager = manager(&connector);

    let first = manager.subscribe("btcusdt", ChannelConfig::new()).unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    drop(first);
    let mut sub = manager.subscribe("btcusdt", ChannelConfig::new()).unwrap();
    assert_eq!(sub.snapshot().status, FeedState::Connecting);

    second.send(r#"{"p":"5"}"#);
    assert_eq!(sub.next_tick().await.unwrap().value, 5.0);
    assert_eq!(connector.attempts("btcusdt"), 2);
    assert!(stale.is_closed());
}

#[tokio::test(start_paused = true)]
async fn channels_fail_independently() {
    let connector = Arc::new(ScriptedConnector::new());
    let btc = connector.push_session("btcusdt");
    let manager = manager(&connector);

    let mut live = manager.subscribe("btcusdt", ChannelConfig::new()).unwrap();
    let mut down = manager.subscribe("ethusdt", ChannelConfig::new()).unwrap();

    btc.send(r#"{"p":"1"}"#);
    wait_for(&mut live, FeedState::Connected).await;
    wait_for(&mut down, FeedState::Simulating).await;

    tokio::time::sleep(Duration::from_secs(12)).await;

    assert_eq!(manager.status("btcusdt"), Some(FeedState::Connected));
    assert_eq!(manager.status("ethusdt"), Some(FeedState::Simulating));
    assert_eq!(connector.attempts("btcusdt"), 1);
    assert_eq!(connector.attempts("ethusdt"), 3);
}

#[tokio::test(start_paused = true)]
async fn teardown_disconnects_everything() {
    let connector = Arc::new(ScriptedConnector::new());
    let session = connector.push_session("btcusdt");
    let manager = manager(&connector);

    let mut live = manager.subscribe("btcusdt", ChannelConfig::new()).unwrap();
    let mut simulated = manager.subscribe("ethusdt", ChannelConfig::new()).unwrap();
    session.send(r#"{"p":"1"}"#);
    wait_for(&mut live, FeedState::Connected).await;
    wait_for(&mut simulated, FeedState::Simulating).await;

    manager.teardown();

    assert_eq!(live.snapshot().status, FeedState::Disconnected);
    assert_eq!(simulated.snapshot().status, FeedState::Disconnected);
    assert_eq!(live.snapshot().latest.unwrap().value, 1.0);

    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(connector.attempts("ethusdt"), 1);
    assert!(session.is_closed());
    assert!(manager.channel_statuses().is_empty());
    assert!(matches!(
        manager.subscribe("btcusdt", ChannelConfig::new()),
        Err(FeedManagerError::TornDown)
    ));

    while simulated.next_tick().await.is_some() {}
    live.unsubscribe();
}

#[tokio::test(start_paused = true)]
async fn seeded_channels_replay_identical_synthetic_feeds() {
    async fn synthetic_values(seed: u64) -> Vec<f64> {
        let connector = Arc::new(ScriptedConnector::new());
        let manager = manager(&connector);
        let mut sub = manager
            .subscribe(
                "portfolio",
                ChannelConfig::new().with_seed_value(500.0).with_rng_seed(seed),
            )
            .unwrap();

        let mut values = Vec::new();
        while values.len() < 6 {
            values.push(sub.next_tick().await.unwrap().value);
        }
        manager.teardown();
        values
    }

    let a = synthetic_values(42).await;
    let b = synthetic_values(42).await;
    let c = synthetic_values(43).await;

    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_eq!(a[0], 500.0);
}
