#![allow(missing_docs)]


use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use channel::{
    ChannelConfig, ChannelKey, ChannelManager, ChannelState, ClientMessage, RideEvent, VoyageEvent,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use tokio::time::{Instant, sleep};

use self::provider::MockConnector;

type Received = Arc<Mutex<Vec<u32>>>;

fn manager(connector: &MockConnector) -> ChannelManager<MockConnector> {
    let config = ChannelConfig {
        ride_url: "ws://tracking.test/rides/{id}".to_string(),
        voyage_url: "ws://tracking.test/voyages/{id}".to_string(),
        ..ChannelConfig::default()
    };
    ChannelManager::new(config, connector.clone())
}

fn eta(ride_id: &str, seconds: u32) -> String {
    json!({ "type": "eta_updated", "data": { "ride_id": ride_id, "eta_seconds": seconds } })
        .to_string()
}

// Records the ETA of every ride event received.
fn recorder() -> (Received, impl Fn(&RideEvent) -> anyhow::Result<()> + Send + Sync + 'static) {
    let received = Received::default();
    let sink = Arc::clone(&received);
    let callback = move |event: &RideEvent| {
        if let RideEvent::EtaUpdated(update) = event {
            sink.lock().unwrap().push(update.eta_seconds);
        }
        Ok(())
    };
    (received, callback)
}

// Let driver tasks run without advancing past any backoff.
async fn settle() {
    sleep(Duration::from_millis(10)).await;
}

// Should wait 1, 2, 4, 8 and 16 seconds between attempts, then fail without
// a sixth reconnection.
#[tokio::test(start_paused = true)]
async fn backoff_delays_exact() {
    let connector = MockConnector::default();
    let channels = manager(&connector);
    let key = ChannelKey::ride("42");

    let _disconnect = channels.open_ride("42", |_| Ok(()));
    sleep(Duration::from_secs(120)).await;

    let connects = connector.connects();
    let gaps: Vec<Duration> = connects.windows(2).map(|pair| pair[1] - pair[0]).collect();
    assert_eq!(gaps, [1, 2, 4, 8, 16].map(Duration::from_secs).to_vec());

    assert_eq!(channels.state(&key), Some(ChannelState::Failed));
    assert_eq!(channels.reconnect_attempt(&key), Some(5));
    // failed channels stay registered until closed
    assert!(channels.contains(&key));
    assert!(channels.close(&key));
    assert_eq!(channels.state(&key), None);
}

// Should count attempts while closed and reset them once reconnected.
#[tokio::test(start_paused = true)]
async fn attempt_counter() {
    let connector = MockConnector::default();
    connector.refuse();
    connector.refuse();
    let _peer = connector.accept();
    let channels = manager(&connector);
    let key = ChannelKey::ride("42");
    let start = Instant::now();

    let _disconnect = channels.open_ride("42", |_| Ok(()));
    settle().await;
    assert_eq!(channels.state(&key), Some(ChannelState::Closed));
    assert_eq!(channels.reconnect_attempt(&key), Some(1));

    sleep(Duration::from_secs(4)).await;
    assert_eq!(channels.state(&key), Some(ChannelState::Open));
    assert_eq!(channels.reconnect_attempt(&key), Some(0));

    let offsets: Vec<Duration> = connector.connects().iter().map(|at| *at - start).collect();
    assert_eq!(offsets, [0, 1, 3].map(Duration::from_secs).to_vec());
}

// Should deliver messages after a reconnect to the subscribers registered
// before the disconnect, in arrival order.
#[tokio::test(start_paused = true)]
async fn reconnect_keeps_subscribers() {
    let connector = MockConnector::default();
    let first = connector.accept();
    let second = connector.accept();
    let channels = manager(&connector);
    let key = ChannelKey::ride("42");

    let (opener, on_message) = recorder();
    let _disconnect = channels.open::<RideEvent, _>(key.clone(), on_message);
    let (extra, callback) = recorder();
    let _sub = channels.subscribe::<RideEvent, _>(&key, callback).unwrap();

    settle().await;
    assert_eq!(channels.state(&key), Some(ChannelState::Open));
    first.push(eta("42", 300));
    first.push(eta("42", 240));
    first.close();

    settle().await;
    assert_eq!(channels.state(&key), Some(ChannelState::Closed));

    sleep(Duration::from_secs(1)).await;
    assert_eq!(channels.state(&key), Some(ChannelState::Open));
    second.push(eta("42", 180));
    second.push(eta("42", 120));
    settle().await;

    assert_eq!(*opener.lock().unwrap(), vec![300, 240, 180, 120]);
    assert_eq!(*extra.lock().unwrap(), vec![300, 240, 180, 120]);
    assert_eq!(connector.urls(), vec!["ws://tracking.test/rides/42"; 2]);
}

// Should write only while open and never replay a message on a later
// connection.
#[tokio::test(start_paused = true)]
async fn send_only_when_open() {
    let connector = MockConnector::default();
    let peer = connector.accept();
    let channels = manager(&connector);
    let key = ChannelKey::ride("42");
    let refresh = ClientMessage::Refresh { resource_id: "42".to_string() };

    let _disconnect = channels.open_ride("42", |_| Ok(()));
    assert_eq!(channels.state(&key), Some(ChannelState::Connecting));
    assert!(!channels.send(&key, &refresh));

    settle().await;
    assert!(channels.send(&key, &refresh));
    settle().await;
    assert_eq!(
        peer.sent(),
        vec![r#"{"type":"refresh","data":{"resource_id":"42"}}"#.to_string()]
    );

    peer.close();
    settle().await;
    assert_eq!(channels.state(&key), Some(ChannelState::Closed));
    assert!(!channels.send(&key, &refresh));

    sleep(Duration::from_secs(120)).await;
    assert_eq!(channels.state(&key), Some(ChannelState::Failed));
    assert!(!channels.send(&key, &refresh));
    assert_eq!(peer.sent().len(), 1);
    assert!(!channels.send(&ChannelKey::ride("7"), &refresh));
}

// Should treat a transport error like a close.
#[tokio::test(start_paused = true)]
async fn transport_error_reconnects() {
    let connector = MockConnector::default();
    let first = connector.accept();
    let _second = connector.accept();
    let channels = manager(&connector);
    let key = ChannelKey::ride("42");

    let _disconnect = channels.open_ride("42", |_| Ok(()));
    settle().await;
    first.error("connection reset by peer");
    settle().await;
    assert_eq!(channels.state(&key), Some(ChannelState::Closed));

    sleep(Duration::from_secs(1)).await;
    assert_eq!(channels.state(&key), Some(ChannelState::Open));
    assert_eq!(connector.connects().len(), 2);
}

// Should keep one connection per key and return the existing handle.
#[tokio::test(start_paused = true)]
async fn duplicate_open() {
    let connector = MockConnector::default();
    let _peer = connector.accept();
    let channels = manager(&connector);
    let key = ChannelKey::ride("42");

    let first = channels.open_ride("42", |_| Ok(()));
    let second = channels.open_ride("42", |_| Ok(()));
    settle().await;

    assert_eq!(connector.connects().len(), 1);
    assert_eq!(channels.subscriber_count(&key), Some(1));
    assert_eq!(channels.len(), 1);

    assert!(second.disconnect());
    assert!(!first.disconnect());
    assert!(channels.is_empty());
}

// Should ignore a handle issued for an earlier channel on the same key.
#[tokio::test(start_paused = true)]
async fn stale_handle() {
    let connector = MockConnector::default();
    let channels = manager(&connector);
    let key = ChannelKey::voyage("V9");

    let stale = channels.open_voyage("V9", |_| Ok(()));
    assert!(stale.disconnect());
    assert!(!stale.disconnect());

    let current = channels.open_voyage("V9", |_| Ok(()));
    assert!(!stale.disconnect());
    assert!(channels.contains(&key));
    assert!(current.disconnect());
    assert!(!channels.contains(&key));
}

// Should stop reconnecting once disconnected during a backoff wait.
#[tokio::test(start_paused = true)]
async fn disconnect_during_backoff() {
    let connector = MockConnector::default();
    let channels = manager(&connector);

    let disconnect = channels.open_ride("42", |_| Ok(()));
    settle().await;
    assert!(disconnect.disconnect());

    sleep(Duration::from_secs(120)).await;
    assert_eq!(connector.connects().len(), 1);
    assert!(channels.is_empty());
}

// Should drop frames that do not parse and keep the channel open.
#[tokio::test(start_paused = true)]
async fn parse_failure_dropped() {
    let connector = MockConnector::default();
    let peer = connector.accept();
    let channels = manager(&connector);
    let key = ChannelKey::ride("42");

    let (received, on_message) = recorder();
    let _disconnect = channels.open::<RideEvent, _>(key.clone(), on_message);
    settle().await;

    peer.push("not json");
    peer.push(r#"{"type":"surge_pricing","data":{}}"#);
    peer.push(eta("42", 60));
    settle().await;

    assert_eq!(*received.lock().unwrap(), vec![60]);
    assert_eq!(channels.state(&key), Some(ChannelState::Open));
    assert_eq!(connector.connects().len(), 1);
}

// Should keep delivering to healthy subscribers when others fail.
#[tokio::test(start_paused = true)]
async fn subscriber_failures_isolated() {
    let connector = MockConnector::default();
    let peer = connector.accept();
    let channels = manager(&connector);
    let key = ChannelKey::ride("42");

    let _disconnect = channels.open_ride("42", |_| Err(anyhow!("screen dismissed")));
    let _panicking = channels.subscribe(&key, |_: &RideEvent| panic!("subscriber bug")).unwrap();
    let (received, callback) = recorder();
    let _sub = channels.subscribe::<RideEvent, _>(&key, callback).unwrap();
    settle().await;

    peer.push(eta("42", 90));
    peer.push(eta("42", 30));
    settle().await;

    assert_eq!(*received.lock().unwrap(), vec![90, 30]);
    assert_eq!(channels.state(&key), Some(ChannelState::Open));
}

// Should refuse subscribers of another message type or for unknown keys.
#[tokio::test(start_paused = true)]
async fn subscribe_checks_type() {
    let connector = MockConnector::default();
    let channels = manager(&connector);
    let key = ChannelKey::ride("42");

    let _disconnect = channels.open_ride("42", |_| Ok(()));
    assert!(channels.subscribe(&key, |_: &VoyageEvent| Ok(())).is_none());
    assert!(channels.subscribe(&ChannelKey::ride("7"), |_: &RideEvent| Ok(())).is_none());

    let sub = channels.subscribe(&key, |_: &RideEvent| Ok(())).unwrap();
    assert_eq!(channels.subscriber_count(&key), Some(2));
    assert!(sub.unsubscribe());
    assert_eq!(channels.subscriber_count(&key), Some(1));
}

// Should close every channel, release sockets and stop all reconnection.
#[tokio::test(start_paused = true)]
async fn close_all() {
    let connector = MockConnector::default();
    let ride = connector.accept();
    let voyage = connector.accept();
    let channels = manager(&connector);

    let (received, on_message) = recorder();
    let _ride = channels.open::<RideEvent, _>(ChannelKey::ride("42"), on_message);
    let _voyage = channels.open_voyage("V9", |_| Ok(()));
    settle().await;
    assert_eq!(channels.keys(), vec![ChannelKey::ride("42"), ChannelKey::voyage("V9")]);

    assert_eq!(channels.close_all(), 2);
    assert!(channels.is_empty());
    settle().await;
    assert!(ride.closed_by_client());
    assert!(voyage.closed_by_client());

    ride.push(eta("42", 10));
    sleep(Duration::from_secs(120)).await;
    assert!(received.lock().unwrap().is_empty());
    assert_eq!(connector.connects().len(), 2);
}
