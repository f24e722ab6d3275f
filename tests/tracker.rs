#![allow(missing_docs)]


use std::sync::{Arc, Mutex};
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;
use tokio::time::sleep;
use tracking::{ChannelKey, ChannelState, Config, Position, RideEvent, Tracker, VehicleStatus};

use self::provider::MockProvider;

fn snapshot() -> serde_json::Value {
    json!({
        "timestamp": "2026-10-19T08:00:00Z",
        "vehicles": [
            {
                "vehicle_id": "T1",
                "latitude": 35.6812,
                "longitude": 139.7671,
                "heading": 90.0,
                "speed": 0.0,
                "status": "available",
                "last_updated": "2026-10-19T08:00:00Z"
            },
            {
                "vehicle_id": "T2",
                "latitude": 34.7025,
                "longitude": 135.4959,
                "heading": 0.0,
                "speed": 35.0,
                "status": "occupied",
                "last_updated": "2026-10-19T08:00:00Z"
            }
        ],
        "removed_vehicle_ids": []
    })
}

// Should poll the fleet, carry a ride channel and tear both down on shutdown.
#[tokio::test(start_paused = true)]
async fn lifecycle() {
    let provider = MockProvider::default();
    provider.snapshot(snapshot());
    let server = provider.accept();

    let tracker = Tracker::new(Config::default(), provider.clone());
    assert!(tracker.start());

    let statuses = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&statuses);
    let _disconnect = tracker.channels().open_ride("42", move |event: &RideEvent| {
        if let RideEvent::StatusChanged(changed) = event {
            sink.lock().unwrap().push(changed.status);
        }
        Ok(())
    });
    sleep(Duration::from_millis(10)).await;

    assert_eq!(tracker.fleet().count(), 2);
    let nearby = tracker.fleet().nearby(Position::new(35.6586, 139.7454), 10.0);
    assert_eq!(nearby.iter().map(|v| v.vehicle_id.as_str()).collect::<Vec<_>>(), vec!["T1"]);
    assert_eq!(tracker.fleet().by_status(VehicleStatus::Occupied).len(), 1);

    let key = ChannelKey::ride("42");
    assert_eq!(tracker.channels().state(&key), Some(ChannelState::Open));
    server
        .send(
            json!({ "type": "status_changed", "data": { "ride_id": "42", "status": "accepted" } })
                .to_string(),
        )
        .unwrap();
    sleep(Duration::from_millis(10)).await;
    assert_eq!(statuses.lock().unwrap().len(), 1);

    tracker.shutdown();
    assert!(!tracker.fleet().is_polling());
    assert!(tracker.channels().is_empty());
    assert_eq!(provider.connects(), vec!["ws://localhost:8080/ws/rides/42".to_string()]);
}
