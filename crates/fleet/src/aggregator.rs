//! # Fleet aggregator
//!
//! Owns the poll loop against the fleet snapshot endpoint and the
//! authoritative live set of vehicles. Subscribers receive the full live set
//! (ordered by vehicle id) whenever a batch inserts, updates or removes at
//! least one vehicle.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use realtime::{HttpRequest, Listener, Listeners, Subscription};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::FleetConfig;
use crate::geo::haversine_km;
use crate::model::{Position, UpdateBatch, VehicleRecord, VehicleStatus};
use crate::snapshot;

/// Mirror of fleet state kept consistent by differential polling.
///
/// Cloning yields another handle to the same aggregator. Polling stops when
/// [`FleetAggregator::shutdown`] is called or the last handle is dropped.
pub struct FleetAggregator<P> {
    inner: Arc<Inner<P>>,
}

impl<P> Clone for FleetAggregator<P> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

struct Inner<P> {
    provider: P,
    config: FleetConfig,
    state: Mutex<FleetState>,
    listeners: Listeners<[VehicleRecord]>,
    // held for a whole notification pass so a late subscriber's snapshot is
    // never overtaken by a batch notification
    delivery: Mutex<()>,
    polling: Mutex<PollSlot>,
}

#[derive(Default)]
struct FleetState {
    vehicles: BTreeMap<String, VehicleRecord>,
    cursor: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct PollSlot {
    active: Option<Poller>,
    // a stopped loop whose in-flight fetch may not have completed yet
    draining: Option<JoinHandle<()>>,
}

struct Poller {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl<P> FleetAggregator<P>
where
    P: HttpRequest + 'static,
{
    #[must_use]
    pub fn new(config: FleetConfig, provider: P) -> Self {
        Self {
            inner: Arc::new(Inner {
                provider,
                config,
                state: Mutex::new(FleetState::default()),
                listeners: Listeners::new(),
                delivery: Mutex::new(()),
                polling: Mutex::new(PollSlot::default()),
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &FleetConfig {
        &self.inner.config
    }

    /// Start polling at the configured interval.
    pub fn start(&self) -> bool {
        self.start_polling(self.inner.config.poll_interval)
    }

    /// Begin periodic fetching. The first fetch fires immediately; each later
    /// fetch starts `interval` after the previous one completed, so at most
    /// one fetch is ever in flight.
    ///
    /// Returns `false` (and does nothing) when polling is already active or
    /// no async runtime is available.
    pub fn start_polling(&self, interval: Duration) -> bool {
        let mut slot = lock(&self.inner.polling);
        if slot.active.is_some() {
            debug!("fleet polling already active");
            return false;
        }

        let Ok(runtime) = Handle::try_current() else {
            error!("no async runtime available, fleet polling not started");
            return false;
        };

        let (stop, stop_rx) = oneshot::channel();
        let previous = slot.draining.take();
        let inner = Arc::downgrade(&self.inner);
        let task = runtime.spawn(poll_loop(inner, interval, stop_rx, previous));
        slot.active = Some(Poller { stop, task });
        drop(slot);

        info!(interval_ms = interval.as_millis(), "fleet polling started");
        true
    }

    /// Stop scheduling fetches. A fetch already in flight completes and is
    /// applied. Returns `false` when polling was not active.
    pub fn stop_polling(&self) -> bool {
        let mut slot = lock(&self.inner.polling);
        let Some(poller) = slot.active.take() else {
            return false;
        };

        // the loop may already be gone if the runtime shut down
        let _ = poller.stop.send(());
        slot.draining = Some(poller.task);
        drop(slot);

        info!("fleet polling stopped");
        true
    }

    #[must_use]
    pub fn is_polling(&self) -> bool {
        lock(&self.inner.polling).active.is_some()
    }

    /// Fetch the next batch using the current cursor and apply it. Transport
    /// and parse failures are logged and leave the live set untouched.
    ///
    /// Returns `true` when subscribers were notified.
    pub async fn fetch_and_apply(&self) -> bool {
        self.inner.fetch_and_apply().await
    }

    /// Apply one batch to the live set, notifying subscribers when anything
    /// changed. Returns `true` when subscribers were notified.
    pub fn apply_batch(&self, batch: UpdateBatch) -> bool {
        self.inner.apply_batch(batch)
    }

    /// Register `callback` for fleet changes. When the live set is not empty
    /// the callback receives the current snapshot before this returns.
    ///
    /// Callbacks run synchronously inside the notification pass and must not
    /// call `subscribe` or `apply_batch` on the same aggregator.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&[VehicleRecord]) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let _delivery = lock(&self.inner.delivery);
        let listener: Listener<[VehicleRecord]> = Arc::new(callback);
        let subscription = self.inner.listeners.add_listener(Arc::clone(&listener));

        let snapshot = self.snapshot();
        if !snapshot.is_empty() {
            realtime::deliver(subscription.id(), &listener, &snapshot);
        }

        subscription
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.listeners.len()
    }

    /// The live set ordered by vehicle id.
    #[must_use]
    pub fn snapshot(&self) -> Vec<VehicleRecord> {
        lock(&self.inner.state).vehicles.values().cloned().collect()
    }

    #[must_use]
    pub fn get(&self, vehicle_id: &str) -> Option<VehicleRecord> {
        lock(&self.inner.state).vehicles.get(vehicle_id).cloned()
    }

    #[must_use]
    pub fn count(&self) -> usize {
        lock(&self.inner.state).vehicles.len()
    }

    /// Vehicles within `radius_km` of `center` (great-circle distance).
    #[must_use]
    pub fn nearby(&self, center: Position, radius_km: f64) -> Vec<VehicleRecord> {
        self.filtered(|vehicle| haversine_km(center, vehicle.position) <= radius_km)
    }

    #[must_use]
    pub fn by_status(&self, status: VehicleStatus) -> Vec<VehicleRecord> {
        self.filtered(|vehicle| vehicle.status == status)
    }

    #[must_use]
    pub fn available(&self) -> Vec<VehicleRecord> {
        self.filtered(VehicleRecord::is_available)
    }

    /// Server time of the last applied batch.
    #[must_use]
    pub fn cursor(&self) -> Option<DateTime<Utc>> {
        lock(&self.inner.state).cursor
    }

    /// Stop polling and drop every subscriber. The live set is kept.
    pub fn shutdown(&self) {
        self.stop_polling();
        self.inner.listeners.clear();
        info!("fleet aggregator shut down");
    }

    fn filtered(&self, predicate: impl Fn(&VehicleRecord) -> bool) -> Vec<VehicleRecord> {
        let state = lock(&self.inner.state);
        state.vehicles.values().filter(|vehicle| predicate(vehicle)).cloned().collect()
    }
}

impl<P> Inner<P>
where
    P: HttpRequest,
{
    async fn fetch_and_apply(&self) -> bool {
        let cursor = lock(&self.state).cursor;

        match snapshot::fetch(&self.config.snapshot_url, cursor, &self.provider).await {
            Ok(batch) => self.apply_batch(batch),
            Err(err) => {
                warn!(
                    monotonic_counter.fleet_poll_errors = 1,
                    code = %err.code(),
                    error = %err,
                    "fleet poll failed"
                );
                false
            }
        }
    }

    fn apply_batch(&self, batch: UpdateBatch) -> bool {
        let _delivery = lock(&self.delivery);

        let snapshot = {
            let mut state = lock(&self.state);
            let mut changes = 0_usize;

            for id in &batch.removed_ids {
                if state.vehicles.remove(id).is_some() {
                    changes += 1;
                }
            }

            for record in batch.changed {
                let unchanged = state
                    .vehicles
                    .get(&record.vehicle_id)
                    .is_some_and(|existing| !record.differs_from(existing));
                if !unchanged {
                    state.vehicles.insert(record.vehicle_id.clone(), record);
                    changes += 1;
                }
            }

            if let Some(ttl) = self.config.stale_after {
                changes += evict_stale(&mut state.vehicles, batch.as_of, ttl);
            }

            state.cursor = Some(batch.as_of);

            if changes == 0 {
                None
            } else {
                debug!(changes, live = state.vehicles.len(), "fleet batch applied");
                Some(state.vehicles.values().cloned().collect::<Vec<_>>())
            }
        };

        let Some(snapshot) = snapshot else {
            debug!(as_of = %batch.as_of, "fleet batch carried no change");
            return false;
        };

        self.listeners.notify(&snapshot);
        true
    }
}

async fn poll_loop<P>(
    inner: Weak<Inner<P>>, interval: Duration, mut stop: oneshot::Receiver<()>,
    previous: Option<JoinHandle<()>>,
) where
    P: HttpRequest + 'static,
{
    // a restarted loop waits for the stopped one's in-flight fetch
    if let Some(previous) = previous {
        let _ = previous.await;
    }

    loop {
        {
            let Some(inner) = inner.upgrade() else { break };
            inner.fetch_and_apply().await;
        }

        tokio::select! {
            biased;
            _ = &mut stop => break,
            () = tokio::time::sleep(interval) => {}
        }
    }

    debug!("fleet poll loop exited");
}

fn evict_stale(
    vehicles: &mut BTreeMap<String, VehicleRecord>, as_of: DateTime<Utc>, ttl: Duration,
) -> usize {
    let Some(cutoff) =
        chrono::Duration::from_std(ttl).ok().and_then(|ttl| as_of.checked_sub_signed(ttl))
    else {
        return 0;
    };

    let before = vehicles.len();
    vehicles.retain(|id, vehicle| {
        let fresh = vehicle.last_updated >= cutoff;
        if !fresh {
            debug!(vehicle = %id, last_updated = %vehicle.last_updated, "evicting stale vehicle");
        }
        fresh
    });
    before - vehicles.len()
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use anyhow::{Result, anyhow};
    use bytes::Bytes;
    use chrono::{TimeZone, Utc};
    use http::{Request, Response};
    use pretty_assertions::assert_eq;
    use realtime::HttpRequest;

    use super::FleetAggregator;
    use crate::config::FleetConfig;
    use crate::model::{Position, UpdateBatch, VehicleRecord, VehicleStatus};

    struct Offline;

    impl HttpRequest for Offline {
        async fn fetch(&self, _request: Request<Bytes>) -> Result<Response<Bytes>> {
            Err(anyhow!("network unreachable"))
        }
    }

    fn record(id: &str, latitude: f64, longitude: f64, minute: u32) -> VehicleRecord {
        VehicleRecord {
            vehicle_id: id.to_string(),
            position: Position::new(latitude, longitude),
            heading: 0.0,
            speed: 0.0,
            status: VehicleStatus::Available,
            last_updated: Utc.with_ymd_and_hms(2026, 10, 19, 8, minute, 0).unwrap(),
            driver_info: None,
            vehicle_info: None,
        }
    }

    fn batch(minute: u32, changed: Vec<VehicleRecord>, removed: &[&str]) -> UpdateBatch {
        UpdateBatch {
            as_of: Utc.with_ymd_and_hms(2026, 10, 19, 8, minute, 0).unwrap(),
            changed,
            removed_ids: removed.iter().map(ToString::to_string).collect::<BTreeSet<_>>(),
        }
    }

    fn ids(vehicles: &[VehicleRecord]) -> Vec<String> {
        vehicles.iter().map(|vehicle| vehicle.vehicle_id.clone()).collect()
    }

    #[test]
    fn stale_vehicles_are_evicted() {
        let config =
            FleetConfig { stale_after: Some(Duration::from_secs(5 * 60)), ..FleetConfig::default() };
        let fleet = FleetAggregator::new(config, Offline);

        let initial = vec![record("V1", 35.0, 139.0, 0), record("V2", 35.1, 139.1, 0)];
        fleet.apply_batch(batch(0, initial, &[]));
        assert_eq!(fleet.count(), 2);

        let notified = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&notified);
        let _sub = fleet.subscribe(move |vehicles| {
            sink.lock().unwrap().push(ids(vehicles));
            Ok(())
        });

        // V2 keeps reporting, V1 falls silent
        fleet.apply_batch(batch(6, vec![record("V2", 35.2, 139.2, 6)], &[]));

        assert_eq!(ids(&fleet.snapshot()), vec!["V2"]);
        assert_eq!(
            *notified.lock().unwrap(),
            vec![vec!["V1".to_string(), "V2".to_string()], vec!["V2".to_string()]]
        );
    }

    #[test]
    fn no_eviction_by_default() {
        let fleet = FleetAggregator::new(FleetConfig::default(), Offline);
        fleet.apply_batch(batch(0, vec![record("V1", 35.0, 139.0, 0)], &[]));
        assert!(!fleet.apply_batch(batch(59, vec![], &[])));
        assert_eq!(fleet.count(), 1);
    }

    #[test]
    fn queries() {
        let fleet = FleetAggregator::new(FleetConfig::default(), Offline);
        let mut occupied = record("V3", 35.0001, 139.0001, 0);
        occupied.status = VehicleStatus::Occupied;
        fleet.apply_batch(batch(
            0,
            vec![record("V2", 35.0, 139.0, 0), record("V1", 34.0, 135.0, 0), occupied],
            &[],
        ));

        assert_eq!(ids(&fleet.snapshot()), vec!["V1", "V2", "V3"]);
        assert_eq!(ids(&fleet.nearby(Position::new(35.0, 139.0), 1.0)), vec!["V2", "V3"]);
        assert_eq!(ids(&fleet.available()), vec!["V1", "V2"]);
        assert_eq!(ids(&fleet.by_status(VehicleStatus::Occupied)), vec!["V3"]);
        assert_eq!(ids(&fleet.by_status(VehicleStatus::Offline)), Vec::<String>::new());
        assert_eq!(fleet.get("V3").map(|vehicle| vehicle.status), Some(VehicleStatus::Occupied));
        assert!(fleet.get("V9").is_none());
        assert_eq!(fleet.cursor(), Some(Utc.with_ymd_and_hms(2026, 10, 19, 8, 0, 0).unwrap()));
    }

    #[tokio::test]
    async fn failed_fetch_keeps_state() {
        let fleet = FleetAggregator::new(FleetConfig::default(), Offline);
        fleet.apply_batch(batch(0, vec![record("V1", 35.0, 139.0, 0)], &[]));

        assert!(!fleet.fetch_and_apply().await);
        assert_eq!(fleet.count(), 1);
        assert_eq!(fleet.cursor(), Some(Utc.with_ymd_and_hms(2026, 10, 19, 8, 0, 0).unwrap()));
    }

    #[test]
    fn start_without_runtime() {
        let fleet = FleetAggregator::new(FleetConfig::default(), Offline);
        assert!(!fleet.start());
        assert!(!fleet.is_polling());
        assert!(!fleet.stop_polling());
    }
}
