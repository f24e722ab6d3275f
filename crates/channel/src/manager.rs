//! # Channel manager
//!
//! Owns the table of live channels, at most one per [`ChannelKey`]. Each
//! channel is driven by its own task; the manager only creates, addresses
//! and tears channels down.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use realtime::{Subscription, SocketConnector};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::config::ChannelConfig;
use crate::driver::{self, ChannelShared, Control};
use crate::key::ChannelKey;
use crate::messages::{RideEvent, VoyageEvent};
use crate::state::ChannelState;

/// Multiplexes reconnecting realtime channels.
///
/// Cloning yields another handle to the same manager. Dropping the last
/// handle stops every channel driver.
pub struct ChannelManager<C> {
    inner: Arc<Inner<C>>,
}

impl<C> Clone for ChannelManager<C> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

struct Inner<C> {
    connector: Arc<C>,
    config: ChannelConfig,
    table: Mutex<Table>,
}

#[derive(Default)]
struct Table {
    next_generation: u64,
    channels: HashMap<ChannelKey, Entry>,
}

struct Entry {
    generation: u64,
    control: Arc<dyn Control>,
    shutdown: oneshot::Sender<()>,
}

impl Entry {
    fn stop(self) {
        self.control.teardown();
        // the driver is gone already when the channel failed
        let _ = self.shutdown.send(());
    }
}

impl<C> ChannelManager<C>
where
    C: SocketConnector,
{
    #[must_use]
    pub fn new(config: ChannelConfig, connector: C) -> Self {
        Self {
            inner: Arc::new(Inner {
                connector: Arc::new(connector),
                config,
                table: Mutex::new(Table::default()),
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &ChannelConfig {
        &self.inner.config
    }

    /// Open the channel for `key`, delivering each parsed message to
    /// `on_message`.
    ///
    /// When a channel for `key` already exists no second connection is made:
    /// its existing disconnect handle is returned and `on_message` is not
    /// registered. Use [`ChannelManager::subscribe`] to add listeners to an
    /// existing channel.
    pub fn open<M, F>(&self, key: ChannelKey, on_message: F) -> Disconnect
    where
        M: DeserializeOwned + Send + Sync + 'static,
        F: Fn(&M) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let mut table = lock(&self.inner.table);
        if let Some(entry) = table.channels.get(&key) {
            debug!(key = %key, "channel already open");
            return self.disconnect_handle(key, entry.generation);
        }

        let generation = table.next_generation;
        table.next_generation += 1;

        let shared = Arc::new(ChannelShared::<M>::new(key.clone(), self.inner.config.backoff));
        let _subscription = shared.listeners.add(on_message);
        let (shutdown, shutdown_rx) = oneshot::channel();

        if let Ok(runtime) = Handle::try_current() {
            let url = self.inner.config.url_for(&key);
            info!(key = %key, url = %url, "channel opening");
            let connector = Arc::clone(&self.inner.connector);
            runtime.spawn(driver::run(connector, url, Arc::clone(&shared), shutdown_rx));
        } else {
            error!(key = %key, "no async runtime available, channel cannot connect");
            shared.fail();
        }

        let control: Arc<dyn Control> = shared;
        table.channels.insert(key.clone(), Entry { generation, control, shutdown });
        drop(table);

        self.disconnect_handle(key, generation)
    }

    /// Open a ride channel.
    pub fn open_ride<F>(&self, ride_id: impl Into<String>, on_event: F) -> Disconnect
    where
        F: Fn(&RideEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.open::<RideEvent, F>(ChannelKey::ride(ride_id), on_event)
    }

    /// Open a voyage channel.
    pub fn open_voyage<F>(&self, voyage_id: impl Into<String>, on_event: F) -> Disconnect
    where
        F: Fn(&VoyageEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.open::<VoyageEvent, F>(ChannelKey::voyage(voyage_id), on_event)
    }

    /// Add a subscriber to an existing channel. Returns `None` when there is
    /// no channel for `key` or it carries a different message type.
    pub fn subscribe<M, F>(&self, key: &ChannelKey, callback: F) -> Option<Subscription>
    where
        M: DeserializeOwned + Send + Sync + 'static,
        F: Fn(&M) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let Some(control) = self.control(key) else {
            warn!(key = %key, "no channel to subscribe to");
            return None;
        };
        let Ok(shared) = control.as_any().downcast::<ChannelShared<M>>() else {
            warn!(key = %key, "channel carries a different message type");
            return None;
        };
        Some(shared.listeners.add(callback))
    }

    /// Serialize `message` and write it to the channel for `key`. Only an
    /// `Open` channel writes; in any other state the message is dropped, never
    /// queued for a later connection.
    pub fn send<T>(&self, key: &ChannelKey, message: &T) -> bool
    where
        T: Serialize + ?Sized,
    {
        let Some(control) = self.control(key) else {
            warn!(key = %key, "no channel for message, dropped");
            return false;
        };

        let text = match serde_json::to_string(message) {
            Ok(text) => text,
            Err(err) => {
                warn!(key = %key, error = %err, "failed to serialize channel message");
                return false;
            }
        };

        if control.send_text(text) {
            return true;
        }
        warn!(
            monotonic_counter.channel_dropped_sends = 1,
            key = %key,
            state = %control.state(),
            "channel not open, message dropped"
        );
        false
    }

    /// Tear down the channel for `key` regardless of which handle opened it.
    pub fn close(&self, key: &ChannelKey) -> bool {
        let entry = lock(&self.inner.table).channels.remove(key);
        entry.is_some_and(|entry| {
            entry.stop();
            info!(key = %key, "channel closed");
            true
        })
    }

    /// Tear down every channel and clear the table. Returns the number of
    /// channels closed.
    pub fn close_all(&self) -> usize {
        let channels: Vec<_> = lock(&self.inner.table).channels.drain().collect();
        let closed = channels.len();
        for (_, entry) in channels {
            entry.stop();
        }
        info!(closed, "all channels closed");
        closed
    }

    /// Alias of [`ChannelManager::close_all`] for symmetry with the other
    /// components' lifecycle.
    pub fn shutdown(&self) {
        self.close_all();
    }

    #[must_use]
    pub fn state(&self, key: &ChannelKey) -> Option<ChannelState> {
        self.control(key).map(|control| control.state())
    }

    /// Reconnections scheduled since the channel was last open.
    #[must_use]
    pub fn reconnect_attempt(&self, key: &ChannelKey) -> Option<u32> {
        self.control(key).map(|control| control.attempt())
    }

    #[must_use]
    pub fn subscriber_count(&self, key: &ChannelKey) -> Option<usize> {
        self.control(key).map(|control| control.subscriber_count())
    }

    #[must_use]
    pub fn contains(&self, key: &ChannelKey) -> bool {
        lock(&self.inner.table).channels.contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.inner.table).channels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys of every registered channel, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<ChannelKey> {
        let mut keys: Vec<_> = lock(&self.inner.table).channels.keys().cloned().collect();
        keys.sort();
        keys
    }

    fn control(&self, key: &ChannelKey) -> Option<Arc<dyn Control>> {
        lock(&self.inner.table).channels.get(key).map(|entry| Arc::clone(&entry.control))
    }

    fn disconnect_handle(&self, key: ChannelKey, generation: u64) -> Disconnect {
        let manager: Weak<dyn Teardown> = Arc::downgrade(&self.inner) as Weak<dyn Teardown>;
        Disconnect { key, generation, manager }
    }
}

/// Tears down the channel it was issued for. Idempotent, and a handle from
/// an earlier channel on the same key never affects a newer one.
#[must_use = "dropping the handle leaves the channel open"]
#[derive(Clone)]
pub struct Disconnect {
    key: ChannelKey,
    generation: u64,
    manager: Weak<dyn Teardown>,
}

impl Disconnect {
    #[must_use]
    pub const fn key(&self) -> &ChannelKey {
        &self.key
    }

    /// Returns `false` when the channel was already torn down.
    pub fn disconnect(&self) -> bool {
        self.manager.upgrade().is_some_and(|manager| manager.teardown(&self.key, self.generation))
    }
}

impl std::fmt::Debug for Disconnect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Disconnect")
            .field("key", &self.key)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

trait Teardown: Send + Sync {
    fn teardown(&self, key: &ChannelKey, generation: u64) -> bool;
}

impl<C: Send + Sync> Teardown for Inner<C> {
    fn teardown(&self, key: &ChannelKey, generation: u64) -> bool {
        let mut table = lock(&self.table);
        if table.channels.get(key).is_none_or(|entry| entry.generation != generation) {
            return false;
        }
        let entry = table.channels.remove(key);
        drop(table);

        entry.is_some_and(|entry| {
            entry.stop();
            info!(key = %key, "channel disconnected");
            true
        })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
