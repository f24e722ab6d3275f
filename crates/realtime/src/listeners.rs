//! # Listeners
//!
//! An ordered registry of subscriber callbacks with per-callback failure
//! isolation. Both the fleet aggregator and each realtime channel fan out
//! through a `Listeners` instance.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::{error, warn};

/// A registered subscriber callback.
pub type Listener<T> = Arc<dyn Fn(&T) -> anyhow::Result<()> + Send + Sync>;

/// Ordered set of subscriber callbacks.
pub struct Listeners<T: ?Sized> {
    registry: Arc<Mutex<Registry<T>>>,
}

struct Registry<T: ?Sized> {
    next_id: u64,
    entries: Vec<(u64, Listener<T>)>,
}

impl<T: ?Sized + 'static> Listeners<T> {
    #[must_use]
    pub fn new() -> Self {
        Self { registry: Arc::new(Mutex::new(Registry { next_id: 1, entries: Vec::new() })) }
    }

    /// Register `callback` after every existing listener.
    pub fn add<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.add_listener(Arc::new(callback))
    }

    /// Register an already shared listener.
    pub fn add_listener(&self, listener: Listener<T>) -> Subscription {
        let mut registry = lock(&self.registry);
        let id = registry.next_id;
        registry.next_id += 1;
        registry.entries.push((id, listener));
        drop(registry);

        let registry: Weak<dyn Detach> = Arc::downgrade(&self.registry) as Weak<dyn Detach>;
        Subscription { id, registry }
    }

    /// Invoke every listener once, in registration order. Returns the number
    /// of listeners that completed without error.
    ///
    /// The registry is not locked while callbacks run, so a callback may
    /// unsubscribe itself or another listener.
    pub fn notify(&self, value: &T) -> usize {
        let entries = lock(&self.registry).entries.clone();
        let mut delivered = 0;
        for (id, listener) in &entries {
            if deliver(*id, listener, value) {
                delivered += 1;
            }
        }
        delivered
    }

    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.registry).entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every listener. Outstanding subscriptions become no-ops.
    pub fn clear(&self) {
        lock(&self.registry).entries.clear();
    }
}

impl<T: ?Sized + 'static> Default for Listeners<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> std::fmt::Debug for Listeners<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let len = lock(&self.registry).entries.len();
        f.debug_struct("Listeners").field("len", &len).finish()
    }
}

/// Invoke a single listener, isolating a returned error or a panic.
/// Returns `true` when the listener completed successfully.
pub fn deliver<T: ?Sized>(id: u64, listener: &Listener<T>, value: &T) -> bool {
    match panic::catch_unwind(AssertUnwindSafe(|| listener(value))) {
        Ok(Ok(())) => true,
        Ok(Err(err)) => {
            warn!(monotonic_counter.listener_errors = 1, listener = id, error = %err, "listener failed");
            false
        }
        Err(_) => {
            error!(monotonic_counter.listener_panics = 1, listener = id, "listener panicked");
            false
        }
    }
}

/// Handle returned by [`Listeners::add`]. Unsubscribing removes exactly the
/// listener this handle was issued for.
#[must_use = "dropping a subscription does not unsubscribe; keep it to unsubscribe later"]
#[derive(Clone)]
pub struct Subscription {
    id: u64,
    registry: Weak<dyn Detach>,
}

impl Subscription {
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Remove the listener. Returns `false` when it was already removed or
    /// the registry no longer exists.
    pub fn unsubscribe(&self) -> bool {
        self.registry.upgrade().is_some_and(|registry| registry.detach(self.id))
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

trait Detach: Send + Sync {
    fn detach(&self, id: u64) -> bool;
}

impl<T: ?Sized> Detach for Mutex<Registry<T>> {
    fn detach(&self, id: u64) -> bool {
        let mut registry = self.lock().unwrap_or_else(PoisonError::into_inner);
        let before = registry.entries.len();
        registry.entries.retain(|(entry, _)| *entry != id);
        registry.entries.len() != before
    }
}

fn lock<T: ?Sized>(registry: &Mutex<Registry<T>>) -> MutexGuard<'_, Registry<T>> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}
