//! Per-channel connection driver.
//!
//! One task per channel runs the connect / pump / backoff cycle. It holds
//! the channel's shared state, never the manager, so tearing a channel down
//! only needs the shutdown signal and a state change.

use std::any::Any;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use realtime::{Backoff, Listeners, Socket, SocketConnector};
use serde::de::DeserializeOwned;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::key::ChannelKey;
use crate::state::{ChannelMachine, ChannelState, Closed};

/// Type-erased view of a channel used by the manager.
pub trait Control: Send + Sync {
    fn state(&self) -> ChannelState;

    fn attempt(&self) -> u32;

    fn subscriber_count(&self) -> usize;

    /// Queue `text` on the current connection. Only succeeds while `Open`.
    fn send_text(&self, text: String) -> bool;

    /// Move to `Disconnected` and drop every subscriber.
    fn teardown(&self);

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// State shared between a channel's driver task and the manager.
pub struct ChannelShared<M> {
    key: ChannelKey,
    status: Mutex<Status>,
    pub listeners: Listeners<M>,
}

struct Status {
    machine: ChannelMachine,
    // writer for the current connection; replaced on every reconnect so
    // nothing queued for one connection reaches the next
    outbound: Option<mpsc::UnboundedSender<String>>,
}

impl<M> ChannelShared<M>
where
    M: DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(key: ChannelKey, backoff: Backoff) -> Self {
        let mut machine = ChannelMachine::new(backoff);
        machine.begin();
        Self {
            key,
            status: Mutex::new(Status { machine, outbound: None }),
            listeners: Listeners::new(),
        }
    }

    /// No connection can ever be made (no runtime).
    pub fn fail(&self) {
        self.lock().machine.fail();
    }

    fn opened(&self, outbound: mpsc::UnboundedSender<String>) -> bool {
        let mut status = self.lock();
        if !status.machine.opened() {
            return false;
        }
        status.outbound = Some(outbound);
        true
    }

    fn closed(&self) -> (Closed, u32) {
        let mut status = self.lock();
        status.outbound = None;
        let next = status.machine.closed();
        (next, status.machine.attempt())
    }

    fn reconnecting(&self) -> bool {
        self.lock().machine.reconnecting()
    }

    /// Parse one inbound frame and fan it out. A frame that does not parse
    /// is dropped without touching the channel state.
    fn dispatch(&self, text: &str) {
        match serde_json::from_str::<M>(text) {
            Ok(message) => {
                let delivered = self.listeners.notify(&message);
                debug!(key = %self.key, delivered, "channel message delivered");
            }
            Err(err) => {
                warn!(
                    monotonic_counter.channel_parse_errors = 1,
                    key = %self.key,
                    error = %err,
                    "dropping unparseable channel message"
                );
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Status> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<M> Control for ChannelShared<M>
where
    M: DeserializeOwned + Send + Sync + 'static,
{
    fn state(&self) -> ChannelState {
        self.lock().machine.state()
    }

    fn attempt(&self) -> u32 {
        self.lock().machine.attempt()
    }

    fn subscriber_count(&self) -> usize {
        self.listeners.len()
    }

    fn send_text(&self, text: String) -> bool {
        let status = self.lock();
        if status.machine.state() != ChannelState::Open {
            return false;
        }
        status.outbound.as_ref().is_some_and(|outbound| outbound.send(text).is_ok())
    }

    fn teardown(&self) {
        let mut status = self.lock();
        status.machine.teardown();
        status.outbound = None;
        drop(status);
        self.listeners.clear();
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

enum Ended {
    Shutdown,
    Dropped,
}

/// Drive one channel until it is torn down or its reconnection budget is
/// spent.
pub async fn run<C, M>(
    connector: Arc<C>, url: String, shared: Arc<ChannelShared<M>>,
    mut shutdown: oneshot::Receiver<()>,
) where
    C: SocketConnector,
    M: DeserializeOwned + Send + Sync + 'static,
{
    let key = shared.key.clone();

    loop {
        let connected = tokio::select! {
            biased;
            _ = &mut shutdown => return,
            connected = connector.connect(&url) => connected,
        };

        match connected {
            Ok(mut socket) => {
                let (outbound, mut outbound_rx) = mpsc::unbounded_channel();
                if !shared.opened(outbound) {
                    // torn down while connecting
                    close(&key, &mut socket).await;
                    return;
                }
                info!(key = %key, "channel open");

                let ended = pump(&mut socket, &mut outbound_rx, &shared, &mut shutdown).await;
                if matches!(ended, Ended::Shutdown) {
                    close(&key, &mut socket).await;
                    return;
                }
            }
            Err(err) => {
                warn!(
                    monotonic_counter.channel_connect_errors = 1,
                    key = %key,
                    error = %err,
                    "channel connect failed"
                );
            }
        }

        match shared.closed() {
            (Closed::Reconnect(delay), attempt) => {
                info!(
                    monotonic_counter.channel_reconnects = 1,
                    key = %key,
                    attempt,
                    delay_ms = delay.as_millis(),
                    "channel reconnect scheduled"
                );
                tokio::select! {
                    biased;
                    _ = &mut shutdown => return,
                    () = tokio::time::sleep(delay) => {}
                }
                if !shared.reconnecting() {
                    return;
                }
            }
            (Closed::Exhausted, attempt) => {
                error!(
                    monotonic_counter.channel_failures = 1,
                    key = %key,
                    attempt,
                    "channel reconnection attempts exhausted"
                );
                return;
            }
            (Closed::Ignored, _) => return,
        }
    }
}

async fn pump<S, M>(
    socket: &mut S, outbound: &mut mpsc::UnboundedReceiver<String>, shared: &ChannelShared<M>,
    shutdown: &mut oneshot::Receiver<()>,
) -> Ended
where
    S: Socket,
    M: DeserializeOwned + Send + Sync + 'static,
{
    loop {
        tokio::select! {
            biased;
            _ = &mut *shutdown => return Ended::Shutdown,
            inbound = socket.recv() => match inbound {
                Some(Ok(text)) => shared.dispatch(&text),
                Some(Err(err)) => {
                    warn!(
                        monotonic_counter.channel_transport_errors = 1,
                        key = %shared.key,
                        error = %err,
                        "channel transport error"
                    );
                    return Ended::Dropped;
                }
                None => {
                    info!(key = %shared.key, "channel closed by peer");
                    return Ended::Dropped;
                }
            },
            Some(text) = outbound.recv() => {
                if let Err(err) = socket.send(text).await {
                    warn!(
                        monotonic_counter.channel_transport_errors = 1,
                        key = %shared.key,
                        error = %err,
                        "channel send failed"
                    );
                    return Ended::Dropped;
                }
            }
        }
    }
}

async fn close<S: Socket>(key: &ChannelKey, socket: &mut S) {
    if let Err(err) = socket.close().await {
        debug!(key = %key, error = %err, "channel close failed");
    }
}
