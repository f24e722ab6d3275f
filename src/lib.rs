//! # Tracking
//!
//! Real-time fleet and ride tracking for the hailing app: a differential
//! polling [`FleetAggregator`] for nearby vehicles and a [`ChannelManager`]
//! of auto-reconnecting ride and voyage channels, composed into a single
//! [`Tracker`] with an explicit lifecycle.

mod config;
mod provider;

pub use channel::{
    ChannelConfig, ChannelKey, ChannelManager, ChannelState, ClientMessage, Disconnect,
    RideEvent, VoyageEvent,
};
pub use fleet::{FleetAggregator, FleetConfig, Position, VehicleRecord, VehicleStatus};
use realtime::{HttpRequest, SocketConnector};
pub use realtime::{Error, Result, Subscription};
use tracing::info;

pub use crate::config::Config;
pub use crate::provider::{Provider, WebSocket};

/// Owns one fleet aggregator and one channel manager sharing a transport
/// provider.
pub struct Tracker<P> {
    fleet: FleetAggregator<P>,
    channels: ChannelManager<P>,
}

impl<P> Tracker<P>
where
    P: HttpRequest + SocketConnector + Clone,
{
    #[must_use]
    pub fn new(config: Config, provider: P) -> Self {
        Self {
            fleet: FleetAggregator::new(config.fleet, provider.clone()),
            channels: ChannelManager::new(config.channels, provider),
        }
    }

    #[must_use]
    pub const fn fleet(&self) -> &FleetAggregator<P> {
        &self.fleet
    }

    #[must_use]
    pub const fn channels(&self) -> &ChannelManager<P> {
        &self.channels
    }

    /// Start fleet polling at the configured interval. Channels connect as
    /// they are opened.
    pub fn start(&self) -> bool {
        self.fleet.start()
    }

    /// Stop polling, drop fleet subscribers and close every channel, as on
    /// logout.
    pub fn shutdown(&self) {
        self.fleet.shutdown();
        let closed = self.channels.close_all();
        info!(closed, "tracker shut down");
    }
}

impl Tracker<Provider> {
    /// A tracker configured from the environment with the default
    /// transports.
    #[must_use]
    pub fn from_env() -> Self {
        Self::new(Config::from_env(), Provider::new())
    }
}
