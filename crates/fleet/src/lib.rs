//! Fleet location aggregator.
//!
//! Polls a fleet snapshot endpoint with a delta cursor, mirrors the fleet in
//! memory and notifies subscribers whenever the live set actually changes.

pub mod aggregator;
pub mod config;
pub mod geo;
pub mod model;
pub mod snapshot;

pub use aggregator::FleetAggregator;
pub use config::FleetConfig;
pub use geo::{EARTH_RADIUS_KM, haversine_km};
pub use model::*;
pub use realtime::Subscription;
