use realtime::Backoff;

use crate::key::{ChannelKey, ResourceKind};

/// Placeholder substituted with the (URL-encoded) resource id.
pub const ID_PLACEHOLDER: &str = "{id}";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Ride channel URL template, e.g. `wss://host/ws/rides/{id}`.
    pub ride_url: String,
    /// Voyage channel URL template.
    pub voyage_url: String,
    pub backoff: Backoff,
}

impl ChannelConfig {
    /// Transport URL for `key`.
    #[must_use]
    pub fn url_for(&self, key: &ChannelKey) -> String {
        let template = match key.kind() {
            ResourceKind::Ride => &self.ride_url,
            ResourceKind::Voyage => &self.voyage_url,
        };
        template.replace(ID_PLACEHOLDER, &urlencoding::encode(key.id()))
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            ride_url: "ws://localhost:8080/ws/rides/{id}".to_string(),
            voyage_url: "ws://localhost:8080/ws/voyages/{id}".to_string(),
            backoff: Backoff::default(),
        }
    }
}
