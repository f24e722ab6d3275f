use std::time::Duration;

/// Poll cadence used when the host does not configure one.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(4);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FleetConfig {
    /// Fleet snapshot endpoint.
    pub snapshot_url: String,
    pub poll_interval: Duration,
    /// Evict vehicles whose last update is older than this, measured against
    /// the batch's server time. `None` leaves removal to explicit ids only.
    pub stale_after: Option<Duration>,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            snapshot_url: "http://localhost:8080/fleet/snapshot".to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            stale_after: None,
        }
    }
}
