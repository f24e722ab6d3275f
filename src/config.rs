//! Host configuration loaded from the environment.

use std::env;
use std::time::Duration;

use channel::ChannelConfig;
use fleet::FleetConfig;
use realtime::{Backoff, DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    pub fleet: FleetConfig,
    pub channels: ChannelConfig,
}

impl Config {
    /// Load configuration from process environment variables, falling back
    /// to defaults for anything unset or unparseable.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let fleet_defaults = FleetConfig::default();
        let channel_defaults = ChannelConfig::default();

        let fleet = FleetConfig {
            snapshot_url: env_string(&lookup, "FLEET_SNAPSHOT_URL", &fleet_defaults.snapshot_url),
            poll_interval: Duration::from_secs(env_u64(
                &lookup,
                "FLEET_POLL_INTERVAL_SECS",
                fleet_defaults.poll_interval.as_secs(),
            )),
            stale_after: env_opt_u64(&lookup, "FLEET_STALE_AFTER_SECS").map(Duration::from_secs),
        };

        let base_ms = u64::try_from(DEFAULT_BASE_DELAY.as_millis()).unwrap_or(1_000);
        let backoff = Backoff::new(
            Duration::from_millis(env_u64(&lookup, "CHANNEL_RECONNECT_BASE_MS", base_ms)),
            env_u32(&lookup, "CHANNEL_MAX_RECONNECT_ATTEMPTS", DEFAULT_MAX_ATTEMPTS),
        );
        let channels = ChannelConfig {
            ride_url: env_string(&lookup, "RIDE_CHANNEL_URL", &channel_defaults.ride_url),
            voyage_url: env_string(&lookup, "VOYAGE_CHANNEL_URL", &channel_defaults.voyage_url),
            backoff,
        };

        Self { fleet, channels }
    }
}

fn env_string(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: &str) -> String {
    let value = lookup(key).map(|value| value.trim().to_string());
    value.filter(|value| !value.is_empty()).unwrap_or_else(|| {
        tracing::trace!("{key} not set, using default: {default}");
        default.to_string()
    })
}

fn env_opt_u64(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<u64> {
    let value = lookup(key)?;
    let parsed = value.trim().parse::<u64>().ok();
    if parsed.is_none() {
        tracing::warn!("{key} is not a whole number: {value}");
    }
    parsed
}

fn env_u64(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: u64) -> u64 {
    env_opt_u64(lookup, key).unwrap_or_else(|| {
        tracing::trace!("{key} not set, using default: {default}");
        default
    })
}

fn env_u32(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: u32) -> u32 {
    env_opt_u64(lookup, key).and_then(|value| u32::try_from(value).ok()).unwrap_or_else(|| {
        tracing::trace!("{key} not set, using default: {default}");
        default
    })
}
