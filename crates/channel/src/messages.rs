//! # Channel messages
//!
//! Wire models for the realtime transport. Every frame is a JSON object
//! tagged by `type` with the payload under `data`:
//!
//! ```json
//! { "type": "eta_updated", "data": { "ride_id": "42", "eta_seconds": 180 } }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Messages received on a ride channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum RideEvent {
    StatusChanged(RideStatusChanged),
    DriverLocation(DriverLocation),
    EtaUpdated(RideEta),
    Cancelled(RideCancelled),
    ChatMessage(ChatMessage),
}

impl RideEvent {
    #[must_use]
    pub fn ride_id(&self) -> &str {
        match self {
            Self::StatusChanged(event) => &event.ride_id,
            Self::DriverLocation(event) => &event.ride_id,
            Self::EtaUpdated(event) => &event.ride_id,
            Self::Cancelled(event) => &event.ride_id,
            Self::ChatMessage(event) => &event.resource_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RideStatus {
    Requested,
    Accepted,
    DriverArriving,
    DriverArrived,
    InProgress,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RideStatusChanged {
    pub ride_id: String,
    pub status: RideStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverLocation {
    pub ride_id: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub heading: f64,
    #[serde(default)]
    pub speed: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RideEta {
    pub ride_id: String,
    pub eta_seconds: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance_km: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RideCancelled {
    pub ride_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled_by: Option<String>,
}

/// Chat between rider and driver (ride) or passenger and crew (voyage).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(alias = "ride_id", alias = "voyage_id")]
    pub resource_id: String,
    pub sender: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
}

/// Messages received on a voyage channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum VoyageEvent {
    StatusChanged(VoyageStatusChanged),
    VesselLocation(VesselLocation),
    EtaUpdated(VoyageEta),
    Cancelled(VoyageCancelled),
    ChatMessage(ChatMessage),
}

impl VoyageEvent {
    #[must_use]
    pub fn voyage_id(&self) -> &str {
        match self {
            Self::StatusChanged(event) => &event.voyage_id,
            Self::VesselLocation(event) => &event.voyage_id,
            Self::EtaUpdated(event) => &event.voyage_id,
            Self::Cancelled(event) => &event.voyage_id,
            Self::ChatMessage(event) => &event.resource_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoyageStatus {
    Scheduled,
    Boarding,
    Departed,
    Delayed,
    Arrived,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoyageStatusChanged {
    pub voyage_id: String,
    pub status: VoyageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VesselLocation {
    pub voyage_id: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub heading: f64,
    #[serde(default)]
    pub speed_knots: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoyageEta {
    pub voyage_id: String,
    pub eta_seconds: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoyageCancelled {
    pub voyage_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Messages a client sends on either channel kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    ChatMessage(ChatMessage),
    /// Ask the server to resend the current status.
    Refresh { resource_id: String },
}
