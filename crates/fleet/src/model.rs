use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::de::{Error as DeError, Unexpected};
use serde::{Deserialize, Deserializer, Serialize};

/// Epoch values above this are read as milliseconds rather than seconds.
const MILLIS_THRESHOLD: i64 = 100_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleStatus {
    Available,
    Occupied,
    EnRoute,
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
}

impl Position {
    #[must_use]
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverInfo {
    pub name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub rating: Option<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleKind {
    #[default]
    Taxi,
    Boat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleInfo {
    #[serde(default)]
    pub kind: VehicleKind,
    #[serde(default)]
    pub make: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub plate_number: Option<String>,
    #[serde(default)]
    pub capacity: Option<u32>,
}

/// Last known state of one fleet unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleRecord {
    pub vehicle_id: String,
    #[serde(flatten)]
    pub position: Position,
    /// Degrees clockwise from north, `0..360`.
    pub heading: f64,
    /// km/h.
    pub speed: f64,
    pub status: VehicleStatus,
    #[serde(deserialize_with = "deserialize_ts")]
    pub last_updated: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver_info: Option<DriverInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vehicle_info: Option<VehicleInfo>,
}

impl VehicleRecord {
    /// Whether any tracked field differs from `other`: position, heading,
    /// speed, status or last update time. Driver and vehicle details are
    /// descriptive and do not count as a change.
    #[must_use]
    #[allow(clippy::float_cmp)]
    pub fn differs_from(&self, other: &Self) -> bool {
        self.position != other.position
            || self.heading != other.heading
            || self.speed != other.speed
            || self.status != other.status
            || self.last_updated != other.last_updated
    }

    #[must_use]
    pub fn is_available(&self) -> bool {
        self.status == VehicleStatus::Available
    }
}

/// One poll response, normalised.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateBatch {
    /// Server time of the snapshot; the cursor for the next poll.
    pub as_of: DateTime<Utc>,
    pub changed: Vec<VehicleRecord>,
    pub removed_ids: BTreeSet<String>,
}

impl UpdateBatch {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.removed_ids.is_empty()
    }
}

/// Fleet snapshot endpoint payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetSnapshot {
    #[serde(deserialize_with = "deserialize_ts")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub vehicles: Vec<VehicleRecord>,
    #[serde(default)]
    pub removed_vehicle_ids: Vec<String>,
}

impl From<FleetSnapshot> for UpdateBatch {
    fn from(snapshot: FleetSnapshot) -> Self {
        let mut removed_ids: BTreeSet<String> = snapshot.removed_vehicle_ids.into_iter().collect();

        // an id reported both ways is kept as changed
        for vehicle in &snapshot.vehicles {
            if removed_ids.remove(&vehicle.vehicle_id) {
                tracing::warn!(
                    vehicle = %vehicle.vehicle_id,
                    "vehicle reported as both changed and removed"
                );
            }
        }

        Self { as_of: snapshot.timestamp, changed: snapshot.vehicles, removed_ids }
    }
}

fn deserialize_ts<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    struct TsVisitor;

    impl TsVisitor {
        fn from_epoch<E: DeError>(value: i64) -> Result<DateTime<Utc>, E> {
            let parsed = if value.abs() >= MILLIS_THRESHOLD {
                Utc.timestamp_millis_opt(value).single()
            } else {
                Utc.timestamp_opt(value, 0).single()
            };
            parsed.ok_or_else(|| DeError::invalid_value(Unexpected::Signed(value), &TsVisitor))
        }
    }

    impl serde::de::Visitor<'_> for TsVisitor {
        type Value = DateTime<Utc>;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a timestamp as RFC3339 string or unix seconds/milliseconds")
        }

        fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
        where
            E: DeError,
        {
            Self::from_epoch(value)
        }

        fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
        where
            E: DeError,
        {
            let value = i64::try_from(value)
                .map_err(|_| DeError::invalid_value(Unexpected::Unsigned(value), &self))?;
            Self::from_epoch(value)
        }

        #[allow(clippy::cast_possible_truncation)]
        fn visit_f64<E>(self, value: f64) -> Result<Self::Value, E>
        where
            E: DeError,
        {
            Self::from_epoch(value as i64)
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: DeError,
        {
            if let Ok(dt) = DateTime::parse_from_rfc3339(value.trim()) {
                return Ok(dt.with_timezone(&Utc));
            }
            if let Ok(epoch) = value.trim().parse::<i64>() {
                return Self::from_epoch(epoch);
            }
            Err(DeError::invalid_value(Unexpected::Str(value), &self))
        }
    }

    deserializer.deserialize_any(TsVisitor)
}
