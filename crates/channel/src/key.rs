use std::fmt::{self, Display};
use std::str::FromStr;

use realtime::{Error, bad_request};
use serde::{Deserialize, Serialize};

/// The kind of resource a channel tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Ride,
    Voyage,
}

impl ResourceKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ride => "ride",
            Self::Voyage => "voyage",
        }
    }
}

impl Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one channel: a resource kind plus the resource id, written
/// `ride:<id>` or `voyage:<id>`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChannelKey {
    kind: ResourceKind,
    id: String,
}

impl ChannelKey {
    #[must_use]
    pub fn ride(id: impl Into<String>) -> Self {
        Self { kind: ResourceKind::Ride, id: id.into() }
    }

    #[must_use]
    pub fn voyage(id: impl Into<String>) -> Self {
        Self { kind: ResourceKind::Voyage, id: id.into() }
    }

    #[must_use]
    pub const fn kind(&self) -> ResourceKind {
        self.kind
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

impl FromStr for ChannelKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((kind, id)) = s.split_once(':') else {
            return Err(bad_request!("channel key {} is missing a kind prefix", s));
        };
        if id.is_empty() {
            return Err(bad_request!("channel key {} has an empty id", s));
        }
        match kind {
            "ride" => Ok(Self::ride(id)),
            "voyage" => Ok(Self::voyage(id)),
            other => Err(bad_request!("unknown channel kind {}", other)),
        }
    }
}
