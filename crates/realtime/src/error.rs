//! Tracking errors

use http::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type used across the tracking crates.
pub type Result<T> = anyhow::Result<T, Error>;

/// Domain level error type.
///
/// Nothing in the tracking subsystem surfaces these to the UI layer; they
/// are produced by fetch and parse paths and absorbed (logged) by the poll
/// loop and channel drivers.
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Error {
    /// A caller supplied value (channel key, URL template) is invalid.
    #[error("code: 400, description: {0}")]
    BadRequest(String),

    /// An upstream endpoint answered with a non-success status.
    #[error("code: 502, description: {0}")]
    BadGateway(String),

    /// A payload could not be decoded.
    #[error("code: 500, description: invalid_format {0}")]
    InvalidFormat(String),

    /// Anything else, with its context chain.
    #[error("code: 500, description: {0}")]
    Internal(String),
}

impl Error {
    /// HTTP status equivalent of the variant, used as the `code` log field.
    #[must_use]
    pub const fn code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::BadGateway(_) => StatusCode::BAD_GATEWAY,
            Self::InvalidFormat(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        let Some(source) = err.downcast_ref::<Self>() else {
            return Self::Internal(context_chain(&err));
        };
        tracing::debug!(error = %err, source = %source, "rewrapping tracking error");

        // keep the variant, carry the added context
        match source {
            Self::InvalidFormat(detail) => Self::InvalidFormat(format!("{err}: {detail}")),
            Self::BadRequest(_) => Self::BadRequest(context_chain(&err)),
            Self::BadGateway(_) => Self::BadGateway(context_chain(&err)),
            Self::Internal(_) => Self::Internal(context_chain(&err)),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidFormat(err.to_string())
    }
}

fn context_chain(err: &anyhow::Error) -> String {
    err.chain().map(ToString::to_string).collect::<Vec<_>>().join(" -> ")
}

/// Build an [`Error::BadRequest`] from format arguments.
#[macro_export]
macro_rules! bad_request {
    ($($arg:tt)+) => {
        $crate::Error::BadRequest(format!($($arg)+))
    };
}

/// Build an [`Error::BadGateway`] from format arguments.
#[macro_export]
macro_rules! bad_gateway {
    ($($arg:tt)+) => {
        $crate::Error::BadGateway(format!($($arg)+))
    };
}
