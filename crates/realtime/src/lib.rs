//! # Realtime Core
//!
//! Core modules shared by the fleet aggregator and the channel manager:
//! the domain error, transport provider traits, the listener registry used
//! for subscriber fan-out, and the reconnection backoff policy.

mod backoff;
mod error;
mod listeners;
mod provider;

pub use crate::backoff::*;
pub use crate::error::*;
pub use crate::listeners::*;
pub use crate::provider::*;
