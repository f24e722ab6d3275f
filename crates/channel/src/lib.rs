//! # Realtime channels
//!
//! One reconnecting stream per tracked ride or voyage. Each channel owns an
//! explicit state machine (`Disconnected → Connecting → Open → Closed`, then
//! `Connecting` again or the terminal `Failed`), a backoff schedule and an
//! ordered subscriber set.

pub mod config;
mod driver;
pub mod key;
pub mod manager;
pub mod messages;
pub mod state;

pub use config::ChannelConfig;
pub use key::{ChannelKey, ResourceKind};
pub use manager::{ChannelManager, Disconnect};
pub use messages::*;
pub use realtime::{Backoff, Subscription};
pub use state::{ChannelMachine, ChannelState, Closed};
