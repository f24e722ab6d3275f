//! # Channel state machine
//!
//! The connection lifecycle of a single channel, free of any I/O so the
//! attempt counter, delay table and terminal state can be driven directly.

use std::fmt::{self, Display};
use std::time::Duration;

use realtime::Backoff;
use serde::{Deserialize, Serialize};

/// Connection state of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    /// Not connected and not trying to be. Initial state, and the state a
    /// channel is left in once torn down.
    Disconnected,
    Connecting,
    Open,
    /// The transport dropped; a reconnection is pending.
    Closed,
    /// The reconnection budget is exhausted. Terminal until torn down.
    Failed,
}

impl ChannelState {
    /// Whether the lifecycle allows moving from `self` to `next`. Teardown to
    /// `Disconnected` is always allowed and handled separately.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Disconnected | Self::Closed, Self::Connecting)
                | (Self::Connecting, Self::Open | Self::Closed)
                | (Self::Open, Self::Closed)
                | (Self::Closed, Self::Failed)
        )
    }
}

impl Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closed => "closed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// What happens after a transport close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Closed {
    /// Reconnect after the delay.
    Reconnect(Duration),
    /// The budget is spent; the channel is now `Failed`.
    Exhausted,
    /// The channel was not connecting or open (for example, already torn
    /// down), so the close is ignored.
    Ignored,
}

/// Lifecycle of one channel: state, consecutive reconnection attempts and
/// the backoff policy that bounds them.
#[derive(Debug, Clone)]
pub struct ChannelMachine {
    state: ChannelState,
    attempt: u32,
    backoff: Backoff,
}

impl ChannelMachine {
    #[must_use]
    pub const fn new(backoff: Backoff) -> Self {
        Self { state: ChannelState::Disconnected, attempt: 0, backoff }
    }

    #[must_use]
    pub const fn state(&self) -> ChannelState {
        self.state
    }

    /// Reconnections scheduled since the channel was last open.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    #[must_use]
    pub const fn backoff(&self) -> Backoff {
        self.backoff
    }

    /// `Disconnected → Connecting`, the first connection of a new channel.
    pub fn begin(&mut self) -> bool {
        self.state == ChannelState::Disconnected && self.transition(ChannelState::Connecting)
    }

    /// `Connecting → Open`. Resets the attempt counter.
    pub fn opened(&mut self) -> bool {
        if self.transition(ChannelState::Open) {
            self.attempt = 0;
            return true;
        }
        false
    }

    /// `Connecting | Open → Closed`, then decide whether to reconnect. When
    /// the budget allows, the attempt counter is incremented and the delay
    /// for this attempt returned; otherwise the channel moves to `Failed`.
    pub fn closed(&mut self) -> Closed {
        if !self.transition(ChannelState::Closed) {
            return Closed::Ignored;
        }
        match self.backoff.delay(self.attempt) {
            Some(delay) => {
                self.attempt += 1;
                Closed::Reconnect(delay)
            }
            None => {
                self.state = ChannelState::Failed;
                Closed::Exhausted
            }
        }
    }

    /// `Closed → Connecting` once the backoff delay has elapsed.
    pub fn reconnecting(&mut self) -> bool {
        self.state == ChannelState::Closed && self.transition(ChannelState::Connecting)
    }

    /// Mark the channel `Failed` without waiting for a close, used when no
    /// connection can ever be attempted.
    pub fn fail(&mut self) {
        self.state = ChannelState::Failed;
    }

    /// Tear down from any state.
    pub fn teardown(&mut self) {
        self.state = ChannelState::Disconnected;
    }

    fn transition(&mut self, next: ChannelState) -> bool {
        if self.state.can_transition_to(next) {
            self.state = next;
            return true;
        }
        false
    }
}

impl Default for ChannelMachine {
    fn default() -> Self {
        Self::new(Backoff::default())
    }
}
