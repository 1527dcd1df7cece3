//! Connection state machine for prepl connections.

use std::fmt;

/// Lifecycle state of a connection.
///
/// Transitions only move forward:
/// - Connecting -> Live (prelude answered, router running)
/// - Live -> Draining (local remove or remote EOF)
/// - Draining -> Closed (all three tasks exited, or aborted on forced shutdown)
///
/// A connection that fails during setup jumps straight from Connecting to Closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConnectionState {
    /// Stream open, prelude in flight
    Connecting,
    /// Accepting evals
    Live,
    /// Queues closed, waiting for tasks to exit
    Draining,
    /// Terminal
    Closed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Live => "live",
            ConnectionState::Draining => "draining",
            ConnectionState::Closed => "closed",
        }
    }

    /// Whether moving to `next` is a forward transition.
    pub(crate) fn can_advance_to(self, next: ConnectionState) -> bool {
        next > self
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
