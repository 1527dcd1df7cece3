//! Validated timeouts for the connection registry.

use std::time::Duration;

use crate::error::{ReplError, ReplResult};

/// Bound on opening a connection and receiving its prelude reply.
///
/// # Valid Range
///
/// - Minimum: 1 second
/// - Maximum: 300 seconds (a cold JVM with a large classpath can be slow)
/// - Default: 30 seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitTimeout(Duration);

impl InitTimeout {
    const DEFAULT_SECS: u64 = 30;
    const MIN_SECS: u64 = 1;
    const MAX_SECS: u64 = 300;

    /// Create a new InitTimeout, rejecting durations outside 1-300s.
    pub fn new(duration: Duration) -> ReplResult<Self> {
        validate("init", duration, Self::MIN_SECS, Self::MAX_SECS).map(Self)
    }

    pub fn as_duration(&self) -> Duration {
        self.0
    }
}

impl Default for InitTimeout {
    fn default() -> Self {
        Self(Duration::from_secs(Self::DEFAULT_SECS))
    }
}

/// Global ceiling for `remove_all_with_timeout`.
///
/// Connections still draining when it expires are force-closed.
///
/// # Valid Range
///
/// - Minimum: 1 second
/// - Maximum: 60 seconds
/// - Default: 10 seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownTimeout(Duration);

impl ShutdownTimeout {
    const DEFAULT_SECS: u64 = 10;
    const MIN_SECS: u64 = 1;
    const MAX_SECS: u64 = 60;

    /// Create a new ShutdownTimeout, rejecting durations outside 1-60s.
    pub fn new(duration: Duration) -> ReplResult<Self> {
        validate("shutdown", duration, Self::MIN_SECS, Self::MAX_SECS).map(Self)
    }

    pub fn as_duration(&self) -> Duration {
        self.0
    }

    /// Build a timeout without range checks. Used by tests that need a
    /// sub-second ceiling.
    #[cfg(test)]
    pub(crate) fn unchecked(duration: Duration) -> Self {
        Self(duration)
    }
}

impl Default for ShutdownTimeout {
    fn default() -> Self {
        Self(Duration::from_secs(Self::DEFAULT_SECS))
    }
}

/// Check `min_secs <= duration <= max_secs`. The upper bound is exact, so
/// `max_secs` plus one nanosecond is rejected.
fn validate(name: &str, duration: Duration, min_secs: u64, max_secs: u64) -> ReplResult<Duration> {
    if duration < Duration::from_secs(min_secs) {
        return Err(ReplError::config(format!(
            "{} timeout must be at least {}s, got {:?}",
            name, min_secs, duration
        )));
    }
    if duration > Duration::from_secs(max_secs) {
        return Err(ReplError::config(format!(
            "{} timeout must be at most {}s, got {:?}",
            name, max_secs, duration
        )));
    }
    Ok(duration)
}
