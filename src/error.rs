//! Error handling types for conjure
//!
//! This module provides the error types shared by the registry, the transport
//! pumps and the configuration loader.

use std::sync::PoisonError;
use std::time::Duration;
use thiserror::Error;

/// Error type for connection, registry and configuration operations
#[derive(Debug, Error)]
pub enum ReplError {
    /// Opening the TCP stream failed
    #[error("[{tag}] connection to {addr} failed: {source}")]
    Connect {
        tag: String,
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Path matcher did not compile
    #[error("Invalid path pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// The connection went away before the operation could complete
    #[error("[{tag}] connection closed")]
    ConnectionClosed { tag: String },

    /// Connect or prelude did not finish in time
    #[error("[{tag}] timed out after {after:?}")]
    Timeout { tag: String, after: Duration },

    /// Configuration error
    #[error("Invalid configuration: {message}")]
    Config { message: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for repl operations
pub type ReplResult<T> = Result<T, ReplError>;

/// Helper trait to convert PoisonError into a usable guard
pub trait LockResultExt<T> {
    /// Recover the guard from a poisoned lock, logging which operation hit it.
    fn recover_poison(self, context: &str) -> T;
}

impl<T> LockResultExt<T> for Result<T, PoisonError<T>> {
    fn recover_poison(self, context: &str) -> T {
        match self {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!(
                    target: "conjure::lock_recovery",
                    "Recovered from poisoned lock in {}",
                    context
                );
                poisoned.into_inner()
            }
        }
    }
}

impl ReplError {
    /// Create a connection-closed error
    pub fn closed(tag: impl Into<String>) -> Self {
        ReplError::ConnectionClosed { tag: tag.into() }
    }

    /// Create a timeout error
    pub fn timeout(tag: impl Into<String>, after: Duration) -> Self {
        ReplError::Timeout {
            tag: tag.into(),
            after,
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        ReplError::Config {
            message: message.into(),
        }
    }
}
