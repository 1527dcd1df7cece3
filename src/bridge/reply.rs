//! Outcome of one request/response exchange.

use crate::protocol::{InboundMessage, Value};

/// What a caller gets back from an exchange.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// The `ret` frame answering the request.
    Value(InboundMessage),
    /// The connection was torn down while waiting; there is no result.
    Closed,
    /// The caller's timeout expired first. The late reply is discarded by the
    /// next exchange on the same connection.
    TimedOut,
}

impl Reply {
    /// The decoded payload, if there is one.
    pub fn value(&self) -> Option<&Value> {
        match self {
            Reply::Value(message) => Some(&message.val),
            Reply::Closed | Reply::TimedOut => None,
        }
    }

    pub fn message(&self) -> Option<&InboundMessage> {
        match self {
            Reply::Value(message) => Some(message),
            Reply::Closed | Reply::TimedOut => None,
        }
    }
}
