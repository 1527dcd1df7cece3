//! Inbound prepl frames.

use std::fmt;

use thiserror::Error;

use super::edn::Value;

/// Terminal directive written by the writer task when the eval queue closes.
pub const QUIT_DIRECTIVE: &str = ":repl/quit\n";

/// Discriminator of an inbound frame (`:tag`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageTag {
    /// Return value of an evaluation.
    Ret,
    /// Value sent with `tap>`.
    Tap,
    /// Text written to `*out*`.
    Out,
    /// Text written to `*err*`.
    Err,
    Other(String),
}

impl MessageTag {
    pub fn from_keyword(keyword: &str) -> Self {
        match keyword {
            "ret" => MessageTag::Ret,
            "tap" => MessageTag::Tap,
            "out" => MessageTag::Out,
            "err" => MessageTag::Err,
            other => MessageTag::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            MessageTag::Ret => "ret",
            MessageTag::Tap => "tap",
            MessageTag::Out => "out",
            MessageTag::Err => "err",
            MessageTag::Other(other) => other,
        }
    }

    /// Whether `:val` holds serialized EDN that needs a second decode.
    pub fn is_payload_bearing(&self) -> bool {
        matches!(self, MessageTag::Ret | MessageTag::Tap)
    }
}

impl fmt::Display for MessageTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Frame shape errors. The reader logs these and skips the frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("expected a map, got {found}")]
    NotAMap { found: String },

    #[error("frame has no keyword :tag")]
    MissingTag,
}

/// A decoded frame from a prepl stream.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub tag: MessageTag,
    /// Raw `:val` until the router decodes `ret`/`tap` payloads.
    pub val: Value,
    pub ns: Option<String>,
    pub form: Option<String>,
    /// Evaluation time in milliseconds.
    pub ms: Option<i64>,
    pub exception: bool,
}

impl InboundMessage {
    /// Build a message from a decoded frame map.
    pub fn from_value(value: Value) -> Result<Self, FrameError> {
        if !matches!(value, Value::Map(_)) {
            let found = value.to_string().chars().take(80).collect();
            return Err(FrameError::NotAMap { found });
        }

        let tag = value
            .get("tag")
            .and_then(Value::as_keyword)
            .map(MessageTag::from_keyword)
            .ok_or(FrameError::MissingTag)?;

        Ok(Self {
            tag,
            val: value.get("val").cloned().unwrap_or(Value::Nil),
            ns: value.get("ns").and_then(Value::as_str).map(str::to_string),
            form: value.get("form").and_then(Value::as_str).map(str::to_string),
            ms: value.get("ms").and_then(Value::as_int),
            exception: value
                .get("exception")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        })
    }

    /// Convenience constructor used by tests and synthetic messages.
    pub fn new(tag: MessageTag, val: Value) -> Self {
        Self {
            tag,
            val,
            ns: None,
            form: None,
            ms: None,
            exception: false,
        }
    }

    /// The payload as text: strings verbatim, anything else printed as EDN.
    pub fn text(&self) -> String {
        match &self.val {
            Value::Str(s) => s.clone(),
            other => other.to_string(),
        }
    }
}
