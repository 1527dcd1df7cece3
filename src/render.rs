//! Output renderer collaborator.
//!
//! Replies and asynchronous output reach the user through `OutputRenderer`.
//! `TerminalRenderer` prints a commented log in the style of an editor's repl
//! buffer.

use std::io::Write;
use std::sync::Mutex;

use crate::bridge::ConnectionInfo;
use crate::error::LockResultExt;
use crate::protocol::{InboundMessage, MessageTag};

/// Receives everything the user should see.
pub trait OutputRenderer: Send + Sync {
    /// Code about to be evaluated.
    fn eval_echo(&self, conn: &ConnectionInfo, code: &str);

    fn result(&self, conn: &ConnectionInfo, message: &InboundMessage);

    fn doc(&self, conn: &ConnectionInfo, message: &InboundMessage);

    fn test_result(&self, conn: &ConnectionInfo, message: &InboundMessage);

    /// Asynchronous output (`out`, `err`, `tap`, ...) delivered by the router.
    fn event(&self, conn: &ConnectionInfo, message: &InboundMessage);

    fn info(&self, text: &str);

    fn warn(&self, text: &str);

    fn error(&self, text: &str);
}

/// Renders to any writer, one commented line per output line.
pub struct TerminalRenderer {
    out: Mutex<Box<dyn Write + Send>>,
}

impl std::fmt::Debug for TerminalRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerminalRenderer").finish_non_exhaustive()
    }
}

impl TerminalRenderer {
    pub fn new(out: impl Write + Send + 'static) -> Self {
        Self {
            out: Mutex::new(Box::new(out)),
        }
    }

    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }

    fn write_lines(&self, prefix: &str, text: &str) {
        let mut out = self.out.lock().recover_poison("TerminalRenderer::write_lines");
        let text = text.strip_suffix('\n').unwrap_or(text);
        for line in text.split('\n') {
            if let Err(e) = writeln!(out, "{}{}", prefix, line) {
                log::warn!(target: "conjure::render", "Failed to write output: {}", e);
                return;
            }
        }
        if let Err(e) = out.flush() {
            log::warn!(target: "conjure::render", "Failed to flush output: {}", e);
        }
    }
}

impl OutputRenderer for TerminalRenderer {
    fn eval_echo(&self, conn: &ConnectionInfo, code: &str) {
        let first_line = code.lines().next().unwrap_or_default();
        let ellipsis = if code.trim_end().contains('\n') { " ..." } else { "" };
        self.write_lines(
            "",
            &format!(";; [{}] {}{}", conn.tag, first_line, ellipsis),
        );
    }

    fn result(&self, _conn: &ConnectionInfo, message: &InboundMessage) {
        if message.exception {
            self.write_lines(";!! ", &message.text());
        } else {
            self.write_lines("", &message.val.to_string());
        }
    }

    fn doc(&self, _conn: &ConnectionInfo, message: &InboundMessage) {
        if message.val.is_nil() {
            self.write_lines(";; ", "No documentation found");
        } else {
            self.write_lines(";; ", &message.text());
        }
    }

    fn test_result(&self, _conn: &ConnectionInfo, message: &InboundMessage) {
        self.write_lines(";; ", &message.text());
    }

    fn event(&self, conn: &ConnectionInfo, message: &InboundMessage) {
        match &message.tag {
            MessageTag::Out => self.write_lines("; ", &message.text()),
            MessageTag::Err => self.write_lines(";! ", &message.text()),
            MessageTag::Tap => self.write_lines(
                &format!(";; [{}] tap> ", conn.tag),
                &message.val.to_string(),
            ),
            other => self.write_lines(&format!(";; [{}] {} ", conn.tag, other), &message.text()),
        }
    }

    fn info(&self, text: &str) {
        self.write_lines(";; ", text);
    }

    fn warn(&self, text: &str) {
        self.write_lines(";; WARNING: ", text);
    }

    fn error(&self, text: &str) {
        self.write_lines(";; ERROR: ", text);
    }
}
