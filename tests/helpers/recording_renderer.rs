//! Renderer that records everything it is asked to show.

use std::sync::Mutex;
use std::time::Duration;

use conjure::{ConnectionInfo, InboundMessage, OutputRenderer};

#[derive(Debug, Default)]
pub struct RecordingRenderer {
    lines: Mutex<Vec<String>>,
}

impl RecordingRenderer {
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }

    pub fn contains(&self, line: &str) -> bool {
        self.lines().iter().any(|l| l == line)
    }

    /// Position of the first line equal to `line`.
    pub fn position(&self, line: &str) -> Option<usize> {
        self.lines().iter().position(|l| l == line)
    }

    /// Poll until a line satisfies `pred`.
    pub async fn wait_for(&self, pred: impl Fn(&str) -> bool) -> bool {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while tokio::time::Instant::now() < deadline {
            if self.lines().iter().any(|l| pred(l)) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    fn push(&self, line: String) {
        self.lines.lock().unwrap().push(line);
    }
}

impl OutputRenderer for RecordingRenderer {
    fn eval_echo(&self, conn: &ConnectionInfo, code: &str) {
        self.push(format!("echo [{}] {}", conn.tag, code));
    }

    fn result(&self, conn: &ConnectionInfo, message: &InboundMessage) {
        let kind = if message.exception { "exception" } else { "result" };
        self.push(format!("{} [{}] {}", kind, conn.tag, message.val));
    }

    fn doc(&self, conn: &ConnectionInfo, message: &InboundMessage) {
        self.push(format!("doc [{}] {}", conn.tag, message.text()));
    }

    fn test_result(&self, conn: &ConnectionInfo, message: &InboundMessage) {
        self.push(format!("test [{}] {}", conn.tag, message.text()));
    }

    fn event(&self, conn: &ConnectionInfo, message: &InboundMessage) {
        self.push(format!("{} [{}] {}", message.tag, conn.tag, message.text()));
    }

    fn info(&self, text: &str) {
        self.push(format!("info {}", text));
    }

    fn warn(&self, text: &str) {
        self.push(format!("warn {}", text));
    }

    fn error(&self, text: &str) {
        self.push(format!("error {}", text));
    }
}
