//! Editor context collaborator.
//!
//! The orchestrator asks the editor for the text to evaluate and where it came
//! from, and asks it to move the cursor for definition lookups.

use std::sync::Mutex;

use crate::error::LockResultExt;
use crate::protocol::{Value, edn};

/// A piece of buffer text with the position of its first character (1-based).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceForm {
    pub text: String,
    pub line: u32,
    pub column: u32,
}

impl SourceForm {
    pub fn new(text: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            text: text.into(),
            line,
            column,
        }
    }
}

/// A file position (1-based line and column).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    pub path: String,
    pub line: u32,
    pub column: u32,
}

/// Namespace declared by the leading `(ns ...)` form of `source`.
pub fn detect_namespace(source: &str) -> Option<String> {
    let (form, _) = edn::read_prefix(source).ok()??;
    match form.as_seq()? {
        [Value::Symbol(head), Value::Symbol(name), ..] if head == "ns" => Some(name.clone()),
        _ => None,
    }
}

/// Access to the editor state the orchestrator needs.
pub trait EditorContext: Send + Sync {
    fn current_path(&self) -> String;

    /// Namespace declared by the current buffer, if any.
    fn namespace(&self) -> Option<String>;

    /// Innermost form under the cursor.
    fn current_form(&self) -> Option<SourceForm>;

    /// Outermost form under the cursor.
    fn root_form(&self) -> Option<SourceForm>;

    fn selection(&self) -> Option<SourceForm>;

    fn buffer_text(&self) -> String;

    fn jump_to(&self, location: &SourceLocation);

    /// Used when the repl cannot locate a definition.
    fn fallback_definition(&self, name: &str);
}

/// Editor context backed by fixed values, used by the command loop where
/// every command carries its own path and text.
#[derive(Debug, Default)]
pub struct StaticContext {
    path: String,
    namespace: Option<String>,
    text: String,
    jumps: Mutex<Vec<SourceLocation>>,
    fallbacks: Mutex<Vec<String>>,
}

impl StaticContext {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    /// Locations passed to `jump_to`, oldest first.
    pub fn jumps(&self) -> Vec<SourceLocation> {
        self.jumps.lock().recover_poison("StaticContext::jumps").clone()
    }

    /// Names passed to `fallback_definition`, oldest first.
    pub fn fallbacks(&self) -> Vec<String> {
        self.fallbacks
            .lock()
            .recover_poison("StaticContext::fallbacks")
            .clone()
    }

    fn whole_text(&self) -> Option<SourceForm> {
        if self.text.trim().is_empty() {
            None
        } else {
            Some(SourceForm::new(self.text.clone(), 1, 1))
        }
    }
}

impl EditorContext for StaticContext {
    fn current_path(&self) -> String {
        self.path.clone()
    }

    fn namespace(&self) -> Option<String> {
        self.namespace.clone()
    }

    fn current_form(&self) -> Option<SourceForm> {
        self.whole_text()
    }

    fn root_form(&self) -> Option<SourceForm> {
        self.whole_text()
    }

    fn selection(&self) -> Option<SourceForm> {
        self.whole_text()
    }

    fn buffer_text(&self) -> String {
        self.text.clone()
    }

    fn jump_to(&self, location: &SourceLocation) {
        log::info!(
            target: "conjure::editor",
            "Jump to {}:{}:{}",
            location.path,
            location.line,
            location.column
        );
        self.jumps
            .lock()
            .recover_poison("StaticContext::jump_to")
            .push(location.clone());
    }

    fn fallback_definition(&self, name: &str) {
        self.fallbacks
            .lock()
            .recover_poison("StaticContext::fallback_definition")
            .push(name.to_string());
    }
}
