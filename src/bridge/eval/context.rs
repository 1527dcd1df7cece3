//! Per-action request context.

use std::path::Path;

use path_clean::PathClean;

use crate::editor::{EditorContext, SourceForm};
use crate::protocol::SourceOrigin;

/// What an action targets: the normalized file path used for connection
/// matching, and where the code came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub path: String,
    pub origin: SourceOrigin,
}

/// Normalize `a/./b/../c.clj` to `a/c.clj` so matchers see canonical paths.
pub(crate) fn clean_path(path: &str) -> String {
    if path.is_empty() {
        return String::new();
    }
    Path::new(path).clean().to_string_lossy().into_owned()
}

impl RequestContext {
    pub fn new(path: &str) -> Self {
        let path = clean_path(path);
        Self {
            origin: SourceOrigin {
                path: (!path.is_empty()).then(|| path.clone()),
                ..SourceOrigin::default()
            },
            path,
        }
    }

    pub fn with_namespace(mut self, ns: impl Into<String>) -> Self {
        self.origin.ns = Some(ns.into());
        self
    }

    pub fn with_position(mut self, line: u32, column: u32) -> Self {
        self.origin.line = Some(line);
        self.origin.column = Some(column);
        self
    }

    /// Context for the editor's current buffer.
    pub fn from_editor(editor: &dyn EditorContext) -> Self {
        let ctx = Self::new(&editor.current_path());
        match editor.namespace() {
            Some(ns) => ctx.with_namespace(ns),
            None => ctx,
        }
    }

    /// The same context positioned at `form`.
    pub(crate) fn at_form(&self, form: &SourceForm) -> Self {
        self.clone().with_position(form.line, form.column)
    }
}
