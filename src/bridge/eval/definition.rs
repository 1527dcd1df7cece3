//! Go-to-definition.
//!
//! The remote answers with a `[file line column]` vector. Anything else falls
//! back to the editor's own definition lookup.

use log::warn;

use super::{Orchestrator, Presentation};
use crate::editor::SourceLocation;
use crate::protocol::Value;

/// Read a `[file line column]` reply. The column may be nil and defaults to 1.
pub(crate) fn parse_location(value: &Value) -> Option<SourceLocation> {
    let [file, line, column] = value.as_seq()? else {
        return None;
    };
    let file = file.as_str()?;
    let path = file.strip_prefix("file:").unwrap_or(file);
    if path.is_empty() {
        return None;
    }
    let line = u32::try_from(line.as_int()?).ok().filter(|&l| l > 0)?;
    let column = match column {
        Value::Nil => 1,
        other => u32::try_from(other.as_int()?).ok().filter(|&c| c > 0)?,
    };
    Some(SourceLocation {
        path: path.to_string(),
        line,
        column,
    })
}

impl Orchestrator {
    /// Jump to the definition of `name`.
    ///
    /// Uses the first matching connection that answers. Returns the location
    /// jumped to, or `None` when the editor fallback was used (or nothing
    /// matched).
    pub async fn definition(&self, name: &str) -> Option<SourceLocation> {
        let ctx = self.context();
        let replies = self
            .execute(&ctx, None, Presentation::Silent, |code, variant| {
                code.definition(variant, name)
            })
            .await;
        if replies.is_empty() {
            return None;
        }

        let location = replies
            .iter()
            .filter_map(|reply| reply.reply.value())
            .find_map(parse_location);
        match location {
            Some(location) => {
                self.editor.jump_to(&location);
                Some(location)
            }
            None => {
                warn!(
                    target: "conjure::eval",
                    "No definition location for {}, falling back to editor lookup",
                    name
                );
                self.editor.fallback_definition(name);
                None
            }
        }
    }
}
