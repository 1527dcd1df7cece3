//! Symbol completion.

use super::{Orchestrator, Presentation};
use crate::protocol::Value;

/// Strings in a completion reply; other elements are ignored.
fn candidates(value: &Value) -> impl Iterator<Item = &str> {
    value
        .as_seq()
        .unwrap_or_default()
        .iter()
        .filter_map(Value::as_str)
}

impl Orchestrator {
    /// Names starting with `prefix` known to the matching connections,
    /// sorted and deduplicated across connections.
    pub async fn completions(&self, prefix: &str) -> Vec<String> {
        let ctx = self.context();
        let replies = self
            .execute(&ctx, None, Presentation::Silent, |code, variant| {
                code.completions(variant, ctx.origin.ns.as_deref(), prefix)
            })
            .await;

        let mut names: Vec<String> = replies
            .iter()
            .filter_map(|reply| reply.reply.value())
            .flat_map(candidates)
            .map(str::to_string)
            .collect();
        names.sort();
        names.dedup();
        names
    }
}
