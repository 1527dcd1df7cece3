//! Test runner actions.

use super::{EvalReply, Orchestrator, Presentation};

/// A namespace together with its `-test` sibling, source namespace first.
pub(crate) fn test_namespaces(ns: &str) -> Vec<String> {
    match ns.strip_suffix("-test") {
        Some(base) if !base.is_empty() => vec![base.to_string(), ns.to_string()],
        _ => vec![ns.to_string(), format!("{}-test", ns)],
    }
}

impl Orchestrator {
    /// Run the tests of the current namespace and its `-test` sibling.
    pub async fn run_tests(&self) -> Vec<EvalReply> {
        let ctx = self.context();
        let Some(ns) = ctx.origin.ns.clone() else {
            self.renderer().warn("Could not determine the current namespace");
            return Vec::new();
        };
        let namespaces = test_namespaces(&ns);
        self.renderer()
            .info(&format!("Running tests for {}", namespaces.join(", ")));
        self.execute(&ctx, None, Presentation::TestResult, |code, variant| {
            code.run_tests(variant, &namespaces)
        })
        .await
    }

    /// Run every loaded test, optionally only in namespaces matching `pattern`.
    pub async fn run_all_tests(&self, pattern: Option<&str>) -> Vec<EvalReply> {
        let ctx = self.context();
        self.renderer().info("Running all tests");
        self.execute(&ctx, None, Presentation::TestResult, |code, variant| {
            code.run_all_tests(variant, pattern)
        })
        .await
    }
}
