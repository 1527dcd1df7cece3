//! Eval orchestrator: the caller-facing request/response API.
//!
//! Every action goes through `execute`:
//! 1. Find the connections whose path matcher accepts the context path
//! 2. For each, in tag order: echo, build the payload(s), exchange, present
//!
//! Dialects that need double submission get the namespace switch sent first;
//! its reply is absorbed by the exchange. No connection matching is reported
//! to the user and nothing is sent.

mod completion;
mod context;
mod definition;
mod test_runner;

use std::sync::Arc;
use std::time::Duration;

use log::warn;

pub use context::RequestContext;

use super::{ConnectionInfo, Registry, Reply};
use crate::editor::{EditorContext, SourceForm};
use crate::protocol::{CodeGenerator, InboundMessage, Variant};
use crate::render::OutputRenderer;

/// The reply from one connection.
#[derive(Debug, Clone)]
pub struct EvalReply {
    pub info: ConnectionInfo,
    pub reply: Reply,
}

/// How a successful reply is shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Presentation {
    Result,
    Doc,
    TestResult,
    /// The caller consumes the value itself.
    Silent,
}

impl Presentation {
    fn present(
        self,
        renderer: &dyn OutputRenderer,
        info: &ConnectionInfo,
        message: &InboundMessage,
    ) {
        match self {
            Presentation::Result => renderer.result(info, message),
            Presentation::Doc => renderer.doc(info, message),
            Presentation::TestResult => renderer.test_result(info, message),
            Presentation::Silent => {}
        }
    }
}

/// Runs editor actions against the connections in a registry.
#[derive(Clone)]
pub struct Orchestrator {
    registry: Registry,
    editor: Arc<dyn EditorContext>,
    /// `None` waits for replies until the connection closes.
    eval_timeout: Option<Duration>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("registry", &self.registry)
            .field("eval_timeout", &self.eval_timeout)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    pub fn new(registry: Registry, editor: Arc<dyn EditorContext>) -> Self {
        Self {
            registry,
            editor,
            eval_timeout: None,
        }
    }

    /// Bound every exchange. Replies arriving late are discarded.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.eval_timeout = Some(timeout);
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Context for the editor's current buffer.
    pub fn context(&self) -> RequestContext {
        RequestContext::from_editor(self.editor.as_ref())
    }

    fn renderer(&self) -> &dyn OutputRenderer {
        self.registry.renderer().as_ref()
    }

    /// Send one request to every connection matching `ctx.path`.
    pub(crate) async fn execute(
        &self,
        ctx: &RequestContext,
        echo: Option<&str>,
        presentation: Presentation,
        build: impl Fn(&dyn CodeGenerator, Variant) -> String,
    ) -> Vec<EvalReply> {
        let targets = self.registry.matching(&ctx.path);
        if targets.is_empty() {
            self.renderer().info("no matching connections");
            return Vec::new();
        }

        let code = self.registry.code().as_ref();
        let mut replies = Vec::with_capacity(targets.len());
        for handle in targets {
            let info = handle.info();
            if let Some(text) = echo {
                self.renderer().eval_echo(info, text);
            }

            let mut payloads = Vec::with_capacity(2);
            if info.variant.requires_double_submit() {
                payloads.push(code.namespace_switch(info.variant, ctx.origin.ns.as_deref()));
            }
            payloads.push(build(code, info.variant));

            let reply = handle.exchange(payloads, self.eval_timeout).await;
            match &reply {
                Reply::Value(message) => presentation.present(self.renderer(), info, message),
                Reply::Closed => {
                    warn!(
                        target: "conjure::eval",
                        "[{}] Connection closed before replying",
                        info.tag
                    );
                    self.renderer()
                        .warn(&format!("[{}] Connection closed, no result", info.tag));
                }
                Reply::TimedOut => {
                    warn!(target: "conjure::eval", "[{}] Eval timed out", info.tag);
                    self.renderer().warn(&format!(
                        "[{}] No result within {:?}",
                        info.tag,
                        self.eval_timeout.unwrap_or_default()
                    ));
                }
            }
            replies.push(EvalReply {
                info: info.clone(),
                reply,
            });
        }
        replies
    }

    /// Evaluate `code` in every connection matching `ctx`.
    pub async fn eval(&self, ctx: &RequestContext, code: &str) -> Vec<EvalReply> {
        self.execute(ctx, Some(code), Presentation::Result, |generator, variant| {
            generator.eval(variant, code, &ctx.origin)
        })
        .await
    }

    async fn eval_form(&self, form: Option<SourceForm>, what: &str) -> Vec<EvalReply> {
        let Some(form) = form else {
            self.renderer().warn(&format!("No {} to evaluate", what));
            return Vec::new();
        };
        let ctx = self.context().at_form(&form);
        self.eval(&ctx, &form.text).await
    }

    /// Evaluate the innermost form under the cursor.
    pub async fn eval_current_form(&self) -> Vec<EvalReply> {
        self.eval_form(self.editor.current_form(), "form").await
    }

    /// Evaluate the outermost form under the cursor.
    pub async fn eval_root_form(&self) -> Vec<EvalReply> {
        self.eval_form(self.editor.root_form(), "root form").await
    }

    pub async fn eval_selection(&self) -> Vec<EvalReply> {
        self.eval_form(self.editor.selection(), "selection").await
    }

    pub async fn eval_buffer(&self) -> Vec<EvalReply> {
        let text = self.editor.buffer_text();
        let form = (!text.trim().is_empty()).then(|| SourceForm::new(text, 1, 1));
        self.eval_form(form, "buffer text").await
    }

    /// Show the documentation of `name`.
    pub async fn doc(&self, name: &str) -> Vec<EvalReply> {
        let ctx = self.context();
        self.execute(&ctx, None, Presentation::Doc, |code, variant| code.doc(variant, name))
            .await
    }

    /// Load a file from disk into every connection matching its path.
    pub async fn load_file(&self, path: &str) -> Vec<EvalReply> {
        let ctx = RequestContext::new(path);
        self.renderer().info(&format!("Loading {}", ctx.path));
        self.execute(&ctx, None, Presentation::Result, |code, variant| {
            code.load_file(variant, &ctx.path)
        })
        .await
    }
}
