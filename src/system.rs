//! Command loop.
//!
//! Reads one editor command per line and dispatches it to the registry or an
//! orchestrator. Each file-scoped command gets its own `StaticContext` built
//! from the command arguments, with the namespace read from the file when it
//! exists on disk.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::bridge::{ConnectSpec, Orchestrator, Registry, ShutdownTimeout};
use crate::config::ReplSettings;
use crate::editor::{StaticContext, detect_namespace};
use crate::error::ReplResult;
use crate::protocol::{CodeGenerator, Variant};
use crate::render::OutputRenderer;

/// One parsed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Quit,
    List,
    Connect(ConnectSpec),
    Disconnect { tag: String },
    Eval { path: String, code: String },
    Doc { path: String, name: String },
    Definition { path: String, name: String },
    Complete { path: String, prefix: String },
    Test { path: String, ns: String },
    TestAll { path: String, pattern: Option<String> },
    Load { path: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("empty command")]
    Empty,

    #[error("unknown command {0:?}")]
    Unknown(String),

    #[error("{command}: missing {what}")]
    Missing {
        command: &'static str,
        what: &'static str,
    },

    #[error("{command}: unexpected argument {arg:?}")]
    Unexpected { command: &'static str, arg: String },

    #[error("invalid port {0:?}")]
    InvalidPort(String),
}

/// Split off the first whitespace-delimited word.
fn next_word(input: &str) -> Option<(&str, &str)> {
    let input = input.trim_start();
    if input.is_empty() {
        return None;
    }
    Some(match input.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim_start()),
        None => (input, ""),
    })
}

fn required<'a>(
    input: &'a str,
    command: &'static str,
    what: &'static str,
) -> Result<(&'a str, &'a str), CommandError> {
    next_word(input).ok_or(CommandError::Missing { command, what })
}

fn no_more(rest: &str, command: &'static str) -> Result<(), CommandError> {
    match next_word(rest) {
        None => Ok(()),
        Some((arg, _)) => Err(CommandError::Unexpected {
            command,
            arg: arg.to_string(),
        }),
    }
}

/// `[HOST:]PORT`
fn parse_addr(addr: &str) -> Result<(Option<String>, u16), CommandError> {
    let (host, port) = match addr.rsplit_once(':') {
        Some((host, port)) => (Some(host.to_string()).filter(|h| !h.is_empty()), port),
        None => (None, addr),
    };
    let port = port
        .parse::<u16>()
        .map_err(|_| CommandError::InvalidPort(port.to_string()))?;
    Ok((host, port))
}

fn parse_connect(args: &str) -> Result<ConnectSpec, CommandError> {
    let (tag, rest) = required(args, "connect", "tag")?;
    let (addr, rest) = required(rest, "connect", "port")?;
    let (host, port) = parse_addr(addr)?;

    let mut spec = ConnectSpec::new(tag, port);
    if let Some(host) = host {
        spec = spec.with_host(host);
    }

    let mut rest = rest;
    if let Some((word, after)) = next_word(rest) {
        if let Ok(variant) = word.parse::<Variant>() {
            spec = spec.with_variant(variant);
            rest = after;
        }
    }
    let pattern = rest.trim();
    if !pattern.is_empty() {
        spec = spec.with_pattern(pattern);
    }
    Ok(spec)
}

/// `PATH NAME` with nothing after the name.
fn path_and_word(
    args: &str,
    command: &'static str,
    what: &'static str,
) -> Result<(String, String), CommandError> {
    let (path, rest) = required(args, command, "path")?;
    let (word, rest) = required(rest, command, what)?;
    no_more(rest, command)?;
    Ok((path.to_string(), word.to_string()))
}

impl FromStr for Event {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let (command, args) = next_word(line).ok_or(CommandError::Empty)?;
        match command {
            "quit" | "exit" => no_more(args, "quit").map(|_| Event::Quit),
            "list" | "status" => no_more(args, "list").map(|_| Event::List),
            "connect" => parse_connect(args).map(Event::Connect),
            "disconnect" => {
                let (tag, rest) = required(args, "disconnect", "tag")?;
                no_more(rest, "disconnect")?;
                Ok(Event::Disconnect {
                    tag: tag.to_string(),
                })
            }
            "eval" => {
                let (path, code) = required(args, "eval", "path")?;
                let code = code.trim();
                if code.is_empty() {
                    return Err(CommandError::Missing {
                        command: "eval",
                        what: "code",
                    });
                }
                Ok(Event::Eval {
                    path: path.to_string(),
                    code: code.to_string(),
                })
            }
            "doc" => {
                path_and_word(args, "doc", "name").map(|(path, name)| Event::Doc { path, name })
            }
            "def" => path_and_word(args, "def", "name")
                .map(|(path, name)| Event::Definition { path, name }),
            "complete" => path_and_word(args, "complete", "prefix")
                .map(|(path, prefix)| Event::Complete { path, prefix }),
            "test" => {
                path_and_word(args, "test", "namespace").map(|(path, ns)| Event::Test { path, ns })
            }
            "test-all" => {
                let (path, rest) = required(args, "test-all", "path")?;
                let pattern = rest.trim();
                Ok(Event::TestAll {
                    path: path.to_string(),
                    pattern: (!pattern.is_empty()).then(|| pattern.to_string()),
                })
            }
            "load" => {
                let (path, rest) = required(args, "load", "path")?;
                no_more(rest, "load")?;
                Ok(Event::Load {
                    path: path.to_string(),
                })
            }
            other => Err(CommandError::Unknown(other.to_string())),
        }
    }
}

/// Whether the loop keeps going after an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// The command loop and the registry it drives.
#[derive(Debug, Clone)]
pub struct System {
    registry: Registry,
    eval_timeout: Option<Duration>,
    shutdown_timeout: ShutdownTimeout,
}

impl System {
    pub fn new(registry: Registry) -> Self {
        Self {
            registry,
            eval_timeout: None,
            shutdown_timeout: ShutdownTimeout::default(),
        }
    }

    /// Build a system whose registry and timeouts follow `settings`.
    pub fn from_settings(
        settings: &ReplSettings,
        code: Arc<dyn CodeGenerator>,
        renderer: Arc<dyn OutputRenderer>,
    ) -> ReplResult<Self> {
        let registry = Registry::with_init_timeout(code, renderer, settings.init_timeout()?);
        Ok(Self {
            registry,
            eval_timeout: settings.eval_timeout(),
            shutdown_timeout: settings.shutdown_timeout()?,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    fn renderer(&self) -> &dyn OutputRenderer {
        self.registry.renderer().as_ref()
    }

    /// Orchestrator for a command about the file at `path`.
    async fn orchestrator(&self, path: &str, ns: Option<String>) -> Orchestrator {
        let ns = match ns {
            Some(ns) => Some(ns),
            None => tokio::fs::read_to_string(Path::new(path))
                .await
                .ok()
                .and_then(|source| detect_namespace(&source)),
        };
        let mut editor = StaticContext::new(path);
        if let Some(ns) = ns {
            editor = editor.with_namespace(ns);
        }
        let orchestrator = Orchestrator::new(self.registry.clone(), Arc::new(editor));
        match self.eval_timeout {
            Some(timeout) => orchestrator.with_timeout(timeout),
            None => orchestrator,
        }
    }

    /// Connect every spec, reporting failures without stopping.
    pub async fn connect_all(&self, specs: &[ConnectSpec]) {
        for spec in specs {
            self.connect(spec).await;
        }
    }

    async fn connect(&self, spec: &ConnectSpec) {
        match self.registry.add(spec).await {
            Ok(handle) => self.renderer().info(&handle.info().to_string()),
            Err(e) => self.renderer().error(&format!("Connection error: {}", e)),
        }
    }

    /// Handle one event.
    pub async fn handle(&self, event: Event) -> Flow {
        debug!(target: "conjure::system", "Handling {:?}", event);
        match event {
            Event::Quit => return Flow::Quit,
            Event::List => self.renderer().info(&self.registry.status()),
            Event::Connect(spec) => self.connect(&spec).await,
            Event::Disconnect { tag } => {
                if self.registry.remove(&tag).await {
                    self.renderer().info(&format!("[{}] Disconnected", tag));
                } else {
                    self.renderer().warn(&format!("[{}] Not connected", tag));
                }
            }
            Event::Eval { path, code } => {
                let orchestrator = self.orchestrator(&path, None).await;
                orchestrator.eval(&orchestrator.context(), &code).await;
            }
            Event::Doc { path, name } => {
                self.orchestrator(&path, None).await.doc(&name).await;
            }
            Event::Definition { path, name } => {
                let orchestrator = self.orchestrator(&path, None).await;
                if let Some(location) = orchestrator.definition(&name).await {
                    self.renderer().info(&format!(
                        "{}:{}:{}",
                        location.path, location.line, location.column
                    ));
                }
            }
            Event::Complete { path, prefix } => {
                let orchestrator = self.orchestrator(&path, None).await;
                let names = orchestrator.completions(&prefix).await;
                if names.is_empty() {
                    self.renderer().info("No completions");
                } else {
                    self.renderer().info(&names.join(" "));
                }
            }
            Event::Test { path, ns } => {
                self.orchestrator(&path, Some(ns)).await.run_tests().await;
            }
            Event::TestAll { path, pattern } => {
                let orchestrator = self.orchestrator(&path, None).await;
                orchestrator.run_all_tests(pattern.as_deref()).await;
            }
            Event::Load { path } => {
                self.orchestrator(&path, None).await.load_file(&path).await;
            }
        }
        Flow::Continue
    }

    /// Read commands until `quit` or end of input, then shut down.
    pub async fn run<R>(&self, input: R) -> ReplResult<()>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = input.lines();
        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() || line.starts_with(';') {
                continue;
            }
            match line.parse::<Event>() {
                Ok(event) => {
                    if self.handle(event).await == Flow::Quit {
                        break;
                    }
                }
                Err(e) => self
                    .renderer()
                    .error(&format!("Error parsing command: {}", e)),
            }
        }
        self.shutdown().await;
        Ok(())
    }

    /// Remove every connection under the configured shutdown ceiling.
    pub async fn shutdown(&self) {
        info!(target: "conjure::system", "Shutting down {} connection(s)", self.registry.len());
        self.registry
            .remove_all_with_timeout(self.shutdown_timeout)
            .await;
    }
}
