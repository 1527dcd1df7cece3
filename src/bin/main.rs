use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use conjure::config::{SettingsEventKind, load_settings};
use conjure::{
    ClojureCode, ConnectSpec, Orchestrator, Registry, System, TerminalRenderer, Variant,
};
use conjure::editor::StaticContext;
use tokio::io::{BufReader, stdin};

/// Client for Clojure and ClojureScript socket prepls
#[derive(Parser)]
#[command(name = "conjure")]
#[command(version)]
#[command(about = "Client for Clojure and ClojureScript socket prepls")]
struct Cli {
    /// Settings file layered over the user config
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Read commands from stdin (default)
    Serve,
    /// Evaluate one piece of code against a prepl and print the result
    Eval {
        /// Host the prepl listens on
        #[arg(long, default_value = conjure::bridge::DEFAULT_HOST)]
        host: String,

        /// Port the prepl listens on
        #[arg(long)]
        port: u16,

        /// Dialect spoken by the remote (clj or cljs)
        #[arg(long, default_value = "clj")]
        lang: Variant,

        /// Namespace to evaluate in
        #[arg(long)]
        ns: Option<String>,

        /// Print the result value as JSON
        #[arg(long)]
        json: bool,

        /// Code to evaluate
        code: String,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        None | Some(Commands::Serve) => serve(cli.config).await,
        Some(Commands::Eval {
            host,
            port,
            lang,
            ns,
            json,
            code,
        }) => eval_once(host, port, lang, ns, json, code).await,
    }
}

async fn serve(config: Option<PathBuf>) {
    let outcome = load_settings(config.as_deref());
    for event in &outcome.events {
        match event.kind {
            SettingsEventKind::Info => log::info!(target: "conjure::config", "{}", event.message),
            SettingsEventKind::Warning => {
                log::warn!(target: "conjure::config", "{}", event.message)
            }
        }
    }

    let system = match System::from_settings(
        &outcome.settings,
        Arc::new(ClojureCode),
        Arc::new(TerminalRenderer::stdout()),
    ) {
        Ok(system) => system,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    system.connect_all(&outcome.settings.connections).await;

    if let Err(e) = system.run(BufReader::new(stdin())).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn eval_once(
    host: String,
    port: u16,
    lang: Variant,
    ns: Option<String>,
    json: bool,
    code: String,
) {
    let renderer: Arc<TerminalRenderer> = if json {
        Arc::new(TerminalRenderer::new(std::io::stderr()))
    } else {
        Arc::new(TerminalRenderer::stdout())
    };
    let registry = Registry::new(Arc::new(ClojureCode), renderer);

    let spec = ConnectSpec::new("cli", port)
        .with_host(host)
        .with_variant(lang)
        .with_pattern(".*");
    if let Err(e) = registry.add(&spec).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    let mut editor = StaticContext::new("cli");
    if let Some(ns) = ns {
        editor = editor.with_namespace(ns);
    }
    let orchestrator = Orchestrator::new(registry.clone(), Arc::new(editor));
    let ctx = orchestrator.context();
    let replies = orchestrator.eval(&ctx, &code).await;
    registry.remove_all().await;

    let Some(message) = replies.iter().find_map(|reply| reply.reply.message()) else {
        std::process::exit(1);
    };
    if json {
        println!("{}", message.val.to_json());
    }
}
