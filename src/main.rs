//! chat-orchestrator: run one turn from a JSON request on stdin
//!
//! Events are written to stdout as newline-delimited JSON; logs go to
//! stderr.

use chat_orchestrator::config::Config;
use chat_orchestrator::db::Database;
use chat_orchestrator::llm::register_providers;
use chat_orchestrator::orchestrator::{Orchestrator, OrchestratorSettings, TurnOutcome, TurnRequest};
use chat_orchestrator::registry::{ProviderRegistry, ToolRegistry};
use chat_orchestrator::store::ConversationStore;
use chat_orchestrator::tools::register_builtin_tools;
use clap::Parser;
use std::io::{Read, Write};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Read a turn request from stdin and stream its events to stdout
#[derive(Debug, Parser)]
#[command(name = "chat-orchestrator", version)]
struct Cli {
    /// Print registered tools and providers, then exit
    #[arg(long, conflicts_with = "history")]
    list: bool,

    /// Print a session's stored messages, oldest first, then exit
    #[arg(long, value_name = "SESSION_ID")]
    history: Option<String>,

    /// Fail tool executions left pending by a crashed process before
    /// running. Do not use while other processes share the database.
    #[arg(long)]
    recover: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chat_orchestrator=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let mut config = Config::from_env()?;
    config.recover_pending |= cli.recover;

    let mut tools = ToolRegistry::new();
    register_builtin_tools(&mut tools, &config);
    let mut providers = ProviderRegistry::new();
    register_providers(&mut providers, &config);

    if cli.list {
        println!("tools: {}", tools.list().join(", "));
        println!("providers: {}", providers.list().join(", "));
        return Ok(());
    }

    if let Some(session_id) = &cli.history {
        let db = Database::open_configured(&config)?;
        let mut stdout = std::io::stdout().lock();
        for message in db.list_messages(session_id, config.history_limit)?.iter().rev() {
            writeln!(stdout, "{}", serde_json::to_string(message)?)?;
        }
        return Ok(());
    }

    let store: Option<Arc<dyn ConversationStore>> = if config.enable_persistence {
        Some(Arc::new(Database::open_configured(&config)?) as Arc<dyn ConversationStore>)
    } else {
        tracing::info!("Persistence disabled");
        None
    };

    tracing::info!(
        tools = ?tools.list(),
        providers = ?providers.list(),
        default_provider = %config.default_provider,
        "Registries initialized"
    );

    let mut input = String::new();
    std::io::stdin().read_to_string(&mut input)?;
    let request: TurnRequest = serde_json::from_str(&input)?;

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(tools),
        Arc::new(providers),
        store,
        OrchestratorSettings::from_config(&config),
    ));

    let mut handle = orchestrator.start_turn(request);
    let mut stdout = std::io::stdout().lock();
    while let Some(event) = handle.next_event().await {
        writeln!(stdout, "{}", serde_json::to_string(&event)?)?;
        stdout.flush()?;
    }
    drop(stdout);

    let (_, outcome) = handle.collect().await;
    match outcome {
        TurnOutcome::Completed | TurnOutcome::Cancelled => Ok(()),
        TurnOutcome::Failed { error } => Err(error.into()),
    }
}
