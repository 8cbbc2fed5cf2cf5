//! Dispensary CLI binary entry point.

use std::io::Write;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use futures::StreamExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dispensary::agent_loop::{AgentEvent, AgentLoop};
use dispensary::cli::{truncate, ChatArgs, Cli, Commands, ServeArgs};
use dispensary::config::DispensaryConfig;
use dispensary::dispatch::Dispatcher;
use dispensary::server::{self, AppState};
use dispensary::store::{self, MemoryStore, StoreHandles};
use dispensary::tools::{pharmacy_registry, ToolRegistry};
use dispensary::types::ConversationMessage;

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Serve(args) => handle_serve(args).await,
        Commands::Chat(args) => handle_chat(args).await,
        Commands::Tools => handle_tools(),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn build_dispatcher(config: &DispensaryConfig) -> anyhow::Result<(Dispatcher, StoreHandles)> {
    let handles = store::open(config).await.context("opening pharmacy store")?;
    let tools = Arc::new(pharmacy_registry(handles.store.clone(), handles.usage.clone()));
    let dispatcher = Dispatcher::from_config(config, tools)?;
    Ok((dispatcher, handles))
}

async fn handle_serve(args: ServeArgs) -> anyhow::Result<()> {
    let mut config = DispensaryConfig::from_env()?;
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }

    let (dispatcher, handles) = build_dispatcher(&config).await?;
    let app = server::router(AppState::new(dispatcher, handles.usage), config.frontend_dir.as_deref());
    server::serve(config.bind_addr, app).await?;
    Ok(())
}

async fn handle_chat(args: ChatArgs) -> anyhow::Result<()> {
    let config = DispensaryConfig::from_env()?;
    let (dispatcher, _) = build_dispatcher(&config).await?;
    let agent: &AgentLoop = dispatcher.agent();
    let max_rounds = args.max_rounds.unwrap_or(dispatcher.max_rounds());

    let mut events = agent.run(vec![ConversationMessage::user(args.prompt)], max_rounds);
    let mut failure = None;
    while let Some(event) = events.next().await {
        if args.json {
            println!("{}", event.to_json());
            if let AgentEvent::Error { error } = &event {
                failure = Some(error.message.clone());
            }
            continue;
        }
        match event {
            AgentEvent::TextDelta { delta } => {
                print!("{delta}");
                let _ = std::io::stdout().flush();
            }
            AgentEvent::ToolCall { name, call_id, arguments } => {
                eprintln!("\n-> {name} ({call_id}) {}", serde_json::Value::Object(arguments));
            }
            AgentEvent::ToolResult { result, .. } => {
                eprintln!("   {}", truncate(&result.to_string(), 200));
            }
            AgentEvent::ToolArgsDelta { .. } => {}
            AgentEvent::Done => println!(),
            AgentEvent::Error { error } => failure = Some(error.message),
        }
    }

    match failure {
        Some(message) => anyhow::bail!(message),
        None => Ok(()),
    }
}

fn handle_tools() -> anyhow::Result<()> {
    // Schemas do not depend on the data, so the bundled store is enough.
    let store = Arc::new(MemoryStore::bundled()?);
    let registry: ToolRegistry = pharmacy_registry(store.clone(), store);
    println!("{}", serde_json::to_string_pretty(&registry.describe())?);
    Ok(())
}
