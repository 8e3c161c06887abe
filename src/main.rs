use std::sync::Arc;

use clap::{Parser, Subcommand};
use futures::StreamExt;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use signal_triage::{
    config::{Config, LogFormat},
    server::{AppState, McpServer},
};

#[derive(Parser)]
#[command(name = "signal-triage", version, about = "Drug safety signal triage orchestrator")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve MCP tool calls over stdio (default)
    Serve,
    /// Run one investigation, printing every event as a JSON line
    Run {
        /// Free-text request
        query: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Signal triage starting..."
    );

    let state = match AppState::new(config) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!(error = %e, "Failed to initialize collaborators");
            return Err(e.into());
        }
    };

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            let server = McpServer::new(state);
            info!("Server ready, waiting for requests on stdin...");
            if let Err(e) = server.run().await {
                error!(error = %e, "Server error");
                return Err(e.into());
            }
            info!("Server shutdown complete");
        }
        Command::Run { query } => run_once(&state, &query).await?,
    }

    Ok(())
}

/// Submit one query and stream its events to stdout until it finishes.
async fn run_once(state: &AppState, query: &str) -> anyhow::Result<()> {
    let (submission, mut events) = state.orchestrator.submit_and_subscribe(query).await?;

    while let Some(event) = events.next().await {
        println!("{}", serde_json::to_string(&event)?);
    }

    let investigation = state.orchestrator.get(&submission.investigation_id).await?;
    println!("{}", serde_json::to_string_pretty(&investigation)?);
    Ok(())
}

/// Initialize tracing/logging
fn init_logging(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
