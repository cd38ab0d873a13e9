//! Adventure Forge CLI and REST API entry point.
//!
//! Binary name: `forge`
//!
//! Parses CLI arguments, loads configuration, then either starts the REST
//! API server or runs an administrative command against the database.

mod cli;
mod http;
mod state;


use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use forge_infra::config::{default_config_path, load_config};
use forge_infra::sqlite::ledger::SqliteCreditLedger;
use forge_observe::tracing_setup::{init_tracing, shutdown_tracing, TracingOptions};
use forge_types::config::ForgeConfig;

use cli::{Cli, Commands, CreditsCommand};
use state::{open_database, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut options = TracingOptions::from_verbosity(cli.verbose, cli.quiet);
    options.json = cli.log_json;
    options.otel = cli.otel;
    init_tracing(&options).map_err(|e| anyhow::anyhow!("failed to initialise logging: {e}"))?;

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let config = load_config(&config_path).await;

    let result = run(cli, config).await;
    shutdown_tracing();
    result
}

async fn run(cli: Cli, mut config: ForgeConfig) -> anyhow::Result<()> {
    match cli.command {
        Commands::Serve {
            port,
            host,
            provider,
        } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(provider) = provider {
                config.generation.provider = provider;
            }
            serve(config, cli.quiet).await?;
        }

        Commands::Migrate => {
            open_database(&config).await?;
            if !cli.quiet {
                println!(
                    "  {} Database is up to date",
                    console::style("✓").green().bold()
                );
            }
        }

        Commands::Credits { action } => {
            let ledger = SqliteCreditLedger::new(open_database(&config).await?);
            match action {
                CreditsCommand::Grant {
                    external_id,
                    amount,
                } => cli::credits::grant(&ledger, &external_id, amount, cli.json).await?,
                CreditsCommand::Show { external_id } => {
                    cli::credits::show(&ledger, &external_id, cli.json).await?
                }
            }
        }
    }

    Ok(())
}

async fn serve(config: ForgeConfig, quiet: bool) -> anyhow::Result<()> {
    let state = AppState::init(config).await?;
    let addr = format!("{}:{}", state.config.server.host, state.config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!(
        %addr,
        provider = state.orchestrator.provider().name(),
        model = %state.config.generation.model,
        "Adventure Forge API listening"
    );
    if !quiet {
        println!(
            "  {} Adventure Forge API listening on {}",
            console::style("⚔").bold(),
            console::style(format!("http://{addr}")).cyan()
        );
        println!("  {}", console::style("Press Ctrl+C to stop").dim());
    }

    // In-flight turns are cancelled (and discarded) before connections drain.
    let orchestrator = Arc::clone(&state.orchestrator);
    let router = http::router::build_router(state);
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!("Shutdown requested, cancelling in-flight turns");
            orchestrator.shutdown();
        })
        .await?;

    if !quiet {
        println!("\n  Server stopped.");
    }
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
