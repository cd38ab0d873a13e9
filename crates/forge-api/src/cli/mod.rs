//! CLI command definitions for the `forge` binary.

pub mod credits;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use forge_types::config::ProviderKind;

/// Adventure Forge: streaming TTRPG assistant with a credit ledger.
#[derive(Parser)]
#[command(name = "forge", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed logs (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to config.toml (defaults to the data directory).
    #[arg(long, global = true, env = "FORGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Also export spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the REST API server.
    Serve {
        /// Port to listen on (overrides config).
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to (overrides config).
        #[arg(long)]
        host: Option<String>,

        /// Generation backend: gemini or scripted (overrides config).
        #[arg(long)]
        provider: Option<ProviderKind>,
    },

    /// Create or upgrade the database schema, then exit.
    Migrate,

    /// Inspect and adjust user credit balances.
    Credits {
        #[command(subcommand)]
        action: CreditsCommand,
    },
}

#[derive(Subcommand)]
pub enum CreditsCommand {
    /// Add credits to a user, creating the user if needed.
    Grant {
        /// The user's id at the identity provider.
        external_id: String,

        /// Number of credits to add.
        amount: i64,
    },

    /// Show a user's balance.
    Show {
        /// The user's id at the identity provider.
        external_id: String,
    },
}
