// credit-gate - Main Entry Point
//
// Serves the free-tier credit check endpoint, or runs a single check from
// the command line against the configured backends.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use credit_gate::config::Config;
use credit_gate::credits::{Identity, Tier};
use credit_gate::{app, logging, server};
use std::path::PathBuf;
use tracing::info;

/// credit-gate: free-tier credit checks
#[derive(Parser, Debug)]
#[command(name = "credit-gate")]
#[command(version)]
#[command(about = "Free-tier credit checks with a durable fallback", long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Port to listen on (overrides config)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Check the remaining credits of one user and print the response
    Check {
        /// User identifier
        #[arg(long)]
        user: String,

        /// Treat the user as holding their own API key
        #[arg(long)]
        api_key: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };

    logging::init(&config.logging, args.verbose)?;

    match args.command {
        Some(Commands::Serve { port }) => {
            if let Some(port) = port {
                config.server.port = port;
            }
            server::serve(&config).await?;
        }
        Some(Commands::Check { user, api_key }) => {
            check(&config, &user, api_key).await?;
        }
        None => {
            info!("No command specified. Use \"credit-gate --help\" for usage.");
        }
    }

    Ok(())
}

/// Run one credit decision and print it as JSON
async fn check(config: &Config, user: &str, api_key: bool) -> Result<()> {
    let identity = Identity::new(user)?;
    let engine = app::build_engine(config)?;

    let decision = engine
        .decide(&identity, Tier::from_api_key_flag(api_key))
        .await?;

    let body = serde_json::to_string(&decision.to_response())
        .context("Failed to serialize credit decision")?;
    println!("{}", body);
    Ok(())
}
