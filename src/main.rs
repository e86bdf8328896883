//! paws - Command-line client for the PAWS streaming interface.
//!
//! Runs one request or streams a subscription over a single connection.

mod commands;
mod config;

use clap::{Parser, Subcommand};
use colored::Colorize;
use config::Config;
use paws_client::Client;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "paws")]
#[command(about = "Command-line client for the PAWS streaming interface")]
#[command(version)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long, env = "PAWS_CONFIG")]
    config: Option<PathBuf>,

    /// Server host
    #[arg(long, env = "PAWS_HOST")]
    host: Option<String>,

    /// Server port
    #[arg(short, long, env = "PAWS_PORT")]
    port: Option<u16>,

    /// API key sent with every request
    #[arg(short = 'k', long, env = "PAWS_API_KEY")]
    api_key: Option<String>,

    /// Request timeout in seconds
    #[arg(short, long, env = "PAWS_REQUEST_TIMEOUT_SECS")]
    timeout: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Read a resource
    Get {
        /// Resource path, e.g. /feeds/42
        resource: String,
    },

    /// Update a resource
    Put {
        /// Resource path
        resource: String,

        /// Body (or @file to read from file)
        body: String,
    },

    /// Create a resource
    Post {
        /// Resource path
        resource: String,

        /// Body (or @file to read from file)
        body: String,
    },

    /// Delete a resource
    Delete {
        /// Resource path
        resource: String,
    },

    /// Send a request with any method
    Request {
        /// Method: get, put, post, delete, subscribe or unsubscribe
        method: String,

        /// Resource path
        resource: String,

        /// Body (or @file to read from file)
        body: Option<String>,
    },

    /// Create a feed and print its id
    CreateFeed {
        /// Feed body (or @file to read from file)
        body: String,
    },

    /// Read a feed
    ReadFeed {
        /// Feed id
        id: String,
    },

    /// Stream updates for a feed or datastream until Ctrl+C
    Subscribe {
        /// Resource path, e.g. /feeds/42 or /feeds/42/datastreams/temp
        resource: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref()).map_err(|e| {
        eprintln!("{}: {}", "Configuration error".red(), e);
        e
    })?;
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(key) = cli.api_key {
        config.server.api_key = Some(key);
    }
    if let Some(timeout) = cli.timeout {
        config.server.request_timeout_secs = timeout;
    }
    config.validate()?;
    tracing::debug!(
        "using {}:{} (request timeout {}s)",
        config.server.host,
        config.server.port,
        config.server.request_timeout_secs
    );

    let client = Client::new(config.connection_config());
    client.connect().await.map_err(|e| {
        eprintln!("{}: {}", "Connection failed".red(), e);
        e
    })?;

    let result = match cli.command {
        Commands::Subscribe { resource } => commands::subscribe(&client, &resource).await,
        cmd => commands::execute(&client, cmd).await.map(|output| {
            println!("{}", output);
        }),
    };

    client.disconnect().await?;

    if let Err(e) = result {
        eprintln!("{}: {}", "Error".red(), e);
        std::process::exit(1);
    }

    Ok(())
}
