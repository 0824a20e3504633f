//! `mailbridge` - command-line front end for the delivery pipeline.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod commands;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mailbridge_core::Config;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Configuration file. Defaults to `<config dir>/mailbridge/config.toml`.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compose a message from a JSON request and write its MIME bytes
    Compose {
        /// JSON compose request
        #[arg(short, long)]
        request: PathBuf,

        /// Output file; stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Owner of any stored attachments referenced by the request
        #[arg(short, long, default_value = "local")]
        user: String,
    },
    /// Show the vendor and server defaults for an address
    Detect {
        /// Email address
        email: String,
    },
    /// Remove expired temporary uploads
    PurgeTemp {
        /// Override the configured retention, in hours
        #[arg(long)]
        older_than_hours: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mailbridge=info,mailbridge_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;

    match args.command {
        Command::Compose {
            request,
            output,
            user,
        } => commands::compose(&config, &request, output.as_deref(), &user).await,
        Command::Detect { email } => commands::detect(&config, &email),
        Command::PurgeTemp { older_than_hours } => {
            commands::purge_temp(&config, older_than_hours).await
        }
    }
}

/// Loads the explicit config file, else the per-user one, else defaults.
/// A relative storage root is placed under the data directory.
fn load_config(explicit: Option<&std::path::Path>) -> Result<Config> {
    let mut config = if let Some(path) = explicit {
        Config::from_file(path).with_context(|| format!("loading {}", path.display()))?
    } else {
        match dirs::config_dir().map(|d| d.join("mailbridge").join("config.toml")) {
            Some(path) if path.is_file() => {
                debug!(path = %path.display(), "Using per-user configuration");
                Config::from_file(&path).with_context(|| format!("loading {}", path.display()))?
            }
            _ => Config::default(),
        }
    };

    if config.storage.root.is_relative() {
        let data = data_dir()?;
        config.storage.root = data.join(&config.storage.root);
    }
    info!(root = %config.storage.root.display(), "Attachment storage");
    Ok(config)
}

/// Per-user data directory for the attachment store and databases.
fn data_dir() -> Result<PathBuf> {
    dirs::data_dir()
        .map(|d| d.join("mailbridge"))
        .context("no data directory on this platform")
}
