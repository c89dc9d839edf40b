//! kraned: the Krane daemon.
//!
//! Assembles the deployment control plane around a single state store
//! handle:
//! - State store (redb), opened once and shared
//! - Docker runtime adapter
//! - Job queue (serialized per deployment)
//! - Deployment service
//!
//! # Usage
//!
//! ```text
//! kraned apply deployment.json
//! kraned secrets add api api-token s3cret
//! kraned up api
//! kraned logs api --follow
//! ```

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "kraned", about = "Krane deployment daemon", version)]
struct Cli {
    /// Settings file (TOML).
    #[arg(long, env = "KRANE_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Data directory; overrides the settings file.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Register or replace a deployment from a JSON config, then run it.
    Apply {
        /// Path to the deployment config.
        file: PathBuf,

        /// Only save the config; do not start containers.
        #[arg(long)]
        no_run: bool,
    },
    /// Converge a deployment's containers to its config.
    Up { name: String },
    /// Remove a deployment's containers, keeping its config and secrets.
    Down { name: String },
    /// Remove a deployment's containers, secrets and config.
    Delete { name: String },
    /// Show a deployment's config and containers.
    Get { name: String },
    /// List every deployment.
    List,
    /// Manage deployment secrets.
    Secrets {
        #[command(subcommand)]
        command: SecretsCommand,
    },
    /// Print a deployment's container logs.
    Logs {
        name: String,

        /// Keep streaming new output.
        #[arg(long, short)]
        follow: bool,

        /// Trailing lines per container.
        #[arg(long, default_value = "50")]
        tail: usize,
    },
}

#[derive(Subcommand)]
enum SecretsCommand {
    /// Add or update a secret.
    Add {
        name: String,
        key: String,
        value: String,
    },
    /// List secrets with values redacted.
    List { name: String },
    /// Remove a secret.
    Rm { name: String, key: String },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,kraned=debug,krane=debug"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let daemon = commands::Daemon::start(cli.config.as_deref(), cli.data_dir).await?;
    let result = match cli.command {
        Command::Apply { file, no_run } => daemon.apply(&file, !no_run).await,
        Command::Up { name } => daemon.up(&name).await,
        Command::Down { name } => daemon.down(&name).await,
        Command::Delete { name } => daemon.delete(&name).await,
        Command::Get { name } => daemon.get(&name).await,
        Command::List => daemon.list(),
        Command::Secrets { command } => match command {
            SecretsCommand::Add { name, key, value } => daemon.add_secret(&name, &key, &value),
            SecretsCommand::List { name } => daemon.list_secrets(&name),
            SecretsCommand::Rm { name, key } => daemon.delete_secret(&name, &key),
        },
        Command::Logs { name, follow, tail } => daemon.logs(&name, follow, tail).await,
    };
    daemon.shutdown();
    result
}
