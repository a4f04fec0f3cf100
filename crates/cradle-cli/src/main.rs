//! Cradle CLI
//!
//! Command-line interface for Cradle - sync and summarize baby-care events.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use cradle_core::{Config, EventKind, LocalState, SqliteStore};

mod commands;
mod logging;
mod output;

use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "cradle")]
#[command(about = "Cradle - Sync and summarize baby-care events")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Use this config file instead of the default
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in and fetch the family key
    Login {
        /// Account email
        #[arg(short, long)]
        email: String,
        /// Account password (read from stdin if omitted)
        #[arg(short, long)]
        password: Option<String>,
    },
    /// Forget tokens and cached events
    Logout,
    /// Fetch new and updated events
    Sync,
    /// Sync periodically until interrupted
    Watch {
        /// Seconds between syncs (defaults to sync_interval_secs)
        #[arg(short, long)]
        interval: Option<u64>,
    },
    /// Show login and sync state
    Status,
    /// List cached events
    #[command(alias = "ls")]
    Events {
        /// Only this kind (feed, sleep, diaper, pump, routine)
        #[arg(short, long)]
        kind: Option<EventKind>,
        /// Only events since local midnight
        #[arg(short, long)]
        today: bool,
    },
    /// Show the earliest event of a kind
    First {
        #[arg(short, long)]
        kind: EventKind,
    },
    /// Show the latest event of a kind
    Last {
        #[arg(short, long)]
        kind: EventKind,
    },
    /// Summarize today's diapers, feeds and naps
    Summary,
    /// Per-day counts for the last few days
    Week {
        /// Number of days, today included
        #[arg(short, long, default_value_t = 7)]
        days: u32,
    },
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (api_key, instance_token, data_dir, sync_interval_secs, ...)
        key: String,
        /// Configuration value
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));
    let config_path = cli.config.as_ref();

    // Config commands work on the file directly and never open the store
    if let Commands::Config { command } = &cli.command {
        return handle_config_command(command.clone(), config_path, &output);
    }

    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;
    logging::init(&config, cli.verbose);

    let store_path = config.store_path();
    let store = SqliteStore::open(&store_path)
        .with_context(|| format!("Failed to open local store at {}", store_path.display()))?;
    let state = LocalState::new(store).shared();

    match cli.command {
        Commands::Login { email, password } => {
            commands::session::login(&config, state, email, password, &output).await
        }
        Commands::Logout => commands::session::logout(state, &output),
        Commands::Sync => commands::sync::sync(&config, state, &output).await,
        Commands::Watch { interval } => {
            commands::sync::watch(&config, state, interval, &output).await
        }
        Commands::Status => commands::status::show(&config, state, &output),
        Commands::Events { kind, today } => commands::events::list(state, kind, today, &output),
        Commands::First { kind } => commands::events::first(state, kind, &output),
        Commands::Last { kind } => commands::events::last(state, kind, &output),
        Commands::Summary => commands::summary::today(state, &output),
        Commands::Week { days } => commands::summary::week(state, days, &output),
        Commands::Config { .. } => unreachable!(), // Handled above
    }
}

fn handle_config_command(
    command: Option<ConfigCommands>,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    match command {
        Some(ConfigCommands::Show) | None => commands::config::show(config_path, output),
        Some(ConfigCommands::Set { key, value }) => {
            commands::config::set(key, value, config_path, output)
        }
    }
}
