mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "tabwire")]
#[command(about = "Message bus coordinator for browser tabs and a native host", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the coordinator (long-running daemon)
    Start {
        /// Path to a config file (defaults to ~/.tabwire/config.json)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override the native host command from config
        #[arg(long)]
        host_cmd: Option<String>,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the active configuration
    Show {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Write a default config file
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Commands::Start { config, host_cmd } => commands::start::run(config, host_cmd).await,
        Commands::Config { command } => match command {
            ConfigCommands::Show { config } => commands::config_cmd::show(config),
            ConfigCommands::Init { force } => commands::config_cmd::init(force),
        },
    }
}
