mod commands;
mod render;

use std::path::{Path, PathBuf};

use anyhow::Result;
use caldock_core::ConduitConfig;
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "caldock")]
#[command(about = "Inspect a caldock calendar directory and its handheld sync state")]
struct Cli {
    /// Config file (defaults to ~/.config/caldock/config.toml)
    #[arg(global = true, short, long)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the calendar, pending changes, and the shape of the next pass
    Status,
    /// Inspect the identifier map
    Map {
        /// Only show archived bindings
        #[arg(short, long)]
        archived: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Status => commands::status::run(&config),
        Commands::Map { archived } => commands::map::run(&config, archived),
    }
}

fn load_config(path: Option<&Path>) -> Result<ConduitConfig> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => ConduitConfig::config_path()?,
    };
    debug!(path = %path.display(), "Loading config");
    Ok(ConduitConfig::load(&path)?)
}
