//! onebridge command-line entry point.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};

use onebridge::runtime::config::LogLevel;
use onebridge::runtime::{OneBridgeRuntime, RuntimeBuilder};

/// Bridge a OneBot v11 gateway to WebSocket subscribers.
#[derive(Parser)]
#[command(name = "onebridge", version, about)]
struct Cli {
    /// Configuration file. Searched for when omitted.
    #[arg(short, long, env = "ONEBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Configuration profile, e.g. `production`.
    #[arg(short, long)]
    profile: Option<String>,

    /// Overrides the configured log level.
    #[arg(short, long, value_parser = parse_level)]
    log_level: Option<LogLevel>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Connect to the gateway and serve subscribers (default).
    Run,
    /// Load and validate the configuration, then print it.
    Check,
}

fn parse_level(name: &str) -> Result<LogLevel, String> {
    LogLevel::parse(name).ok_or_else(|| format!("unknown log level '{name}'"))
}

fn builder(cli: &Cli) -> RuntimeBuilder {
    let mut builder = OneBridgeRuntime::builder();
    if let Some(path) = &cli.config {
        builder = builder.config_file(path);
    }
    if let Some(profile) = &cli.profile {
        builder = builder.profile(profile.clone());
    }
    if let Some(level) = cli.log_level {
        builder = builder.log_level(level);
    }
    builder
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command.as_ref().unwrap_or(&Command::Run) {
        Command::Run => {
            let runtime = builder(&cli)
                .build()
                .context("failed to load configuration")?;
            runtime.run().await?;
        }
        Command::Check => {
            let config = builder(&cli)
                .load()
                .context("configuration is invalid")?;
            println!("{config:#?}");
        }
    }
    Ok(())
}
