// ABOUTME: Main entry point for paysock, the payment socket pool CLI
//
// Binary: paysock
// Usage: paysock [--config PATH] [--format text|json] <COMMAND>
// - probe: acquire one pooled connection to the configured server
// - simulate: run concurrent clients against a local loopback server
// - config: print the effective configuration

#![allow(missing_docs)]

use anyhow::{Context, Result};
use clap::Parser;

use paysock::config::{AppConfig, LoggingConfig};

mod cli;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();

    let config = AppConfig::load(args.config.as_deref())?;
    setup_logging(&config.logging)?;
    setup_panic_handler();

    match args.command {
        cli::Commands::Probe(probe_args) => {
            cli::probe::execute(&config, probe_args, args.format).await
        }
        cli::Commands::Simulate(simulate_args) => {
            cli::simulate::execute(&config, simulate_args, args.format).await
        }
        cli::Commands::Config(config_args) => {
            cli::config::execute(&config, &config_args, args.format)
        }
    }
}

fn setup_logging(logging: &LoggingConfig) -> Result<()> {
    use std::fs::OpenOptions;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.filter))
        .with_context(|| format!("Invalid log filter '{}'", logging.filter))?;

    if logging.stderr {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_writer(std::io::stderr),
            )
            .with(filter)
            .init();
        return Ok(());
    }

    // Create log directory if it doesn't exist
    let log_dir = logging.log_dir();
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;

    // Create JSONL log file with timestamp
    let log_file = log_dir.join(format!(
        "paysock-{}.jsonl",
        chrono::Local::now().format("%Y%m%d-%H%M%S")
    ));

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_file)
        .with_context(|| format!("Failed to create log file {}", log_file.display()))?;

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .json() // Output in JSON Lines format
                .with_target(true) // Include target module in JSON
                .with_writer(file)
                .with_ansi(false),
        )
        .with(filter)
        .init();

    Ok(())
}

fn setup_panic_handler() {
    use tracing::error;

    std::panic::set_hook(Box::new(|panic_info| {
        error!("Application panicked: {}", panic_info);
        eprintln!("Application panicked: {}", panic_info);
        eprintln!("Please check the logs for more details.");
    }));
}
