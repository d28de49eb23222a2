// ABOUTME: CLI argument parsing and command routing for paysock
//
// Provides command-line interface for:
// - Checking a real-time server through the pool (probe)
// - Exercising the pool against a local loopback server (simulate)
// - Printing or writing the effective configuration (config)

pub mod config;
pub mod probe;
pub mod report;
pub mod simulate;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Pooled real-time sockets for payment sessions
#[derive(Parser)]
#[command(name = "paysock")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file to use instead of the default search paths
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

/// Output format for commands
#[derive(Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Acquire one pooled connection to the configured server and report
    Probe(ProbeArgs),

    /// Run concurrent clients against a local loopback server
    Simulate(SimulateArgs),

    /// Print the effective configuration
    Config(ConfigArgs),
}

/// Arguments for the probe command
#[derive(clap::Args)]
pub struct ProbeArgs {
    /// Pool key (payment session id) to join
    #[arg(long, short)]
    pub key: String,

    /// Server address overriding the configured endpoint
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Event to emit once the connection is acquired
    #[arg(long, default_value = "ping")]
    pub event: String,
}

/// Arguments for the simulate command
#[derive(clap::Args)]
pub struct SimulateArgs {
    /// Number of distinct pool keys
    #[arg(long, default_value = "3")]
    pub keys: usize,

    /// Concurrent clients per key
    #[arg(long, default_value = "8")]
    pub clients: usize,

    /// How long each client holds its connection (ms)
    #[arg(long, default_value = "50")]
    pub hold_ms: u64,
}

/// Arguments for the config command
#[derive(clap::Args)]
pub struct ConfigArgs {
    /// Also write the effective configuration to this path
    #[arg(long)]
    pub write: Option<PathBuf>,
}
