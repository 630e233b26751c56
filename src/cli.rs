//! Command-line interface definitions for scan-relay.
//!
//! # Example
//!
//! ```bash
//! # Run the daemon with the system configuration
//! scan-relay run
//!
//! # Run with a specific config file and debug logging, without uploading
//! scan-relay -v --config ./scan-relay.toml run --no-upload
//!
//! # List the scanners SANE can see (under the ownership handshake)
//! scan-relay devices
//!
//! # Show the effective configuration
//! scan-relay config
//! ```

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Scanner button daemon.
///
/// Waits for scan-button and page-loaded events from scanbd, scans pages
/// while temporarily owning the scanner, and assembles each session into a
/// PDF that is uploaded to the backend.
#[derive(Debug, Parser)]
#[command(name = "scan-relay")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity level (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Configuration file (TOML)
    #[arg(short, long, global = true, value_name = "PATH", env = "SCAN_RELAY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Print fatal errors as JSON on stderr
    #[arg(long, global = true)]
    pub json_errors: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the daemon
    Run(RunArgs),
    /// Enumerate scanners once and exit
    Devices,
    /// Print the effective configuration as TOML
    Config,
}

/// Arguments for the run subcommand.
#[derive(Debug, Clone, Default, Args)]
pub struct RunArgs {
    /// Assemble documents but do not upload them
    #[arg(long)]
    pub no_upload: bool,

    /// Do not listen for SIGUSR1/SIGUSR2 events, only poll trigger files
    #[arg(long)]
    pub no_signals: bool,

    /// Backend base URL (overrides the configured URL and URL file)
    #[arg(long, value_name = "URL")]
    pub backend_url: Option<String>,
}
