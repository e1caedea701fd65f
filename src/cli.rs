//! Command-line interface for wavemesh
//!
//! Uses clap with derive for type-safe CLI parsing

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// wavemesh - wireless network emulation on Linux namespaces
#[derive(Parser)]
#[command(name = "wavemesh")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "wavemesh.toml")]
    pub config: PathBuf,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// Build the topology: namespaces, radios, access points and stations
    Up {
        /// Keep the topology until Enter is pressed, then tear it down
        #[arg(long)]
        hold: bool,

        /// Print the resulting status as JSON
        #[arg(long)]
        json: bool,
    },

    /// Remove the namespaces, radios and files of a previous `up`
    Down,

    /// Validate configuration
    Check,

    /// Generate shell completion scripts
    Completion {
        /// Shell to generate completion for
        #[arg(value_enum)]
        shell: Shell,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Generate shell completion scripts
    pub fn generate_completion(shell: Shell) {
        let mut cmd = Self::command();
        clap_complete::generate(shell, &mut cmd, "wavemesh", &mut std::io::stdout());
    }
}
