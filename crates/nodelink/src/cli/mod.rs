//! CLI definition and command handling

pub mod commands;
pub mod output;

use anyhow::Context;
use clap::{Parser, Subcommand};

use commands::{ManifestsCommand, NamesCommand, SetupCommand};

/// Nodelink - link local packages of a monorepo and install the rest
#[derive(Debug, Parser)]
#[command(name = "nodelink")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output format
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Working directory
    #[arg(short = 'C', long, global = true)]
    pub directory: Option<std::path::PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Output format for CLI
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    #[default]
    Text,
    /// JSON output
    Json,
}

/// Available commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// List the names of the packages
    Names(NamesCommand),

    /// List the paths to the package manifests
    Manifests(ManifestsCommand),

    /// Link local packages and install the rest
    Setup(SetupCommand),
}

impl Cli {
    /// Execute the CLI command
    pub fn execute(self) -> anyhow::Result<()> {
        // Change to specified directory if provided
        if let Some(dir) = &self.directory {
            std::env::set_current_dir(dir)
                .with_context(|| format!("failed to change directory to {}", dir.display()))?;
        }

        match self.command {
            Commands::Names(ref cmd) => cmd.execute(&self),
            Commands::Manifests(ref cmd) => cmd.execute(&self),
            Commands::Setup(ref cmd) => cmd.execute(&self),
        }
    }
}
