//! CLI argument parsing using clap derive macros.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// feedline - author, compile and replay timeline filters
#[derive(Parser, Debug)]
#[command(name = "feedline")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbose output (debug logging)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Quiet mode (errors only)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Output JSON instead of tables
    #[arg(long, global = true)]
    pub json: bool,

    /// Disable colors in output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Compile a filter and print its storage query text
    #[command(alias = "c")]
    Compile {
        /// Filter expression (e.g., 'author == "alice" && has_media')
        filter: String,
    },

    /// Materialize a timeline from an item fixture
    #[command(alias = "r")]
    Run {
        /// Filter expression
        filter: String,

        /// JSON file with the items held in storage
        #[arg(short, long)]
        items: PathBuf,

        /// JSON file with items replayed as live arrivals after the backfill
        #[arg(long)]
        live: Option<PathBuf>,

        /// Maximum number of items kept (default: from config)
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Check that the predicate and the query text select the same items
    Verify {
        /// Filter expression
        filter: String,

        /// JSON file with the items to check
        #[arg(short, long)]
        items: PathBuf,
    },

    /// Show configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Show config file path
    Path,
}
