//! Command implementations for the feedline CLI.

pub mod compile;
pub mod config;
pub mod run;
pub mod verify;

use std::fs;
use std::path::Path;

use feedline_engine::{FilterError, TimelineError};
use feedline_types::{Item, StorageError};

use crate::cli::Cli;

/// Error type for command execution.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// Filter parsing error.
    #[error("filter error: {0}")]
    Filter(#[from] FilterError),

    /// Timeline error.
    #[error("timeline error: {0}")]
    Timeline(#[from] TimelineError),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// The item fixture could not be used.
    #[error("item fixture '{path}': {message}")]
    Fixture { path: String, message: String },

    /// Predicate and query text disagreed on at least one item.
    #[error("{mismatches} item(s) where predicate and query text disagree")]
    Mismatch { mismatches: usize },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for command execution.
pub type Result<T> = std::result::Result<T, CommandError>;

/// Context for command execution, containing common dependencies.
pub struct CommandContext {
    /// Whether to output JSON.
    pub json_output: bool,
    /// Whether to use colors.
    pub use_colors: bool,
    /// Whether to be quiet (errors only).
    pub quiet: bool,
    /// Whether to be verbose.
    pub verbose: bool,
}

impl CommandContext {
    /// Creates a new command context from CLI arguments.
    pub fn from_cli(cli: &Cli) -> Self {
        Self {
            json_output: cli.json,
            use_colors: !cli.no_color,
            quiet: cli.quiet,
            verbose: cli.verbose,
        }
    }
}

/// Reads a JSON array of items.
pub fn load_items(path: &Path) -> Result<Vec<Item>> {
    let fixture_error = |message: String| CommandError::Fixture {
        path: path.display().to_string(),
        message,
    };

    let content = fs::read_to_string(path).map_err(|e| fixture_error(e.to_string()))?;
    let items: Vec<Item> = serde_json::from_str(&content).map_err(|e| fixture_error(e.to_string()))?;
    tracing::debug!(path = %path.display(), count = items.len(), "loaded item fixture");
    Ok(items)
}
