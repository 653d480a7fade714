//! Config command implementation.
//!
//! Config file is located at ~/.config/feedline/config.toml.

use std::env;
use std::fs;
use std::path::PathBuf;

use directories::BaseDirs;
use feedline_engine::TimelineConfig;
use serde::{Deserialize, Serialize};

use super::{CommandContext, CommandError, Result};

/// Current config file version. Increment when making breaking changes to schema.
const CONFIG_VERSION: u32 = 1;

/// Environment variable overriding the config file location.
pub const CONFIG_ENV: &str = "FEEDLINE_CONFIG";

/// Configuration file structure.
#[derive(Debug, Serialize, Deserialize)]
pub struct Config {
    /// Config schema version for migrations.
    #[serde(default = "default_version")]
    pub version: u32,

    /// Settings applied to every timeline the CLI builds.
    #[serde(default)]
    pub timeline: TimelineConfig,
}

fn default_version() -> u32 {
    CONFIG_VERSION
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            timeline: TimelineConfig::default(),
        }
    }
}

/// Gets the config file path.
///
/// Resolution order: `$FEEDLINE_CONFIG`, `$XDG_CONFIG_HOME/feedline/config.toml`,
/// then `~/.config/feedline/config.toml`.
pub fn get_config_path() -> Result<PathBuf> {
    if let Ok(path) = env::var(CONFIG_ENV) {
        return Ok(PathBuf::from(path));
    }

    if let Ok(xdg_config) = env::var("XDG_CONFIG_HOME") {
        return Ok(PathBuf::from(xdg_config).join("feedline").join("config.toml"));
    }

    BaseDirs::new()
        .map(|dirs| dirs.home_dir().join(".config").join("feedline").join("config.toml"))
        .ok_or_else(|| CommandError::Config("Could not determine config directory".to_string()))
}

/// Loads the configuration from disk, falling back to defaults when no file exists.
pub fn load_config() -> Result<Config> {
    let path = get_config_path()?;

    if !path.exists() {
        return Ok(Config::default());
    }

    let content = fs::read_to_string(&path)
        .map_err(|e| CommandError::Config(format!("Failed to read config: {}", e)))?;

    let config: Config = toml::from_str(&content)
        .map_err(|e| CommandError::Config(format!("Failed to parse config: {}", e)))?;

    migrate_config(config)
}

/// Brings an older config up to [`CONFIG_VERSION`].
fn migrate_config(mut config: Config) -> Result<Config> {
    if config.version > CONFIG_VERSION {
        tracing::warn!(
            version = config.version,
            supported = CONFIG_VERSION,
            "config file is newer than this build"
        );
    }
    config.version = CONFIG_VERSION;
    Ok(config)
}

/// Executes the config show command.
pub fn execute_show(ctx: &CommandContext) -> Result<()> {
    let config = load_config()?;
    let path = get_config_path()?;

    if ctx.json_output {
        let output = serde_json::json!({
            "path": path.display().to_string(),
            "exists": path.exists(),
            "config": config,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else if !ctx.quiet {
        use owo_colors::OwoColorize;

        let header = "Configuration";
        if ctx.use_colors {
            println!("{}\n", header.green().bold());
        } else {
            println!("{}\n", header);
        }

        println!("File: {}", path.display());
        println!("Exists: {}\n", path.exists());

        let timeline = &config.timeline;
        println!("[timeline]");
        println!("  name: {}", timeline.name);
        println!("  max_items: {}", timeline.max_items);
        println!("  backfill_count: {}", timeline.backfill_count);
        println!("  notify_new_arrivals: {}", timeline.notify_new_arrivals);
        println!("  count_unread: {}", timeline.count_unread);
        println!("  event_capacity: {}", timeline.event_capacity);

        if !path.exists() {
            println!("\n(No config file exists; showing defaults.)");
        }
    }

    Ok(())
}

/// Executes the config path command.
pub fn execute_path(ctx: &CommandContext) -> Result<()> {
    let path = get_config_path()?;

    if ctx.json_output {
        let output = serde_json::json!({
            "path": path.display().to_string(),
            "exists": path.exists(),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("{}", path.display());
    }

    Ok(())
}
