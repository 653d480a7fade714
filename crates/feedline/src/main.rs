use clap::Parser;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;
mod output;

use cli::{Cli, Commands, ConfigCommands};
use commands::config::load_config;
use commands::run::RunOptions;
use commands::{CommandContext, CommandError};

/// Environment variable holding the log filter directives.
const LOG_ENV: &str = "FEEDLINE_LOG";

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli);

    match run(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if cli.json {
                let error_json = serde_json::json!({
                    "error": {
                        "code": error_code(&e),
                        "message": e.to_string(),
                    }
                });
                let rendered = serde_json::to_string_pretty(&error_json)
                    .unwrap_or_else(|_| error_json.to_string());
                eprintln!("{rendered}");
            } else {
                eprintln!("Error: {e}");
            }
            error_exit_code(&e)
        }
    }
}

/// Installs the stderr subscriber. `FEEDLINE_LOG` wins over the verbosity flags.
fn init_logging(cli: &Cli) {
    let default_level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "warn"
    };
    let filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(!cli.no_color)
        .with_target(false)
        .init();
}

async fn run(cli: &Cli) -> commands::Result<()> {
    let ctx = CommandContext::from_cli(cli);

    match &cli.command {
        Commands::Compile { filter } => commands::compile::execute(&ctx, filter),
        Commands::Run {
            filter,
            items,
            live,
            limit,
        } => {
            let config = load_config()?;
            let opts = RunOptions {
                filter: filter.clone(),
                items: items.clone(),
                live: live.clone(),
                limit: *limit,
            };
            commands::run::execute(&ctx, &opts, config.timeline).await
        }
        Commands::Verify { filter, items } => commands::verify::execute(&ctx, filter, items),
        Commands::Config { command } => match command {
            Some(ConfigCommands::Path) => commands::config::execute_path(&ctx),
            Some(ConfigCommands::Show) | None => commands::config::execute_show(&ctx),
        },
    }
}

/// Returns the error code string for JSON output.
fn error_code(e: &CommandError) -> &'static str {
    match e {
        CommandError::Filter(_) => "FILTER_ERROR",
        CommandError::Timeline(_) => "TIMELINE_ERROR",
        CommandError::Storage(_) => "STORAGE_ERROR",
        CommandError::Config(_) => "CONFIG_ERROR",
        CommandError::Fixture { .. } => "FIXTURE_ERROR",
        CommandError::Mismatch { .. } => "MISMATCH",
        CommandError::Io(_) => "IO_ERROR",
        CommandError::Json(_) => "JSON_ERROR",
    }
}

/// Returns the exit code for an error.
fn error_exit_code(e: &CommandError) -> ExitCode {
    ExitCode::from(exit_status(e))
}

fn exit_status(e: &CommandError) -> u8 {
    match e {
        CommandError::Filter(_) | CommandError::Json(_) => 1,
        CommandError::Timeline(_) | CommandError::Storage(_) => 2,
        CommandError::Io(_) | CommandError::Fixture { .. } => 3,
        CommandError::Mismatch { .. } => 4,
        CommandError::Config(_) => 5,
    }
}
