//! Run command implementation.
//!
//! Materializes one timeline from an item fixture: the stored items are
//! backfilled through an in-memory storage, then the optional live items are
//! replayed as arrivals.

use std::path::PathBuf;
use std::sync::Arc;

use feedline_engine::{FilterQuery, LiveStream, MemoryStorage, TimelineConfig, TimelineModel};
use feedline_types::Item;

use super::{load_items, CommandContext, Result};
use crate::output::{format_items_table, format_timeline_json};

/// Options for the run command.
#[derive(Debug)]
pub struct RunOptions {
    /// Filter expression.
    pub filter: String,
    /// Items held in storage.
    pub items: PathBuf,
    /// Items replayed as live arrivals.
    pub live: Option<PathBuf>,
    /// Overrides `max_items` from the config.
    pub limit: Option<usize>,
}

/// A materialized timeline.
#[derive(Debug)]
pub struct RunResult {
    pub name: String,
    pub query_text: String,
    pub items: Vec<Item>,
    /// How many live items were admitted.
    pub admitted: usize,
    /// Unread count taken at the end, when `count_unread` is on.
    pub unread: Option<usize>,
}

/// Backfills a timeline from `stored`, replays `live`, and returns its contents.
pub async fn materialize(
    filter: &str,
    stored: Vec<Item>,
    live: Vec<Item>,
    config: TimelineConfig,
) -> Result<RunResult> {
    let query = FilterQuery::parse(filter)?;
    let compiled = query.compiled();
    for degradation in compiled.degradations() {
        tracing::warn!(%degradation, "filter comparison matches nothing");
    }

    let storage = Arc::new(MemoryStorage::with_items(stored));
    let stream = Arc::new(LiveStream::new());
    let timeline = TimelineModel::builder(storage, stream)
        .config(config)
        .filter_query(query)
        .build();

    timeline.activate().await?;
    let admitted = live
        .into_iter()
        .filter(|item| timeline.on_item_arrived(item.clone()))
        .count();
    tracing::debug!(admitted, len = timeline.len(), "live replay finished");

    let unread = timeline.config().count_unread.then(|| timeline.take_unread());
    let result = RunResult {
        name: timeline.name().to_string(),
        query_text: timeline.compiled_filter().query_text().to_string(),
        items: timeline.items(),
        admitted,
        unread,
    };
    timeline.dispose();
    Ok(result)
}

/// Executes the run command.
///
/// # Errors
///
/// Returns an error if a fixture cannot be read, the filter does not parse,
/// or the backfill fails.
pub async fn execute(ctx: &CommandContext, opts: &RunOptions, config: TimelineConfig) -> Result<()> {
    let stored = load_items(&opts.items)?;
    let live = match &opts.live {
        Some(path) => load_items(path)?,
        None => Vec::new(),
    };

    let mut config = config;
    if let Some(limit) = opts.limit {
        config.max_items = limit;
    }

    let result = materialize(&opts.filter, stored, live, config).await?;

    if ctx.json_output {
        println!(
            "{}",
            format_timeline_json(&result.name, &result.query_text, &result.items)?
        );
    } else if !ctx.quiet {
        if ctx.verbose {
            eprintln!("query: {}", result.query_text);
            eprintln!("live items admitted: {}", result.admitted);
            if let Some(unread) = result.unread {
                eprintln!("unread: {unread}");
            }
        }
        print!("{}", format_items_table(&result.items, ctx.use_colors));
    }

    Ok(())
}
