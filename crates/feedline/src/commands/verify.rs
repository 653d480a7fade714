//! Verify command implementation.
//!
//! Evaluates a filter against an item fixture twice, once with the in-memory
//! predicate and once by executing the compiled query text, and reports every
//! item where the two disagree.

use std::path::Path;

use feedline_engine::filter::{compile, matches, FilterParser};
use feedline_types::Item;

use super::{load_items, CommandContext, CommandError, Result};
use crate::output::{format_verify_json, format_verify_text, Verdict};

/// Computes both verdicts for every item.
pub fn check(filter: &str, items: &[Item]) -> Result<(String, Vec<Verdict>)> {
    let compiled = compile(&FilterParser::parse(filter)?);
    let query_text = compiled.query_text().to_string();

    let verdicts = items
        .iter()
        .map(|item| {
            Ok(Verdict {
                id: item.id.0,
                predicate: compiled.accepts(item),
                query_text: matches(&query_text, item)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok((query_text, verdicts))
}

/// Executes the verify command.
///
/// # Errors
///
/// Returns [`CommandError::Mismatch`] if any item is judged differently by
/// the two targets.
pub fn execute(ctx: &CommandContext, filter: &str, items_path: &Path) -> Result<()> {
    let items = load_items(items_path)?;
    let (query_text, verdicts) = check(filter, &items)?;

    if ctx.json_output {
        println!("{}", format_verify_json(&query_text, &verdicts)?);
    } else if !ctx.quiet {
        print!("{}", format_verify_text(&query_text, &verdicts, ctx.use_colors));
    }

    let mismatches = verdicts.iter().filter(|v| !v.agrees()).count();
    if mismatches > 0 {
        return Err(CommandError::Mismatch { mismatches });
    }
    Ok(())
}
