//! Compile command implementation.
//!
//! Parses a filter and prints the query text the storage layer would receive.

use feedline_engine::filter::{compile, FilterParser};

use super::{CommandContext, Result};
use crate::output::{format_compiled_json, format_compiled_text};

/// Executes the compile command.
///
/// # Errors
///
/// Returns an error if the filter does not parse. Comparisons that parse but
/// cannot be compiled are reported as warnings, not errors.
pub fn execute(ctx: &CommandContext, filter: &str) -> Result<()> {
    let expression = FilterParser::parse(filter)?;
    let compiled = compile(&expression);

    if ctx.json_output {
        println!("{}", format_compiled_json(filter, &compiled)?);
    } else if !ctx.quiet {
        print!("{}", format_compiled_text(&compiled, ctx.use_colors));
    }

    Ok(())
}
