//! Output formatting for the feedline CLI: tables for people, JSON for scripts.

use feedline_engine::CompiledFilter;
use feedline_types::Item;
use owo_colors::OwoColorize;
use serde::Serialize;

/// Maximum characters of item text shown in a table row.
const TEXT_WIDTH: usize = 48;

/// JSON output structure for the compile command.
#[derive(Serialize)]
pub struct CompileOutput<'a> {
    pub filter: String,
    pub query_text: &'a str,
    pub degradations: Vec<String>,
}

/// JSON output structure for a timeline.
#[derive(Serialize)]
pub struct TimelineOutput<'a> {
    pub name: &'a str,
    pub query_text: &'a str,
    pub items: &'a [Item],
}

/// One item's verdicts from the verify command.
#[derive(Debug, Serialize)]
pub struct Verdict {
    pub id: u64,
    pub predicate: bool,
    pub query_text: bool,
}

impl Verdict {
    pub fn agrees(&self) -> bool {
        self.predicate == self.query_text
    }
}

/// JSON output structure for the verify command.
#[derive(Serialize)]
pub struct VerifyOutput<'a> {
    pub query_text: &'a str,
    pub checked: usize,
    pub accepted: usize,
    pub mismatches: Vec<&'a Verdict>,
}

/// Truncates a string to a maximum number of characters.
pub fn truncate_str(s: &str, max_len: usize) -> String {
    if s.chars().count() > max_len {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    } else {
        s.to_string()
    }
}

/// Formats a compiled filter as JSON.
pub fn format_compiled_json(
    filter: &str,
    compiled: &CompiledFilter,
) -> Result<String, serde_json::Error> {
    let output = CompileOutput {
        filter: filter.to_string(),
        query_text: compiled.query_text(),
        degradations: compiled
            .degradations()
            .iter()
            .map(ToString::to_string)
            .collect(),
    };
    serde_json::to_string_pretty(&output)
}

/// Formats a compiled filter for the terminal.
pub fn format_compiled_text(compiled: &CompiledFilter, use_colors: bool) -> String {
    let mut output = format!("{}\n", compiled.query_text());
    for degradation in compiled.degradations() {
        let line = format!("warning: {degradation} (matches nothing)");
        if use_colors {
            output.push_str(&format!("{}\n", line.yellow()));
        } else {
            output.push_str(&format!("{line}\n"));
        }
    }
    output
}

/// Formats a timeline as JSON.
pub fn format_timeline_json(
    name: &str,
    query_text: &str,
    items: &[Item],
) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(&TimelineOutput {
        name,
        query_text,
        items,
    })
}

/// Formats timeline items as a table, newest first.
pub fn format_items_table(items: &[Item], use_colors: bool) -> String {
    if items.is_empty() {
        return "No items match.\n".to_string();
    }

    let mut output = String::new();

    let header = format!("{:<10} {:<16} {:<6} {}", "ID", "Author", "Media", "Text");
    if use_colors {
        output.push_str(&format!("{}\n", header.bold()));
    } else {
        output.push_str(&format!("{header}\n"));
    }

    for item in items {
        let id = item.id.to_string();
        let media = if item.has_media { "yes" } else { "" };
        let author = truncate_str(&item.author, 16);
        let text = truncate_str(&item.text, TEXT_WIDTH);
        if use_colors {
            output.push_str(&format!(
                "{:<10} {:<16} {:<6} {}\n",
                id.dimmed(),
                author.cyan(),
                media,
                text
            ));
        } else {
            output.push_str(&format!("{:<10} {:<16} {:<6} {}\n", id, author, media, text));
        }
    }

    output
}

/// Formats verify results as JSON.
pub fn format_verify_json(
    query_text: &str,
    verdicts: &[Verdict],
) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(&VerifyOutput {
        query_text,
        checked: verdicts.len(),
        accepted: verdicts.iter().filter(|v| v.predicate).count(),
        mismatches: verdicts.iter().filter(|v| !v.agrees()).collect(),
    })
}

/// Formats verify results for the terminal.
pub fn format_verify_text(query_text: &str, verdicts: &[Verdict], use_colors: bool) -> String {
    let accepted = verdicts.iter().filter(|v| v.predicate).count();
    let mut output = format!(
        "{query_text}\nchecked {} item(s), {accepted} accepted\n",
        verdicts.len()
    );

    for verdict in verdicts.iter().filter(|v| !v.agrees()) {
        let line = format!(
            "mismatch on item {}: predicate={} query_text={}",
            verdict.id, verdict.predicate, verdict.query_text
        );
        if use_colors {
            output.push_str(&format!("{}\n", line.red()));
        } else {
            output.push_str(&format!("{line}\n"));
        }
    }

    output
}
