//! Output rendering for CLI surfaces.
//!
//! Text output stays compact and line-oriented; JSON output is always wrapped
//! in the command envelope from [`crate::core::time::command_envelope`].

use crate::core::diff::DiffReport;
use crate::core::error::{ConflictInfo, SpecPackError};
use crate::core::hash;
use crate::core::time;
use serde_json::Value as JsonValue;

pub const FORMAT_TEXT: &str = "text";
pub const FORMAT_JSON: &str = "json";

/// Collapse newlines/extra whitespace and bound length for terminal display.
pub fn compact_line(input: &str, max_chars: usize) -> String {
    let collapsed = input.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut chars = collapsed.chars();
    let preview: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}...", preview)
    } else {
        preview
    }
}

/// Render up to `max_items` messages with compact formatting.
pub fn preview_messages(messages: &[String], max_items: usize, max_chars: usize) -> String {
    if messages.is_empty() {
        return String::new();
    }
    let shown = messages
        .iter()
        .take(max_items)
        .map(|m| compact_line(m, max_chars))
        .collect::<Vec<_>>()
        .join(" | ");
    if messages.len() > max_items {
        format!("{} (+{} more)", shown, messages.len() - max_items)
    } else {
        shown
    }
}

/// One line per changed path, `A`/`D`/`M` prefixed, after the summary line.
pub fn render_diff_summary(report: &DiffReport) -> String {
    let mut out = report.summary_line();
    out.push('\n');
    for path in &report.added {
        out.push_str(&format!("A {path}\n"));
    }
    for path in &report.removed {
        out.push_str(&format!("D {path}\n"));
    }
    for path in report.modified_paths() {
        out.push_str(&format!("M {path}\n"));
    }
    out
}

pub fn render_conflict(info: &ConflictInfo) -> String {
    let paths: Vec<String> = info.files.iter().map(|f| f.path.clone()).collect();
    format!(
        "conflict on {}: base {} expected, {} found; files: {}",
        info.base_project_id,
        hash::short_hash(&info.expected_base_pack_sha256),
        hash::short_hash(&info.actual_base_pack_sha256),
        preview_messages(&paths, 5, 80)
    )
}

/// Prints `payload` as an enveloped JSON document, or `text()` otherwise.
pub fn emit<F>(format: &str, cmd: &str, payload: JsonValue, text: F) -> Result<(), SpecPackError>
where
    F: FnOnce() -> String,
{
    if format == FORMAT_JSON {
        let envelope = time::command_envelope(cmd, "ok", payload);
        println!("{}", serde_json::to_string_pretty(&envelope)?);
    } else {
        let rendered = text();
        print!("{rendered}");
        if !rendered.ends_with('\n') {
            println!();
        }
    }
    Ok(())
}
