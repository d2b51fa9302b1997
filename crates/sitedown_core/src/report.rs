use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use similar::TextDiff;

use crate::deactivate::{comment_out_lines, deactivation_marker};
use crate::error::BlockingError;
use crate::scan::FileAnalysis;

pub fn render_analysis(label: &str, analysis: &FileAnalysis) -> String {
    let mut out = String::new();
    out.push_str(&format!("{label}: {}\n", analysis.path.display()));
    out.push_str(&format!(
        "  active matching lines: {}\n",
        analysis.active_matches.len()
    ));
    out.push_str(&format!(
        "  already commented matching lines: {}\n",
        analysis.commented_matches.len()
    ));
    for entry in &analysis.active_matches {
        out.push_str(&format!("    L{}: {}\n", entry.line_number, entry.line_text));
    }
    out.push('\n');
    out
}

pub fn render_blocking_errors(errors: &[BlockingError]) -> String {
    let mut out = String::from("Cannot continue:\n");
    for error in errors {
        out.push_str(&format!("  - {error}\n"));
    }
    out
}

/// Unified diff of the edit apply mode would make to the analysed file.
/// Empty when there is nothing to comment out.
pub fn render_edit_preview(analysis: &FileAnalysis, site: &str, stamp: &str) -> Result<String> {
    if !analysis.has_active_matches() {
        return Ok(String::new());
    }
    let original = fs::read_to_string(&analysis.path)
        .with_context(|| format!("failed to read {}", analysis.path.display()))?;
    Ok(render_text_preview(
        &analysis.path,
        &original,
        analysis,
        site,
        stamp,
    ))
}

fn render_text_preview(
    path: &Path,
    original: &str,
    analysis: &FileAnalysis,
    site: &str,
    stamp: &str,
) -> String {
    let targets: BTreeSet<usize> = analysis
        .active_matches
        .iter()
        .map(|entry| entry.line_number)
        .collect();
    let updated = comment_out_lines(original, &targets, &deactivation_marker(site, stamp));
    let display = path.display().to_string();
    let display = display.trim_start_matches('/');
    TextDiff::from_lines(original, updated.as_str())
        .unified_diff()
        .context_radius(1)
        .header(&format!("a/{display}"), &format!("b/{display}"))
        .to_string()
}
