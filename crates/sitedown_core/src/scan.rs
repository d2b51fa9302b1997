use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use crate::tokens::line_matches;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    pub line_number: usize,
    pub line_text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAnalysis {
    pub path: PathBuf,
    pub active_matches: Vec<Match>,
    pub commented_matches: Vec<Match>,
}

impl FileAnalysis {
    pub fn has_active_matches(&self) -> bool {
        !self.active_matches.is_empty()
    }

    pub fn total_matches(&self) -> usize {
        self.active_matches.len() + self.commented_matches.len()
    }
}

pub fn analyze_config_file(path: &Path, tokens: &[String]) -> Result<FileAnalysis> {
    let content =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let analysis = analyze_config_text(path, &content, tokens);
    debug!(
        path = %path.display(),
        active = analysis.active_matches.len(),
        commented = analysis.commented_matches.len(),
        "scanned config file"
    );
    Ok(analysis)
}

pub fn analyze_config_text(path: &Path, content: &str, tokens: &[String]) -> FileAnalysis {
    let mut active_matches = Vec::new();
    let mut commented_matches = Vec::new();

    for (index, line) in content.split_inclusive('\n').enumerate() {
        let line_text = strip_line_ending(line);
        if !line_matches(line_text, tokens) {
            continue;
        }
        let entry = Match {
            line_number: index + 1,
            line_text: line_text.to_string(),
        };
        if is_comment(line_text) {
            commented_matches.push(entry);
        } else {
            active_matches.push(entry);
        }
    }

    FileAnalysis {
        path: path.to_path_buf(),
        active_matches,
        commented_matches,
    }
}

pub(crate) fn is_comment(line: &str) -> bool {
    line.trim_start().starts_with('#')
}

pub(crate) fn strip_line_ending(line: &str) -> &str {
    let line = line.strip_suffix('\n').unwrap_or(line);
    line.strip_suffix('\r').unwrap_or(line)
}
