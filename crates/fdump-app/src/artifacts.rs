//! Dump output directory and report files
//!
//! File names here are what downstream tooling looks for; do not rename.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::Serialize;

use fdump_core::prelude::*;

use crate::assets::EmbedReport;

/// Artifact file names.
pub mod files {
    pub const SUMMARY_TREE: &str = "summary_tree.json";
    pub const LAYOUT_BY_ID: &str = "layout_by_id.json";
    pub const DETAILS_BY_ID: &str = "details_by_id.json";
    pub const FULL_DESIGN: &str = "full_design.json";
    pub const FIGMA_LAYOUT_RAW: &str = "figma_layout_raw.json";
    pub const FIGMA_LAYOUT: &str = "figma_layout.json";
    pub const ERROR_LOG: &str = "error_log.txt";
    pub const SUCCESS_LOG: &str = "success_log.txt";
}

/// Characters shown on each side of a parse error.
const ERROR_WINDOW_CHARS: usize = 200;

/// Characters shown from each end of an unparsable payload.
const EDGE_PREVIEW_CHARS: usize = 1000;

/// An output directory that remembers what was written to it.
#[derive(Debug)]
pub struct DumpDir {
    path: PathBuf,
    written: Vec<PathBuf>,
}

impl DumpDir {
    /// Create `path` (and parents) if needed.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        std::fs::create_dir_all(&path)
            .with_context(|| format!("Failed to create dump directory {}", path.display()))?;
        Ok(Self {
            path,
            written: Vec::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Files written so far, in order.
    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }

    /// Write `value` as pretty-printed JSON.
    pub fn write_json<T: Serialize + ?Sized>(&mut self, name: &str, value: &T) -> Result<PathBuf> {
        let text = serde_json::to_string_pretty(value)?;
        self.write_text(name, &text)
    }

    pub fn write_text(&mut self, name: &str, text: &str) -> Result<PathBuf> {
        let file = self.path.join(name);
        std::fs::write(&file, text)
            .with_context(|| format!("Failed to write {}", file.display()))?;
        info!("Saved {}", file.display());
        if !self.written.contains(&file) {
            self.written.push(file.clone());
        }
        Ok(file)
    }
}

/// Char offset into `raw` for a 1-based `line`/`column` error position.
pub fn error_offset(raw: &str, line: usize, column: usize) -> Option<usize> {
    if line == 0 {
        return None;
    }
    let line_start: usize = raw.split('\n').take(line - 1).map(|l| l.len() + 1).sum();
    let mut byte = (line_start + column.saturating_sub(1)).min(raw.len());
    while !raw.is_char_boundary(byte) {
        byte -= 1;
    }
    Some(raw[..byte].chars().count())
}

fn char_slice(raw: &str, start: usize, end: usize) -> String {
    raw.chars().skip(start).take(end.saturating_sub(start)).collect()
}

/// Contents of `error_log.txt` for a payload that failed to parse.
pub fn parse_error_report(raw: &str, message: &str, offset: Option<usize>) -> String {
    let len = raw.chars().count();
    let mut report = String::new();

    report.push_str("JSON parse error\n");
    report.push_str(&format!("Message: {}\n", message));
    report.push_str(&format!("Length: {} chars\n\n", len));

    if let Some(pos) = offset {
        let start = pos.saturating_sub(ERROR_WINDOW_CHARS);
        let end = (pos + ERROR_WINDOW_CHARS).min(len);
        report.push_str(&format!("Error position: {}\n", pos));
        report.push_str(&format!(
            "Text around error ({}-{}):\n{}\n\n",
            start,
            end,
            char_slice(raw, start, end)
        ));
    }

    report.push_str(&format!(
        "First {} chars:\n{}\n\n",
        EDGE_PREVIEW_CHARS,
        char_slice(raw, 0, EDGE_PREVIEW_CHARS)
    ));
    if len > EDGE_PREVIEW_CHARS {
        report.push_str(&format!(
            "Last {} chars:\n{}\n",
            EDGE_PREVIEW_CHARS,
            char_slice(raw, len - EDGE_PREVIEW_CHARS, len)
        ));
    }

    report
}

/// Contents of `success_log.txt`.
pub fn success_report(
    timestamp: DateTime<Local>,
    raw_len: usize,
    node_count: usize,
    images: &EmbedReport,
    files: &[PathBuf],
) -> String {
    let mut report = String::from("Layout extraction succeeded\n\n");
    report.push_str(&format!(
        "Timestamp: {}\n",
        timestamp.format("%Y-%m-%d %H:%M:%S")
    ));
    report.push_str(&format!("JSON length: {} chars\n", raw_len));
    report.push_str(&format!("Node count: {}\n", node_count));
    report.push_str(&format!(
        "Images: {} embedded, {} with errors\n\n",
        images.embedded.len(),
        images.issues.len()
    ));
    report.push_str("Files:\n");
    for file in files {
        report.push_str(&format!("- {}\n", file.display()));
    }
    report
}
