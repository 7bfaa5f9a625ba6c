//! JSON-lines trace logs
//!
//! One log holds the decoded event stream of a single traced thread, one
//! [`Event`] per line. Blank lines and `#` comments are skipped.

use crate::event::Event;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// A decoded per-thread event stream
#[derive(Debug, Clone, PartialEq)]
pub struct TraceLog {
    /// Where the stream came from (file name in diagnostics)
    pub source: String,
    pub events: Vec<Event>,
}

impl TraceLog {
    pub fn new(source: impl Into<String>, events: Vec<Event>) -> Self {
        TraceLog {
            source: source.into(),
            events,
        }
    }

    /// Load a trace log from disk
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read trace log: {}", path.display()))?;
        Self::from_jsonl_str(&path.display().to_string(), &content)
    }

    /// Parse a trace log from JSON-lines text
    ///
    /// # Arguments
    ///
    /// * `source` - Name used in error messages and reconciliation reports
    /// * `content` - One JSON event object per line
    pub fn from_jsonl_str(source: &str, content: &str) -> Result<Self> {
        let mut events = Vec::new();
        for (lineno, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let event: Event = serde_json::from_str(line)
                .with_context(|| format!("{}:{}: invalid trace record", source, lineno + 1))?;
            events.push(event);
        }
        Ok(TraceLog::new(source, events))
    }

    /// Render back to JSON lines
    pub fn to_jsonl(&self) -> Result<String> {
        let mut out = String::new();
        for event in &self.events {
            out.push_str(&serde_json::to_string(event)?);
            out.push('\n');
        }
        Ok(out)
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
