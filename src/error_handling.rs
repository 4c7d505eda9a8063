use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde_json::json;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use crate::collector::{ErrorCollector, ErrorEntry};
use crate::platform::ReportSink;

const RULE: &str = "========================================\n";
const MAX_MESSAGE_CHARS: usize = 100;

/// Renders the contents of an [`ErrorCollector`] as text reports or a JSON
/// export.
pub struct ErrorReporter {
    collector: Arc<ErrorCollector>,
    sink: ReportSink,
}

impl ErrorReporter {
    pub fn new(collector: Arc<ErrorCollector>, sink: ReportSink) -> Self {
        Self { collector, sink }
    }

    pub fn summary_text(&self) -> String {
        let mut out = String::new();
        out.push('\n');
        out.push_str(RULE);
        out.push_str("Error Summary\n");
        out.push_str(RULE);
        out.push_str(&self.collector.summary().to_string());
        out.push_str(RULE);
        out
    }

    pub fn print_summary(&self) {
        self.sink.write_str(&self.summary_text());
    }

    /// Up to `max` entries in insertion order. `max == 0` lists all of them.
    pub fn detailed_text(&self, max: usize) -> String {
        let entries = self.collector.errors();
        if entries.is_empty() {
            return "No errors to report.\n".to_string();
        }

        let shown = if max == 0 { entries.len() } else { max.min(entries.len()) };
        let mut out = String::new();
        out.push('\n');
        out.push_str(RULE);
        out.push_str("Detailed Error Report\n");
        out.push_str(RULE);

        for (i, entry) in entries.iter().take(shown).enumerate() {
            out.push_str(&format!("\nError #{}:\n", i + 1));
            out.push_str(&format!("  Time:      {}\n", entry.timestamp.to_rfc3339()));
            out.push_str(&format!("  Category:  {}\n", entry.category));
            out.push_str(&format!("  Severity:  {}\n", entry.severity));
            out.push_str(&format!("  Retryable: {}\n", entry.retryable));
            if let Some(record) = &entry.record {
                out.push_str(&format!("  File:      {}\n", record.source));
                out.push_str(&format!("  Line:      {}\n", record.line_number));
            }
            out.push_str(&format!("  Error:     {}\n", entry.error));
        }

        if entries.len() > shown {
            out.push_str(&format!("\n... and {} more errors\n", entries.len() - shown));
        }
        out.push_str(RULE);
        out
    }

    pub fn print_detailed(&self, max: usize) {
        self.sink.write_str(&self.detailed_text(max));
    }

    /// The `n` most frequent messages, most frequent first. Ties keep the
    /// order in which the message was first seen.
    pub fn top_errors_text(&self, n: usize) -> String {
        let entries = self.collector.errors();
        if entries.is_empty() {
            return "No errors to report.\n".to_string();
        }

        let mut groups: IndexMap<String, (usize, ErrorEntry)> = IndexMap::new();
        for entry in entries {
            let message = entry.error.to_string();
            groups
                .entry(message)
                .and_modify(|(count, _)| *count += 1)
                .or_insert((1, entry));
        }
        let mut ranked: Vec<(String, usize, ErrorEntry)> = groups
            .into_iter()
            .map(|(message, (count, entry))| (message, count, entry))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1));

        let mut out = String::new();
        out.push('\n');
        out.push_str(RULE);
        out.push_str(&format!("Top {} Most Common Errors\n", n));
        out.push_str(RULE);
        for (i, (message, count, entry)) in ranked.iter().take(n).enumerate() {
            out.push_str(&format!("\n{}. ({} occurrences)\n", i + 1, count));
            out.push_str(&format!("   Category: {}\n", entry.category));
            out.push_str(&format!("   Message:  {}\n", truncate(message, MAX_MESSAGE_CHARS)));
        }
        out.push_str(RULE);
        out
    }

    pub fn print_top_errors(&self, n: usize) {
        self.sink.write_str(&self.top_errors_text(n));
    }

    /// Single-line form: `file:line [CATEGORY] message`.
    pub fn format_error(entry: &ErrorEntry) -> String {
        match &entry.record {
            Some(record) => format!(
                "{}:{} [{}] {}",
                record.source, record.line_number, entry.category, entry.error
            ),
            None => format!("[{}] {}", entry.category, entry.error),
        }
    }

    /// Write the summary and every entry to `path` as pretty JSON.
    pub fn export_json(&self, path: &Path) -> Result<()> {
        let entries: Vec<serde_json::Value> = self
            .collector
            .errors()
            .iter()
            .map(|entry| {
                let mut value = json!({
                    "timestamp": entry.timestamp.to_rfc3339(),
                    "category": entry.category,
                    "severity": entry.severity,
                    "retryable": entry.retryable,
                    "message": entry.error.to_string(),
                });
                if let Some(record) = &entry.record {
                    value["file"] = json!(record.source);
                    value["line"] = json!(record.line_number);
                }
                value
            })
            .collect();

        let report = json!({
            "summary": self.collector.summary(),
            "errors": entries,
        });

        let mut file = File::create(path)
            .with_context(|| format!("Failed to create error report '{}'", path.display()))?;
        let text = serde_json::to_string_pretty(&report)?;
        file.write_all(text.as_bytes())
            .with_context(|| format!("Failed to write error report '{}'", path.display()))?;
        file.write_all(b"\n")?;
        Ok(())
    }
}

fn truncate(message: &str, max_chars: usize) -> String {
    if message.chars().count() <= max_chars {
        message.to_string()
    } else {
        let mut cut: String = message.chars().take(max_chars).collect();
        cut.push_str("...");
        cut
    }
}
