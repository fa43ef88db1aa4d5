//! # Log Filter
//!
//! Reduces mover output to the lines worth showing in the resource status.

use crate::controller::discovery::DiscoveryResult;
use regex::Regex;
use std::sync::LazyLock;

static INTERESTING_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(error|warn|fail|denied|snapshot|restor|maintenance|repository|identity|complete|created|uploaded|processed|bytes|files|kopia)",
    )
    .expect("INTERESTING_LINE_RE is a valid regex")
});

/// Keep interesting lines, at most the last `max_lines` of them
#[must_use]
pub fn filter_logs(log_text: &str, max_lines: usize) -> String {
    let kept: Vec<&str> = log_text
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty() && INTERESTING_LINE_RE.is_match(line))
        .collect();
    let start = kept.len().saturating_sub(max_lines);
    kept[start..].join("\n")
}

/// Destination variant of [`filter_logs`] that appends the discovery summary
///
/// JSON snapshot records are dropped from the tail since the summary already
/// carries what they say.
#[must_use]
pub fn filter_destination_logs(
    log_text: &str,
    max_lines: usize,
    discovery: &DiscoveryResult,
) -> String {
    let without_records: String = log_text
        .lines()
        .filter(|line| !line.trim_start().starts_with('{'))
        .collect::<Vec<_>>()
        .join("\n");
    let mut filtered = filter_logs(&without_records, max_lines);

    if !discovery.message.is_empty() {
        if !filtered.is_empty() {
            filtered.push('\n');
        }
        filtered.push_str("Snapshot discovery: ");
        filtered.push_str(&discovery.message);
    }
    filtered
}
