//! # Snapshot Discovery
//!
//! Recovers identity and snapshot information from the destination mover's logs.
//!
//! When a restore finds no snapshots for its identity, the mover image lists
//! what the repository does contain. Three shapes are recognised:
//!
//! - the error line: `No snapshots found for identity: user@host`
//! - JSON snapshot records, one per line, as printed by `kopia snapshot list --json`
//! - legacy text listings: `user@host:/data  2024-01-15 10:30:00 UTC  k1f2...`
//!
//! Lines that match none of these are ignored.

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

static NO_SNAPSHOTS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)no snapshots found for (?:identity|source)?\s*[:=]?\s*['"]?([A-Za-z0-9._-]+@[A-Za-z0-9._-]+)"#,
    )
    .expect("NO_SNAPSHOTS_RE is a valid regex")
});

static REQUESTED_IDENTITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)(?:requested|restoring from|looking for snapshots (?:of|for)) identity\s*[:=]?\s*['"]?([A-Za-z0-9._-]+@[A-Za-z0-9._-]+)"#,
    )
    .expect("REQUESTED_IDENTITY_RE is a valid regex")
});

static LEGACY_LISTING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*([A-Za-z0-9._-]+@[A-Za-z0-9._-]+)(?::\S*)?\s+(\d{4}-\d{2}-\d{2})[ T](\d{2}:\d{2}:\d{2})",
    )
    .expect("LEGACY_LISTING_RE is a valid regex")
});

/// Snapshot summary for one identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredIdentity {
    pub identity: String,
    pub snapshot_count: i32,
    pub latest_snapshot: Option<DateTime<Utc>>,
}

/// Result of scanning a destination log
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryResult {
    /// Identity the restore asked for, empty if the log does not say
    pub requested_identity: String,
    /// Identities present in the repository, sorted by identity
    pub available_identities: Vec<DiscoveredIdentity>,
    /// Explanation for the status, empty when nothing was found
    pub message: String,
}

impl DiscoveryResult {
    /// True when the log carried no discovery information at all
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.requested_identity.is_empty()
            && self.available_identities.is_empty()
            && self.message.is_empty()
    }
}

/// Strategy for extracting discovery information from mover output
pub trait DiscoveryParser: Send + Sync + std::fmt::Debug {
    fn parse(&self, log_text: &str) -> DiscoveryResult;
}

/// Default parser scraping the mover's text output
#[derive(Debug, Clone, Copy, Default)]
pub struct LogScrapingParser;

impl DiscoveryParser for LogScrapingParser {
    fn parse(&self, log_text: &str) -> DiscoveryResult {
        parse_discovery(log_text)
    }
}

#[derive(Default)]
struct Tally {
    count: i32,
    latest: Option<DateTime<Utc>>,
}

impl Tally {
    fn record(&mut self, at: Option<DateTime<Utc>>) {
        self.count += 1;
        if let Some(at) = at {
            if self.latest.is_none_or(|latest| at > latest) {
                self.latest = Some(at);
            }
        }
    }
}

/// Parse discovery information out of free-form log text
#[must_use]
pub fn parse_discovery(log_text: &str) -> DiscoveryResult {
    let mut requested = String::new();
    let mut error_line: Option<String> = None;
    let mut tallies: BTreeMap<String, Tally> = BTreeMap::new();

    for line in log_text.lines() {
        if let Some(caps) = NO_SNAPSHOTS_RE.captures(line) {
            requested = caps[1].to_string();
            error_line = Some(line.trim().to_string());
            continue;
        }

        if let Some(caps) = REQUESTED_IDENTITY_RE.captures(line) {
            if requested.is_empty() {
                requested = caps[1].to_string();
            }
            continue;
        }

        if let Some((identity, at)) = parse_json_record(line) {
            tallies.entry(identity).or_default().record(at);
            continue;
        }

        if let Some(caps) = LEGACY_LISTING_RE.captures(line) {
            let at = NaiveDateTime::parse_from_str(
                &format!("{} {}", &caps[2], &caps[3]),
                "%Y-%m-%d %H:%M:%S",
            )
            .ok()
            .map(|naive| naive.and_utc());
            tallies.entry(caps[1].to_string()).or_default().record(at);
        }
    }

    let available: Vec<DiscoveredIdentity> = tallies
        .into_iter()
        .map(|(identity, tally)| DiscoveredIdentity {
            identity,
            snapshot_count: tally.count,
            latest_snapshot: tally.latest,
        })
        .collect();

    let message = match error_line {
        Some(line) if available.is_empty() => line,
        Some(line) => format!("{line}. {}", describe_available(&available)),
        None if !requested.is_empty() && !available.is_empty() => format!(
            "No snapshots found for identity '{requested}'. {}",
            describe_available(&available)
        ),
        None => String::new(),
    };

    DiscoveryResult {
        requested_identity: requested,
        available_identities: available,
        message,
    }
}

/// Extract `userName@host` and a timestamp from one JSON snapshot record
fn parse_json_record(line: &str) -> Option<(String, Option<DateTime<Utc>>)> {
    let trimmed = line.trim();
    if !trimmed.starts_with('{') {
        return None;
    }
    let value: serde_json::Value = serde_json::from_str(trimmed).ok()?;
    let source = value.get("source")?;
    let user = source.get("userName")?.as_str()?;
    let host = source.get("host")?.as_str()?;
    if user.is_empty() || host.is_empty() {
        return None;
    }
    let at = ["endTime", "startTime"]
        .iter()
        .filter_map(|key| value.get(*key).and_then(|v| v.as_str()))
        .find_map(|ts| DateTime::parse_from_rfc3339(ts).ok())
        .map(|ts| ts.with_timezone(&Utc));
    Some((format!("{user}@{host}"), at))
}

fn describe_available(available: &[DiscoveredIdentity]) -> String {
    let listed: Vec<String> = available
        .iter()
        .map(|info| {
            let noun = if info.snapshot_count == 1 {
                "snapshot"
            } else {
                "snapshots"
            };
            match info.latest_snapshot {
                Some(latest) => format!(
                    "{} ({} {noun}, latest {})",
                    info.identity,
                    info.snapshot_count,
                    latest.to_rfc3339()
                ),
                None => format!("{} ({} {noun})", info.identity, info.snapshot_count),
            }
        })
        .collect();
    format!(
        "Available identities: {}. Set username/hostname or sourceIdentity to restore from one of these",
        listed.join(", ")
    )
}
