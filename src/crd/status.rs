//! # Mover Status
//!
//! Status blocks written onto the replication resource.
//!
//! Timestamps are RFC3339 strings, matching the rest of the operator's status types.

use serde::{Deserialize, Serialize};

/// Outcome of the last mover run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
pub enum MoverResult {
    Successful,
    Failed,
}

/// Generic mover status shared by all movers
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MoverStatus {
    /// Result of the most recent Job
    #[serde(default)]
    pub result: Option<MoverResult>,
    /// Filtered tail of the most recent Job's logs
    #[serde(default)]
    pub logs: Option<String>,
    /// Human-readable explanation of the last failure
    #[serde(default)]
    pub error: Option<String>,
}

/// Repository maintenance history derived from past maintenance Jobs
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceStatus {
    /// Whether maintenance is configured for this source
    #[serde(default)]
    pub configured: bool,
    #[serde(default)]
    pub last_successful_time: Option<String>,
    #[serde(default)]
    pub last_failed_time: Option<String>,
    /// Failed maintenance runs since the most recent success
    #[serde(default)]
    pub failures_since_last_success: i32,
    /// Duration of the most recently completed maintenance run (e.g. "42s")
    #[serde(default)]
    pub last_maintenance_duration: Option<String>,
}

/// Kopia-specific status of a replication source
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KopiaSourceStatus {
    /// Last time repository maintenance ran as part of a backup
    #[serde(default)]
    pub last_maintenance: Option<String>,
    #[serde(default)]
    pub maintenance_status: Option<MaintenanceStatus>,
    /// Estimated next maintenance run, for display only
    #[serde(default)]
    pub next_scheduled_maintenance: Option<String>,
}

/// One identity found in the repository
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IdentityInfo {
    /// `username@hostname`
    pub identity: String,
    pub snapshot_count: i32,
    #[serde(default)]
    pub latest_snapshot: Option<String>,
}

/// Kopia-specific status of a replication destination
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KopiaDestinationStatus {
    /// Identity the restore looked for (`username@hostname`)
    #[serde(default)]
    pub requested_identity: Option<String>,
    /// Identities found in the repository when the requested one had no snapshots
    #[serde(default)]
    pub available_identities: Vec<IdentityInfo>,
    #[serde(default)]
    pub discovery_message: Option<String>,
}
