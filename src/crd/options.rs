//! # Kopia Options
//!
//! Option blocks copied from `spec.kopia` of a replication resource.

use k8s_openapi::api::core::v1::{PodSecurityContext, ResourceRequirements, Toleration};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Snapshot retention policy
///
/// Each field maps to one `KOPIA_RETAIN_*` variable and is only forwarded when set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RetentionPolicy {
    #[serde(default)]
    pub hourly: Option<i32>,
    #[serde(default)]
    pub daily: Option<i32>,
    #[serde(default)]
    pub weekly: Option<i32>,
    #[serde(default)]
    pub monthly: Option<i32>,
    #[serde(default)]
    pub yearly: Option<i32>,
    #[serde(default)]
    pub latest: Option<i32>,
}

/// Commands run inside the mover before and after a snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotActions {
    #[serde(default)]
    pub before_snapshot: Option<String>,
    #[serde(default)]
    pub after_snapshot: Option<String>,
}

/// Identity of the source whose snapshots a destination should restore
///
/// Lets a destination in another namespace derive the same identity the
/// source used, without spelling out username and hostname.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SourceIdentity {
    pub source_name: String,
    pub source_namespace: String,
    /// Accepted for completeness; generated hostnames do not use it
    #[serde(default)]
    pub source_pvc_name: Option<String>,
}

/// Reference to a CA bundle stored in a Secret or a ConfigMap
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CustomCaSpec {
    #[serde(default)]
    pub secret_name: Option<String>,
    #[serde(default)]
    pub config_map_name: Option<String>,
    /// Key holding the bundle
    #[serde(default)]
    pub key: Option<String>,
}

impl CustomCaSpec {
    /// True when neither a Secret nor a ConfigMap is referenced
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.secret_name.as_deref().unwrap_or_default().is_empty()
            && self.config_map_name.as_deref().unwrap_or_default().is_empty()
    }
}

/// Reference to Kopia policy/repository configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PolicyConfigSpec {
    #[serde(default)]
    pub secret_name: Option<String>,
    #[serde(default)]
    pub config_map_name: Option<String>,
    /// Key holding the configuration document
    #[serde(default)]
    pub key: Option<String>,
}

impl PolicyConfigSpec {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.secret_name.as_deref().unwrap_or_default().is_empty()
            && self.config_map_name.as_deref().unwrap_or_default().is_empty()
    }
}

/// Metadata cache sizing
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheSettings {
    #[serde(default)]
    pub cache_capacity: Option<Quantity>,
    #[serde(default)]
    pub cache_storage_class_name: Option<String>,
    #[serde(default)]
    pub cache_access_modes: Vec<String>,
}

/// Generic pod overrides shared by all movers
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MoverPodOverrides {
    /// Extra labels applied to the mover pod
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub resources: Option<ResourceRequirements>,
    #[serde(default)]
    pub security_context: Option<PodSecurityContext>,
    #[serde(default)]
    pub node_selector: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub tolerations: Option<Vec<Toleration>>,
    /// Use this ServiceAccount instead of the one the mover reconciles
    #[serde(default)]
    pub service_account_name: Option<String>,
}
