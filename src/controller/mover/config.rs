//! # Mover Configuration
//!
//! Per-reconcile configuration, built by the caller from the replication
//! resource's spec. The role is a sum type so role-specific behaviour is
//! matched exhaustively instead of branching on a flag.

use crate::crd::{
    CacheSettings, CustomCaSpec, MoverPodOverrides, PolicyConfigSpec, RetentionPolicy,
    SnapshotActions, SourceIdentity,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;

/// Replication resource that owns everything the mover creates
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OwnerInfo {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub namespace: String,
    pub uid: String,
}

impl OwnerInfo {
    /// Controller owner reference for created objects
    #[must_use]
    pub fn owner_reference(&self) -> OwnerReference {
        OwnerReference {
            api_version: self.api_version.clone(),
            kind: self.kind.clone(),
            name: self.name.clone(),
            uid: self.uid.clone(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }
}

/// Direction of data movement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Source,
    Destination,
}

impl Role {
    /// Metric label and `DIRECTION` value
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Source => "source",
            Role::Destination => "destination",
        }
    }

    /// Short form used in generated object names
    #[must_use]
    pub fn short_name(&self) -> &'static str {
        match self {
            Role::Source => "src",
            Role::Destination => "dst",
        }
    }
}

/// Options of a backup (replication source)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceOptions {
    /// PVC being backed up
    pub source_pvc_name: String,
    pub compression: Option<String>,
    pub parallelism: Option<i32>,
    pub retain: Option<RetentionPolicy>,
    pub actions: Option<SnapshotActions>,
    /// Run repository maintenance every this many days
    pub maintenance_interval_days: Option<i32>,
    /// Cron expression used to estimate the next maintenance run
    pub maintenance_cron_schedule: Option<String>,
}

impl SourceOptions {
    #[must_use]
    pub fn new(source_pvc_name: impl Into<String>) -> Self {
        Self {
            source_pvc_name: source_pvc_name.into(),
            ..Default::default()
        }
    }
}

/// Options of a restore (replication destination)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DestinationOptions {
    /// Restore into this existing PVC instead of allocating one
    pub destination_pvc: Option<String>,
    pub capacity: Option<Quantity>,
    pub storage_class_name: Option<String>,
    pub access_modes: Vec<String>,
    pub restore_as_of: Option<String>,
    pub shallow: Option<i32>,
    pub previous: Option<i32>,
    pub source_identity: Option<SourceIdentity>,
    pub enable_file_deletion: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RoleConfig {
    Source(SourceOptions),
    Destination(DestinationOptions),
}

impl RoleConfig {
    #[must_use]
    pub fn role(&self) -> Role {
        match self {
            RoleConfig::Source(_) => Role::Source,
            RoleConfig::Destination(_) => Role::Destination,
        }
    }
}

/// Everything one `synchronize` or `cleanup` call needs from the resource
#[derive(Debug, Clone, PartialEq)]
pub struct MoverConfig {
    pub owner: OwnerInfo,
    pub role: RoleConfig,
    /// Secret holding the repository URL, password and backend credentials
    pub repository_secret: String,
    /// PVC holding a filesystem repository, mounted at `/kopia`
    pub repository_pvc: Option<String>,
    pub cache: CacheSettings,
    pub custom_ca: CustomCaSpec,
    pub policy_config: PolicyConfigSpec,
    pub privileged: bool,
    pub paused: bool,
    /// Container image, the operator default when unset
    pub image: Option<String>,
    pub username: Option<String>,
    pub hostname: Option<String>,
    pub source_path_override: Option<String>,
    pub additional_args: Vec<String>,
    /// Repository connection comes from `KOPIA_MANUAL_CONFIG` instead of a URL
    pub manual_config: bool,
    pub pod_overrides: MoverPodOverrides,
}

impl MoverConfig {
    /// Configuration with every optional knob unset
    #[must_use]
    pub fn new(owner: OwnerInfo, role: RoleConfig, repository_secret: impl Into<String>) -> Self {
        Self {
            owner,
            role,
            repository_secret: repository_secret.into(),
            repository_pvc: None,
            cache: CacheSettings::default(),
            custom_ca: CustomCaSpec::default(),
            policy_config: PolicyConfigSpec::default(),
            privileged: false,
            paused: false,
            image: None,
            username: None,
            hostname: None,
            source_path_override: None,
            additional_args: Vec::new(),
            manual_config: false,
            pod_overrides: MoverPodOverrides::default(),
        }
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.role.role()
    }
}
