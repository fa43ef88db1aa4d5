//! # Collaborators
//!
//! Traits for the operator components the mover drives but does not own.
//!
//! The volume handler knows how a copy method (snapshot, clone, direct) turns
//! into PVCs and VolumeSnapshots; the mover only asks it for volumes. The
//! other traits cover ServiceAccount reconciliation, cleanup of labelled
//! objects and validation of user-supplied references.

use crate::controller::mover::OwnerInfo;
use crate::crd::{CustomCaSpec, PolicyConfigSpec};
use anyhow::Result;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, KeyToPath, PersistentVolumeClaim, Secret, SecretVolumeSource,
    ServiceAccount, TypedLocalObjectReference, Volume,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

/// Raised by the volume handler while waiting for the user to acknowledge a
/// manual copy trigger
///
/// The mover records it in status and keeps polling instead of erroring.
#[derive(Debug, thiserror::Error)]
#[error("timed out waiting for copy trigger: {0}")]
pub struct CopyTriggerTimeout(pub String);

/// Destination PVC the mover asks the volume handler to allocate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NewVolumeRequest<'a> {
    pub name: &'a str,
    /// Size of the volume; the handler may fall back to the source size
    pub capacity: Option<&'a Quantity>,
    pub storage_class_name: Option<&'a str>,
    pub access_modes: &'a [String],
}

/// Provisions the data volumes for a mover
///
/// `Ok(None)` means the volume is not ready yet.
#[async_trait]
pub trait VolumeHandler: Send + Sync {
    /// Point-in-time copy of `source_pvc` named `data_name` (source role)
    async fn ensure_pvc_from_source(
        &self,
        source_pvc: &PersistentVolumeClaim,
        data_name: &str,
        cleanup: bool,
    ) -> Result<Option<PersistentVolumeClaim>>;

    /// Fresh destination PVC sized and classed as requested
    async fn ensure_new_pvc(
        &self,
        request: &NewVolumeRequest<'_>,
    ) -> Result<Option<PersistentVolumeClaim>>;

    /// User-provided destination PVC, never cleaned up
    async fn use_provided_pvc(&self, pvc_name: &str) -> Result<Option<PersistentVolumeClaim>>;

    /// Capture the restored data as the destination's latest image
    async fn ensure_image(
        &self,
        pvc: &PersistentVolumeClaim,
    ) -> Result<Option<TypedLocalObjectReference>>;

    /// Drop the snapshot-reuse annotation from a destination PVC
    async fn remove_snapshot_annotation(&self, pvc_name: &str) -> Result<()>;

    fn is_copy_method_direct(&self) -> bool;

    /// Access modes configured on the replication resource
    fn access_modes(&self) -> Vec<String>;
}

/// Reconciles the ServiceAccount the mover pod runs as
#[async_trait]
pub trait ServiceAccountHandler: Send + Sync {
    /// Returns `None` while the account is not ready
    async fn reconcile(&self) -> Result<Option<ServiceAccount>>;
}

/// Object kinds removed by the cleanup pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupKind {
    Job,
    PersistentVolumeClaim,
    VolumeSnapshot,
}

/// Deletes the objects an owner labelled for cleanup
#[async_trait]
pub trait ObjectCleaner: Send + Sync {
    async fn cleanup_objects(&self, owner: &OwnerInfo, kinds: &[CleanupKind]) -> Result<()>;
}

/// Reads secrets and checks for required keys
#[async_trait]
pub trait SecretAccessor: Send + Sync {
    /// Fetch `name` and fail unless every key in `required_keys` is present
    async fn get_and_validate_secret(
        &self,
        namespace: &str,
        name: &str,
        required_keys: &[&str],
    ) -> Result<Secret>;
}

/// Validates custom CA and policy configuration references
#[async_trait]
pub trait ReferenceValidator: Send + Sync {
    /// `Ok(None)` when no CA is configured
    async fn validate_custom_ca(
        &self,
        namespace: &str,
        spec: &CustomCaSpec,
    ) -> Result<Option<MountableReference>>;

    /// `Ok(None)` when no policy configuration is configured
    async fn validate_policy_config(
        &self,
        namespace: &str,
        spec: &PolicyConfigSpec,
    ) -> Result<Option<MountableReference>>;
}

/// A validated key in a Secret or ConfigMap that can be mounted as a file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountableReference {
    Secret { name: String, key: String },
    ConfigMap { name: String, key: String },
}

impl MountableReference {
    /// Volume exposing the referenced key as `file_name`
    #[must_use]
    pub fn volume_source(&self, volume_name: &str, file_name: &str) -> Volume {
        let item = |key: &str| {
            vec![KeyToPath {
                key: key.to_string(),
                path: file_name.to_string(),
                mode: None,
            }]
        };
        match self {
            Self::Secret { name, key } => Volume {
                name: volume_name.to_string(),
                secret: Some(SecretVolumeSource {
                    secret_name: Some(name.clone()),
                    items: Some(item(key)),
                    ..Default::default()
                }),
                ..Default::default()
            },
            Self::ConfigMap { name, key } => Volume {
                name: volume_name.to_string(),
                config_map: Some(ConfigMapVolumeSource {
                    name: name.clone(),
                    items: Some(item(key)),
                    ..Default::default()
                }),
                ..Default::default()
            },
        }
    }
}

/// Build a [`MountableReference`] from the Secret/ConfigMap/key triple both
/// reference specs share
///
/// Returns `Ok(None)` when neither source is named and an error when both are,
/// or when the key is missing.
pub fn reference_from_parts(
    secret_name: Option<&str>,
    config_map_name: Option<&str>,
    key: Option<&str>,
    default_key: &str,
) -> Result<Option<MountableReference>> {
    let secret_name = secret_name.filter(|s| !s.is_empty());
    let config_map_name = config_map_name.filter(|s| !s.is_empty());
    let key = key.filter(|k| !k.is_empty()).unwrap_or(default_key).to_string();

    match (secret_name, config_map_name) {
        (None, None) => Ok(None),
        (Some(_), Some(_)) => Err(anyhow::anyhow!(
            "only one of secretName and configMapName may be set"
        )),
        (Some(name), None) => Ok(Some(MountableReference::Secret {
            name: name.to_string(),
            key,
        })),
        (None, Some(name)) => Ok(Some(MountableReference::ConfigMap {
            name: name.to_string(),
            key,
        })),
    }
}
