//! # Mover Job
//!
//! Naming and construction of the mover Job and the objects around it.

use crate::constants::{
    CACHE_MOUNT_PATH, CLEANUP_LABEL, CUSTOM_CA_FILE_NAME, CUSTOM_CA_MOUNT_PATH, DATA_MOUNT_PATH,
    MAINTENANCE_LABEL, MAX_JOB_NAME_LENGTH, MOVER_CONTAINER_NAME, MOVER_ENTRY_POINT,
    OWNER_NAME_LABEL, POLICY_CONFIG_FILE_NAME, POLICY_CONFIG_MOUNT_PATH,
    REPOSITORY_PVC_MOUNT_PATH,
};
use crate::controller::handlers::MountableReference;
use crate::controller::mover::config::{MoverConfig, OwnerInfo, Role};
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Affinity, Capabilities, Container, EmptyDirVolumeSource, EnvVar,
    PersistentVolumeClaim, PersistentVolumeClaimSpec, PersistentVolumeClaimVolumeSource, PodSpec,
    PodTemplateSpec, SecurityContext, Volume, VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

const HASH_SUFFIX_LENGTH: usize = 10;

/// Capabilities a privileged mover needs to restore ownership and permissions
const PRIVILEGED_CAPABILITIES: [&str; 5] = ["CHOWN", "DAC_OVERRIDE", "FOWNER", "SETGID", "SETUID"];

/// Shorten `name` to `max_len`, replacing the tail with a hash of the whole name
///
/// Names that already fit are returned unchanged.
#[must_use]
pub fn shorten_name(name: &str, max_len: usize) -> String {
    if name.len() <= max_len {
        return name.to_string();
    }
    let digest = format!("{:x}", Sha256::digest(name.as_bytes()));
    let keep = max_len.saturating_sub(HASH_SUFFIX_LENGTH + 1);
    let prefix: String = name.chars().take(keep).collect();
    format!(
        "{}-{}",
        prefix.trim_end_matches(['-', '.']),
        &digest[..HASH_SUFFIX_LENGTH]
    )
}

/// Deterministic name of the mover Job for an owner
#[must_use]
pub fn job_name(owner_name: &str, role: Role) -> String {
    shorten_name(
        &format!("volsync-kopia-{}-{owner_name}", role.short_name()),
        MAX_JOB_NAME_LENGTH,
    )
}

/// Name of the data PVC the mover allocates for an owner
#[must_use]
pub fn data_pvc_name(owner_name: &str, role: Role) -> String {
    shorten_name(
        &format!("volsync-{owner_name}-{}", role.short_name()),
        MAX_JOB_NAME_LENGTH,
    )
}

/// Name of the cache PVC for an owner
#[must_use]
pub fn cache_pvc_name(owner_name: &str, role: Role) -> String {
    shorten_name(
        &format!("volsync-kopia-{owner_name}-{}-cache", role.short_name()),
        MAX_JOB_NAME_LENGTH,
    )
}

/// Labels every object created for `owner` carries
#[must_use]
pub fn owner_labels(owner: &OwnerInfo) -> BTreeMap<String, String> {
    BTreeMap::from([
        (CLEANUP_LABEL.to_string(), owner.uid.clone()),
        (
            OWNER_NAME_LABEL.to_string(),
            shorten_name(&owner.name, MAX_JOB_NAME_LENGTH),
        ),
    ])
}

/// Label selector matching the maintenance Jobs of `owner`
#[must_use]
pub fn maintenance_selector(owner: &OwnerInfo) -> String {
    format!(
        "{MAINTENANCE_LABEL}=true,{OWNER_NAME_LABEL}={}",
        shorten_name(&owner.name, MAX_JOB_NAME_LENGTH)
    )
}

/// Whether an existing mover Job was created to run maintenance
#[must_use]
pub fn runs_maintenance(job: &Job) -> bool {
    job.metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(MAINTENANCE_LABEL))
        .is_some_and(|value| value == "true")
}

/// Cache volume chosen for the Job
#[derive(Debug, Clone, PartialEq)]
pub enum CacheVolume {
    Pvc(String),
    EmptyDir(Quantity),
}

/// Resolved inputs for [`build_job`]
#[derive(Debug, Clone)]
pub struct JobInputs<'a> {
    pub config: &'a MoverConfig,
    pub name: String,
    pub image: String,
    pub service_account: String,
    pub env: Vec<EnvVar>,
    pub data_pvc: String,
    pub cache: CacheVolume,
    pub custom_ca: Option<&'a MountableReference>,
    pub policy_config: Option<&'a MountableReference>,
    pub credentials: Option<(Volume, VolumeMount)>,
    pub affinity: Option<Affinity>,
    pub backoff_limit: i32,
    pub run_maintenance: bool,
}

fn mount(name: &str, path: &str, read_only: bool) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        read_only: read_only.then_some(true),
        ..Default::default()
    }
}

fn pvc_volume(name: &str, claim: &str) -> Volume {
    Volume {
        name: name.to_string(),
        persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
            claim_name: claim.to_string(),
            read_only: None,
        }),
        ..Default::default()
    }
}

fn container_security_context(privileged: bool) -> SecurityContext {
    if privileged {
        SecurityContext {
            run_as_user: Some(0),
            capabilities: Some(Capabilities {
                add: Some(PRIVILEGED_CAPABILITIES.iter().map(|c| (*c).to_string()).collect()),
                drop: None,
            }),
            ..Default::default()
        }
    } else {
        SecurityContext {
            allow_privilege_escalation: Some(false),
            capabilities: Some(Capabilities {
                add: None,
                drop: Some(vec!["ALL".to_string()]),
            }),
            ..Default::default()
        }
    }
}

/// Build the desired mover Job
#[must_use]
pub fn build_job(inputs: JobInputs<'_>) -> Job {
    let config = inputs.config;
    let role = config.role();
    let overrides = &config.pod_overrides;

    let mut volumes = vec![pvc_volume("data", &inputs.data_pvc)];
    let mut mounts = vec![mount("data", DATA_MOUNT_PATH, role == Role::Source)];

    volumes.push(match &inputs.cache {
        CacheVolume::Pvc(claim) => pvc_volume("cache", claim),
        CacheVolume::EmptyDir(limit) => Volume {
            name: "cache".to_string(),
            empty_dir: Some(EmptyDirVolumeSource {
                size_limit: Some(limit.clone()),
                ..Default::default()
            }),
            ..Default::default()
        },
    });
    mounts.push(mount("cache", CACHE_MOUNT_PATH, false));

    if let Some(claim) = config.repository_pvc.as_deref() {
        volumes.push(pvc_volume("repository", claim));
        mounts.push(mount("repository", REPOSITORY_PVC_MOUNT_PATH, false));
    }
    if let Some(reference) = inputs.custom_ca {
        volumes.push(reference.volume_source("custom-ca", CUSTOM_CA_FILE_NAME));
        mounts.push(mount("custom-ca", CUSTOM_CA_MOUNT_PATH, true));
    }
    if let Some(reference) = inputs.policy_config {
        volumes.push(reference.volume_source("policy-config", POLICY_CONFIG_FILE_NAME));
        mounts.push(mount("policy-config", POLICY_CONFIG_MOUNT_PATH, true));
    }
    if let Some((volume, volume_mount)) = inputs.credentials {
        volumes.push(volume);
        mounts.push(volume_mount);
    }

    let mut labels = owner_labels(&config.owner);
    if inputs.run_maintenance {
        labels.insert(MAINTENANCE_LABEL.to_string(), "true".to_string());
    }
    let mut pod_labels = overrides.labels.clone();
    pod_labels.extend(labels.clone());

    let container = Container {
        name: MOVER_CONTAINER_NAME.to_string(),
        image: Some(inputs.image),
        command: Some(vec![MOVER_ENTRY_POINT.to_string()]),
        args: Some(vec![role.as_str().to_string()]),
        env: Some(inputs.env),
        volume_mounts: Some(mounts),
        resources: overrides.resources.clone(),
        security_context: Some(container_security_context(config.privileged)),
        ..Default::default()
    };

    let service_account = overrides
        .service_account_name
        .clone()
        .filter(|sa| !sa.is_empty())
        .unwrap_or(inputs.service_account);

    Job {
        metadata: ObjectMeta {
            name: Some(inputs.name),
            namespace: Some(config.owner.namespace.clone()),
            labels: Some(labels),
            owner_references: Some(vec![config.owner.owner_reference()]),
            ..Default::default()
        },
        spec: Some(JobSpec {
            backoff_limit: Some(inputs.backoff_limit),
            parallelism: Some(1),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(pod_labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    restart_policy: Some("OnFailure".to_string()),
                    service_account_name: Some(service_account),
                    containers: vec![container],
                    volumes: Some(volumes),
                    affinity: inputs.affinity,
                    security_context: overrides.security_context.clone(),
                    node_selector: overrides.node_selector.clone(),
                    tolerations: overrides.tolerations.clone(),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    }
}

/// Desired cache PVC
#[must_use]
pub fn build_cache_pvc(
    owner: &OwnerInfo,
    name: &str,
    capacity: &Quantity,
    storage_class_name: Option<&str>,
    access_modes: Vec<String>,
) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(owner.namespace.clone()),
            labels: Some(owner_labels(owner)),
            owner_references: Some(vec![owner.owner_reference()]),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(access_modes),
            storage_class_name: storage_class_name
                .filter(|sc| !sc.is_empty())
                .map(str::to_string),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([("storage".to_string(), capacity.clone())])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        status: None,
    }
}
