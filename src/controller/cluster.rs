//! # Cluster Access
//!
//! The Kubernetes operations the mover performs, behind [`ClusterOps`], and
//! the `kube`-backed implementation used in production.
//!
//! Jobs are written with server-side apply. An apply that the API server
//! rejects as invalid (422) on an existing Job means an immutable field
//! changed; the Job is deleted and the next reconcile creates it again.

use crate::constants::{
    CUSTOM_CA_FILE_NAME, FIELD_MANAGER, MOVER_CONTAINER_NAME, POLICY_CONFIG_FILE_NAME,
};
use crate::controller::handlers::{
    reference_from_parts, MountableReference, ReferenceValidator, SecretAccessor,
};
use crate::controller::maintenance::time_to_chrono;
use crate::crd::{CustomCaSpec, PolicyConfigSpec};
use anyhow::{Context, Result};
use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{
    Affinity, ConfigMap, NodeAffinity, NodeSelector, NodeSelectorRequirement, NodeSelectorTerm,
    PersistentVolumeClaim, Pod, Secret,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, ListParams, LogParams, Patch, PatchParams, PostParams};
use kube::Client;
use tracing::{debug, info, warn};

/// Result of applying the desired Job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Created,
    Updated,
    /// The old Job is being deleted; apply again on a later reconcile
    Recreating,
}

/// Kubernetes operations used by the mover
#[async_trait]
pub trait ClusterOps: Send + Sync {
    async fn get_job(&self, namespace: &str, name: &str) -> Result<Option<Job>>;

    /// Create or update the Job described by `desired`
    async fn apply_job(&self, desired: &Job) -> Result<ApplyOutcome>;

    /// Delete a Job and its pods; a missing Job is not an error
    async fn delete_job(&self, namespace: &str, name: &str) -> Result<()>;

    /// Logs of the mover container in the Job's most recent pod
    async fn job_logs(&self, namespace: &str, job_name: &str) -> Result<Option<String>>;

    async fn list_jobs(&self, namespace: &str, label_selector: &str) -> Result<Vec<Job>>;

    async fn get_pvc(&self, namespace: &str, name: &str) -> Result<Option<PersistentVolumeClaim>>;

    /// Create the PVC if it does not exist yet and return the stored object
    async fn ensure_pvc(&self, desired: &PersistentVolumeClaim) -> Result<PersistentVolumeClaim>;

    /// Node affinity pinning a pod next to the current user of `pvc_name`
    async fn affinity_for_volume(&self, namespace: &str, pvc_name: &str)
        -> Result<Option<Affinity>>;
}

/// [`ClusterOps`] backed by a `kube` client
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn object_ref(metadata: &ObjectMeta) -> Result<(&str, &str)> {
    let name = metadata.name.as_deref().context("object has no name")?;
    let namespace = metadata
        .namespace
        .as_deref()
        .context("object has no namespace")?;
    Ok((namespace, name))
}

#[async_trait]
impl ClusterOps for KubeCluster {
    async fn get_job(&self, namespace: &str, name: &str) -> Result<Option<Job>> {
        let api: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name)
            .await
            .with_context(|| format!("Failed to get Job {namespace}/{name}"))
    }

    async fn apply_job(&self, desired: &Job) -> Result<ApplyOutcome> {
        let (namespace, name) = object_ref(&desired.metadata)?;
        let api: Api<Job> = Api::namespaced(self.client.clone(), namespace);

        let existing = api
            .get_opt(name)
            .await
            .with_context(|| format!("Failed to get Job {namespace}/{name}"))?;
        if existing
            .as_ref()
            .is_some_and(|job| job.metadata.deletion_timestamp.is_some())
        {
            debug!(job = %name, "Job is terminating, waiting before recreating");
            return Ok(ApplyOutcome::Recreating);
        }

        let params = PatchParams::apply(FIELD_MANAGER).force();
        match api.patch(name, &params, &Patch::Apply(desired)).await {
            Ok(_) if existing.is_some() => Ok(ApplyOutcome::Updated),
            Ok(_) => {
                info!(job = %name, namespace = %namespace, "Created mover Job");
                Ok(ApplyOutcome::Created)
            }
            Err(kube::Error::Api(api_err)) if api_err.code == 422 && existing.is_some() => {
                warn!(
                    job = %name,
                    reason = %api_err.message,
                    "Job spec cannot be updated in place, deleting for recreation"
                );
                self.delete_job(namespace, name).await?;
                Ok(ApplyOutcome::Recreating)
            }
            Err(e) => Err(e).with_context(|| format!("Failed to apply Job {namespace}/{name}")),
        }
    }

    async fn delete_job(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::background()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(api_err)) if api_err.code == 404 => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to delete Job {namespace}/{name}")),
        }
    }

    async fn job_logs(&self, namespace: &str, job_name: &str) -> Result<Option<String>> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let list = pods
            .list(&ListParams::default().labels(&format!("job-name={job_name}")))
            .await
            .with_context(|| format!("Failed to list pods of Job {namespace}/{job_name}"))?;

        let latest = list
            .items
            .into_iter()
            .filter_map(|pod| {
                let created = pod
                    .metadata
                    .creation_timestamp
                    .as_ref()
                    .and_then(time_to_chrono);
                pod.metadata.name.clone().map(|name| (created, name))
            })
            .max_by(|a, b| a.0.cmp(&b.0));
        let Some((_, pod_name)) = latest else {
            return Ok(None);
        };

        let params = LogParams {
            container: Some(MOVER_CONTAINER_NAME.to_string()),
            ..Default::default()
        };
        let logs = pods
            .logs(&pod_name, &params)
            .await
            .with_context(|| format!("Failed to read logs of pod {namespace}/{pod_name}"))?;
        Ok(Some(logs))
    }

    async fn list_jobs(&self, namespace: &str, label_selector: &str) -> Result<Vec<Job>> {
        let api: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        let list = api
            .list(&ListParams::default().labels(label_selector))
            .await
            .with_context(|| format!("Failed to list Jobs in {namespace} ({label_selector})"))?;
        Ok(list.items)
    }

    async fn get_pvc(&self, namespace: &str, name: &str) -> Result<Option<PersistentVolumeClaim>> {
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name)
            .await
            .with_context(|| format!("Failed to get PVC {namespace}/{name}"))
    }

    async fn ensure_pvc(&self, desired: &PersistentVolumeClaim) -> Result<PersistentVolumeClaim> {
        let (namespace, name) = object_ref(&desired.metadata)?;
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);

        if let Some(existing) = api
            .get_opt(name)
            .await
            .with_context(|| format!("Failed to get PVC {namespace}/{name}"))?
        {
            return Ok(existing);
        }

        let params = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        let created = api
            .create(&params, desired)
            .await
            .with_context(|| format!("Failed to create PVC {namespace}/{name}"))?;
        info!(pvc = %name, namespace = %namespace, "Created cache PVC");
        Ok(created)
    }

    async fn affinity_for_volume(
        &self,
        namespace: &str,
        pvc_name: &str,
    ) -> Result<Option<Affinity>> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let list = pods
            .list(&ListParams::default())
            .await
            .with_context(|| format!("Failed to list pods in {namespace}"))?;

        let node = list.items.iter().find_map(|pod| {
            let spec = pod.spec.as_ref()?;
            let uses_claim = spec.volumes.as_ref()?.iter().any(|v| {
                v.persistent_volume_claim
                    .as_ref()
                    .is_some_and(|c| c.claim_name == pvc_name)
            });
            let running = pod
                .status
                .as_ref()
                .and_then(|s| s.phase.as_deref())
                .is_some_and(|phase| phase == "Running");
            if uses_claim && running {
                spec.node_name.clone()
            } else {
                None
            }
        });
        Ok(node.map(|n| node_affinity(&n)))
    }
}

/// Required node affinity for a single node
#[must_use]
pub fn node_affinity(node_name: &str) -> Affinity {
    Affinity {
        node_affinity: Some(NodeAffinity {
            required_during_scheduling_ignored_during_execution: Some(NodeSelector {
                node_selector_terms: vec![NodeSelectorTerm {
                    match_expressions: Some(vec![NodeSelectorRequirement {
                        key: "kubernetes.io/hostname".to_string(),
                        operator: "In".to_string(),
                        values: Some(vec![node_name.to_string()]),
                    }]),
                    ..Default::default()
                }],
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Keys from `required` that `secret` does not carry
#[must_use]
pub fn missing_keys<'a>(secret: &Secret, required: &[&'a str]) -> Vec<&'a str> {
    required
        .iter()
        .copied()
        .filter(|key| {
            !secret.data.as_ref().is_some_and(|d| d.contains_key(*key))
                && !secret
                    .string_data
                    .as_ref()
                    .is_some_and(|d| d.contains_key(*key))
        })
        .collect()
}

#[async_trait]
impl SecretAccessor for KubeCluster {
    async fn get_and_validate_secret(
        &self,
        namespace: &str,
        name: &str,
        required_keys: &[&str],
    ) -> Result<Secret> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = api
            .get_opt(name)
            .await
            .with_context(|| format!("Failed to get Secret {namespace}/{name}"))?
            .with_context(|| format!("Secret {namespace}/{name} not found"))?;

        let missing = missing_keys(&secret, required_keys);
        if !missing.is_empty() {
            anyhow::bail!(
                "Secret {namespace}/{name} is missing required keys: {}",
                missing.join(", ")
            );
        }
        Ok(secret)
    }
}

impl KubeCluster {
    async fn check_reference(
        &self,
        namespace: &str,
        reference: &MountableReference,
    ) -> Result<()> {
        match reference {
            MountableReference::Secret { name, key } => {
                self.get_and_validate_secret(namespace, name, &[key.as_str()])
                    .await?;
            }
            MountableReference::ConfigMap { name, key } => {
                let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
                let config_map = api
                    .get_opt(name)
                    .await
                    .with_context(|| format!("Failed to get ConfigMap {namespace}/{name}"))?
                    .with_context(|| format!("ConfigMap {namespace}/{name} not found"))?;
                let has_key = config_map.data.as_ref().is_some_and(|d| d.contains_key(key))
                    || config_map
                        .binary_data
                        .as_ref()
                        .is_some_and(|d| d.contains_key(key));
                if !has_key {
                    anyhow::bail!("ConfigMap {namespace}/{name} has no key {key}");
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ReferenceValidator for KubeCluster {
    async fn validate_custom_ca(
        &self,
        namespace: &str,
        spec: &CustomCaSpec,
    ) -> Result<Option<MountableReference>> {
        let reference = reference_from_parts(
            spec.secret_name.as_deref(),
            spec.config_map_name.as_deref(),
            spec.key.as_deref(),
            CUSTOM_CA_FILE_NAME,
        )
        .context("Invalid custom CA reference")?;
        if let Some(reference) = &reference {
            self.check_reference(namespace, reference).await?;
        }
        Ok(reference)
    }

    async fn validate_policy_config(
        &self,
        namespace: &str,
        spec: &PolicyConfigSpec,
    ) -> Result<Option<MountableReference>> {
        let reference = reference_from_parts(
            spec.secret_name.as_deref(),
            spec.config_map_name.as_deref(),
            spec.key.as_deref(),
            POLICY_CONFIG_FILE_NAME,
        )
        .context("Invalid policy configuration reference")?;
        if let Some(reference) = &reference {
            self.check_reference(namespace, reference).await?;
        }
        Ok(reference)
    }
}
