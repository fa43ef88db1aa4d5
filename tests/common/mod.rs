//! Common test utilities
//!
//! In-memory stand-ins for the cluster and the operator components the mover
//! drives. Each integration test file compiles this module separately, so
//! not every helper is used everywhere.

#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use k8s_openapi::api::batch::v1::{Job, JobStatus};
use k8s_openapi::api::core::v1::{
    Affinity, PersistentVolumeClaim, PersistentVolumeClaimSpec, PersistentVolumeClaimStatus,
    Secret, ServiceAccount, TypedLocalObjectReference,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kopia_mover::config::MoverSettings;
use kopia_mover::controller::cluster::{missing_keys, ApplyOutcome, ClusterOps};
use kopia_mover::controller::discovery::LogScrapingParser;
use kopia_mover::controller::handlers::{
    reference_from_parts, CleanupKind, CopyTriggerTimeout, MountableReference, NewVolumeRequest,
    ObjectCleaner, ReferenceValidator, SecretAccessor, ServiceAccountHandler, VolumeHandler,
};
use kopia_mover::controller::mover::{
    DestinationOptions, Mover, MoverConfig, MoverDeps, MoverStatuses, OwnerInfo, RoleConfig,
    SourceOptions,
};
use kopia_mover::crd::{CustomCaSpec, PolicyConfigSpec};
use kopia_mover::observability::{init_tracing, MoverMetrics};
use prometheus::Registry;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, Once};

static TRACING: Once = Once::new();

/// Install a text subscriber once per test binary
pub fn init_test_tracing() {
    TRACING.call_once(|| {
        let settings = MoverSettings {
            log_format: "text".to_string(),
            log_level: "DEBUG".to_string(),
            ..MoverSettings::default()
        };
        let _ = init_tracing(&settings);
    });
}

type Key = (String, String);

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

#[derive(Default)]
struct ClusterState {
    jobs: BTreeMap<Key, Job>,
    pvcs: BTreeMap<Key, PersistentVolumeClaim>,
    logs: BTreeMap<Key, String>,
    history: Vec<Job>,
    created_pvcs: Vec<String>,
    deleted_jobs: Vec<String>,
    next_uid: u64,
}

/// In-memory [`ClusterOps`]
///
/// Applying a Job that does not exist creates it with a fresh UID; applying
/// an existing Job keeps its UID and status.
#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<ClusterState>,
}

impl FakeCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert_pvc(&self, pvc: PersistentVolumeClaim) {
        let namespace = pvc.metadata.namespace.clone().unwrap_or_default();
        let name = pvc.metadata.name.clone().unwrap_or_default();
        self.state
            .lock()
            .unwrap()
            .pvcs
            .insert(key(&namespace, &name), pvc);
    }

    pub fn job(&self, namespace: &str, name: &str) -> Option<Job> {
        self.state
            .lock()
            .unwrap()
            .jobs
            .get(&key(namespace, name))
            .cloned()
    }

    pub fn job_uid(&self, namespace: &str, name: &str) -> Option<String> {
        self.job(namespace, name).and_then(|job| job.metadata.uid)
    }

    pub fn set_job_status(&self, namespace: &str, name: &str, status: JobStatus) {
        if let Some(job) = self.state.lock().unwrap().jobs.get_mut(&key(namespace, name)) {
            job.status = Some(status);
        }
    }

    pub fn set_logs(&self, namespace: &str, job_name: &str, logs: &str) {
        self.state
            .lock()
            .unwrap()
            .logs
            .insert(key(namespace, job_name), logs.to_string());
    }

    /// Jobs returned by `list_jobs`
    pub fn set_history(&self, jobs: Vec<Job>) {
        self.state.lock().unwrap().history = jobs;
    }

    pub fn job_count(&self) -> usize {
        self.state.lock().unwrap().jobs.len()
    }

    pub fn created_pvcs(&self) -> Vec<String> {
        self.state.lock().unwrap().created_pvcs.clone()
    }

    pub fn deleted_jobs(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted_jobs.clone()
    }
}

#[async_trait]
impl ClusterOps for FakeCluster {
    async fn get_job(&self, namespace: &str, name: &str) -> Result<Option<Job>> {
        Ok(self.job(namespace, name))
    }

    async fn apply_job(&self, desired: &Job) -> Result<ApplyOutcome> {
        let namespace = desired.metadata.namespace.clone().unwrap_or_default();
        let name = desired.metadata.name.clone().unwrap_or_default();
        let mut state = self.state.lock().unwrap();

        let (uid, status, outcome) = match state.jobs.get(&key(&namespace, &name)) {
            Some(existing) => (
                existing.metadata.uid.clone(),
                existing.status.clone(),
                ApplyOutcome::Updated,
            ),
            None => {
                state.next_uid += 1;
                (
                    Some(format!("job-uid-{}", state.next_uid)),
                    None,
                    ApplyOutcome::Created,
                )
            }
        };

        let mut stored = desired.clone();
        stored.metadata.uid = uid;
        stored.status = status;
        state.jobs.insert(key(&namespace, &name), stored);
        Ok(outcome)
    }

    async fn delete_job(&self, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.jobs.remove(&key(namespace, name)).is_some() {
            state.deleted_jobs.push(name.to_string());
        }
        Ok(())
    }

    async fn job_logs(&self, namespace: &str, job_name: &str) -> Result<Option<String>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .logs
            .get(&key(namespace, job_name))
            .cloned())
    }

    async fn list_jobs(&self, _namespace: &str, _label_selector: &str) -> Result<Vec<Job>> {
        Ok(self.state.lock().unwrap().history.clone())
    }

    async fn get_pvc(&self, namespace: &str, name: &str) -> Result<Option<PersistentVolumeClaim>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .pvcs
            .get(&key(namespace, name))
            .cloned())
    }

    async fn ensure_pvc(&self, desired: &PersistentVolumeClaim) -> Result<PersistentVolumeClaim> {
        let namespace = desired.metadata.namespace.clone().unwrap_or_default();
        let name = desired.metadata.name.clone().unwrap_or_default();
        let mut state = self.state.lock().unwrap();
        if let Some(existing) = state.pvcs.get(&key(&namespace, &name)) {
            return Ok(existing.clone());
        }
        state.created_pvcs.push(name.clone());
        state.pvcs.insert(key(&namespace, &name), desired.clone());
        Ok(desired.clone())
    }

    async fn affinity_for_volume(
        &self,
        _namespace: &str,
        _pvc_name: &str,
    ) -> Result<Option<Affinity>> {
        Ok(None)
    }
}

/// PVC with the given access mode in phase `phase`
pub fn pvc(namespace: &str, name: &str, phase: &str) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            ..Default::default()
        }),
        status: Some(PersistentVolumeClaimStatus {
            phase: Some(phase.to_string()),
            ..Default::default()
        }),
    }
}

/// Owned copy of a [`NewVolumeRequest`]
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedVolumeRequest {
    pub name: String,
    pub capacity: Option<Quantity>,
    pub storage_class_name: Option<String>,
    pub access_modes: Vec<String>,
}

/// Volume handler that hands back PVCs named after the request
#[derive(Default)]
pub struct FakeVolumes {
    pub new_volumes: Mutex<Vec<RecordedVolumeRequest>>,
    pub copy_trigger_pending: Mutex<bool>,
    pub image: Mutex<Option<TypedLocalObjectReference>>,
    pub annotations_removed: Mutex<Vec<String>>,
    pub requested: Mutex<Vec<String>>,
}

impl FakeVolumes {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_image(name: &str) -> Arc<Self> {
        let volumes = Self::default();
        *volumes.image.lock().unwrap() = Some(TypedLocalObjectReference {
            api_group: Some("snapshot.storage.k8s.io".to_string()),
            kind: "VolumeSnapshot".to_string(),
            name: name.to_string(),
        });
        Arc::new(volumes)
    }

    fn volume(&self, name: &str) -> Result<Option<PersistentVolumeClaim>> {
        if *self.copy_trigger_pending.lock().unwrap() {
            return Err(anyhow::Error::new(CopyTriggerTimeout(
                "waiting for copy-trigger annotation".to_string(),
            )));
        }
        self.requested.lock().unwrap().push(name.to_string());
        Ok(Some(pvc("prod", name, "Bound")))
    }
}

#[async_trait]
impl VolumeHandler for FakeVolumes {
    async fn ensure_pvc_from_source(
        &self,
        _source_pvc: &PersistentVolumeClaim,
        data_name: &str,
        _cleanup: bool,
    ) -> Result<Option<PersistentVolumeClaim>> {
        self.volume(data_name)
    }

    async fn ensure_new_pvc(
        &self,
        request: &NewVolumeRequest<'_>,
    ) -> Result<Option<PersistentVolumeClaim>> {
        self.new_volumes.lock().unwrap().push(RecordedVolumeRequest {
            name: request.name.to_string(),
            capacity: request.capacity.cloned(),
            storage_class_name: request.storage_class_name.map(str::to_string),
            access_modes: request.access_modes.to_vec(),
        });
        self.volume(request.name)
    }

    async fn use_provided_pvc(&self, pvc_name: &str) -> Result<Option<PersistentVolumeClaim>> {
        self.volume(pvc_name)
    }

    async fn ensure_image(
        &self,
        _pvc: &PersistentVolumeClaim,
    ) -> Result<Option<TypedLocalObjectReference>> {
        Ok(self.image.lock().unwrap().clone())
    }

    async fn remove_snapshot_annotation(&self, pvc_name: &str) -> Result<()> {
        self.annotations_removed
            .lock()
            .unwrap()
            .push(pvc_name.to_string());
        Ok(())
    }

    fn is_copy_method_direct(&self) -> bool {
        false
    }

    fn access_modes(&self) -> Vec<String> {
        Vec::new()
    }
}

pub struct FakeServiceAccounts;

#[async_trait]
impl ServiceAccountHandler for FakeServiceAccounts {
    async fn reconcile(&self) -> Result<Option<ServiceAccount>> {
        Ok(Some(ServiceAccount {
            metadata: ObjectMeta {
                name: Some("volsync-src-webapp".to_string()),
                ..Default::default()
            },
            ..Default::default()
        }))
    }
}

/// Records every cleanup request
#[derive(Default)]
pub struct FakeCleaner {
    pub calls: Mutex<Vec<(String, Vec<CleanupKind>)>>,
}

#[async_trait]
impl ObjectCleaner for FakeCleaner {
    async fn cleanup_objects(&self, owner: &OwnerInfo, kinds: &[CleanupKind]) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push((owner.uid.clone(), kinds.to_vec()));
        Ok(())
    }
}

/// Secrets held in memory, validated with the production key check
#[derive(Default)]
pub struct FakeSecrets {
    secrets: Mutex<BTreeMap<String, Secret>>,
}

impl FakeSecrets {
    pub fn with(name: &str, entries: &[(&str, &str)]) -> Arc<Self> {
        let secrets = Self::default();
        secrets.insert(name, entries);
        Arc::new(secrets)
    }

    pub fn insert(&self, name: &str, entries: &[(&str, &str)]) {
        let data = entries
            .iter()
            .map(|(k, v)| (k.to_string(), ByteString(v.as_bytes().to_vec())))
            .collect();
        self.secrets.lock().unwrap().insert(
            name.to_string(),
            Secret {
                metadata: ObjectMeta {
                    name: Some(name.to_string()),
                    ..Default::default()
                },
                data: Some(data),
                ..Default::default()
            },
        );
    }
}

#[async_trait]
impl SecretAccessor for FakeSecrets {
    async fn get_and_validate_secret(
        &self,
        _namespace: &str,
        name: &str,
        required_keys: &[&str],
    ) -> Result<Secret> {
        let secret = self
            .secrets
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow!("secret {name} not found"))?;
        let missing = missing_keys(&secret, required_keys);
        if !missing.is_empty() {
            return Err(anyhow!("missing keys: {}", missing.join(", ")));
        }
        Ok(secret)
    }
}

/// Accepts any well-formed reference without looking it up
pub struct FakeReferences;

#[async_trait]
impl ReferenceValidator for FakeReferences {
    async fn validate_custom_ca(
        &self,
        _namespace: &str,
        spec: &CustomCaSpec,
    ) -> Result<Option<MountableReference>> {
        reference_from_parts(
            spec.secret_name.as_deref(),
            spec.config_map_name.as_deref(),
            spec.key.as_deref(),
            "ca.crt",
        )
    }

    async fn validate_policy_config(
        &self,
        _namespace: &str,
        spec: &PolicyConfigSpec,
    ) -> Result<Option<MountableReference>> {
        reference_from_parts(
            spec.secret_name.as_deref(),
            spec.config_map_name.as_deref(),
            spec.key.as_deref(),
            "repository.config",
        )
    }
}

/// Fakes wired into a [`MoverDeps`]
pub struct Harness {
    pub cluster: Arc<FakeCluster>,
    pub volumes: Arc<FakeVolumes>,
    pub secrets: Arc<FakeSecrets>,
    pub cleaner: Arc<FakeCleaner>,
    pub metrics: MoverMetrics,
    pub settings: MoverSettings,
}

impl Harness {
    /// Harness with a valid `kopia-repo` secret
    pub fn new() -> Self {
        Self::with_volumes(FakeVolumes::new())
    }

    pub fn with_volumes(volumes: Arc<FakeVolumes>) -> Self {
        init_test_tracing();
        Self {
            cluster: FakeCluster::new(),
            volumes,
            secrets: FakeSecrets::with(
                "kopia-repo",
                &[
                    ("KOPIA_PASSWORD", "hunter2"),
                    ("KOPIA_REPOSITORY", "s3://bucket/prefix"),
                ],
            ),
            cleaner: Arc::new(FakeCleaner::default()),
            metrics: MoverMetrics::new(&Registry::new()).unwrap(),
            settings: MoverSettings::default(),
        }
    }

    pub fn deps(&self) -> MoverDeps {
        MoverDeps {
            settings: self.settings.clone().shared(),
            cluster: Arc::clone(&self.cluster) as Arc<dyn ClusterOps>,
            secrets: Arc::clone(&self.secrets) as Arc<dyn SecretAccessor>,
            volumes: Arc::clone(&self.volumes) as Arc<dyn VolumeHandler>,
            service_accounts: Arc::new(FakeServiceAccounts),
            cleaner: Arc::clone(&self.cleaner) as Arc<dyn ObjectCleaner>,
            references: Arc::new(FakeReferences),
            discovery: Arc::new(LogScrapingParser),
            metrics: self.metrics.clone(),
        }
    }

    pub fn mover(&self, config: MoverConfig) -> Mover {
        self.mover_with_status(config, MoverStatuses::default())
    }

    pub fn mover_with_status(&self, config: MoverConfig, status: MoverStatuses) -> Mover {
        Mover::new(config, self.deps(), status)
    }
}

pub fn owner(name: &str) -> OwnerInfo {
    OwnerInfo {
        api_version: "volsync.backube/v1alpha1".to_string(),
        kind: "ReplicationSource".to_string(),
        name: name.to_string(),
        namespace: "prod".to_string(),
        uid: format!("{name}-uid"),
    }
}

/// Backup of `prod/webapp-data`; the source PVC is added to the cluster
pub fn source_config(harness: &Harness) -> MoverConfig {
    harness.cluster.insert_pvc(pvc("prod", "webapp-data", "Bound"));
    MoverConfig::new(
        owner("webapp"),
        RoleConfig::Source(SourceOptions::new("webapp-data")),
        "kopia-repo",
    )
}

pub fn destination_config(options: DestinationOptions) -> MoverConfig {
    let mut owner = owner("webapp-restore");
    owner.kind = "ReplicationDestination".to_string();
    MoverConfig::new(owner, RoleConfig::Destination(options), "kopia-repo")
}

pub fn succeeded() -> JobStatus {
    JobStatus {
        succeeded: Some(1),
        ..Default::default()
    }
}

pub fn failed(count: i32) -> JobStatus {
    JobStatus {
        failed: Some(count),
        ..Default::default()
    }
}

/// Value of a literal env var on the mover container
pub fn env_value(job: &Job, name: &str) -> Option<String> {
    job.spec
        .as_ref()?
        .template
        .spec
        .as_ref()?
        .containers
        .first()?
        .env
        .as_ref()?
        .iter()
        .find(|var| var.name == name)?
        .value
        .clone()
}
