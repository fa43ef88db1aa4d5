//! # Kopia Mover
//!
//! Drives one replication resource through a Kopia backup or restore.
//!
//! Each `synchronize` call does one step of work and returns; progress comes
//! from the controller calling again. A call:
//!
//! 1. returns `Complete` straight away when the resource is paused
//! 2. prepares the data volume, cache, ServiceAccount, repository secret and
//!    optional references (any failure is an `Err`, retried by the controller)
//! 3. applies the desired Job
//! 4. acts on the Job's state: waits, resets an exhausted Job, or records the
//!    result and reports completion
//!
//! Status changes are collected in [`MoverStatuses`]; the caller persists them.

mod config;
mod error;
mod job;
mod state;

pub use config::{DestinationOptions, MoverConfig, OwnerInfo, Role, RoleConfig, SourceOptions};
pub use error::{MoverError, SyncResult};
pub use job::{
    build_cache_pvc, build_job, cache_pvc_name, data_pvc_name, job_name, maintenance_selector,
    owner_labels, runs_maintenance, shorten_name, CacheVolume, JobInputs,
};
pub use state::{classify_job, MoverState};

use crate::config::SharedMoverSettings;
use crate::controller::cache::{plan_cache, resolve_cache_access_modes};
use crate::controller::cluster::{ApplyOutcome, ClusterOps};
use crate::controller::credentials::{credential_volume, present_credential_files};
use crate::controller::discovery::DiscoveryParser;
use crate::controller::environment::{build_environment, EnvironmentContext};
use crate::controller::handlers::{
    CleanupKind, CopyTriggerTimeout, MountableReference, NewVolumeRequest, ObjectCleaner,
    ReferenceValidator, SecretAccessor, ServiceAccountHandler, VolumeHandler,
};
use crate::controller::identity::{resolve_identity, Identity};
use crate::controller::logs::{filter_destination_logs, filter_logs};
use crate::controller::maintenance::{
    analyze_job_history, calculate_next_scheduled_time, format_time, parse_time,
    record_maintenance_run, should_run_maintenance, time_to_chrono, MaintenanceRun,
};
use crate::crd::{
    IdentityInfo, KopiaDestinationStatus, KopiaSourceStatus, MaintenanceStatus, MoverResult,
    MoverStatus,
};
use crate::observability::MoverMetrics;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Secret};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn, Instrument};

const SECRET_KEY_PASSWORD: &str = "KOPIA_PASSWORD";
const SECRET_KEY_REPOSITORY: &str = "KOPIA_REPOSITORY";
const SECRET_KEY_MANUAL_CONFIG: &str = "KOPIA_MANUAL_CONFIG";

/// Interface the operator's reconcile loop uses for every data mover
#[async_trait]
pub trait DataMover: Send {
    fn name(&self) -> &'static str;

    async fn synchronize(&mut self) -> Result<SyncResult, MoverError>;

    async fn cleanup(&mut self) -> Result<SyncResult, MoverError>;
}

/// Shared collaborators, cloned into every mover instance
#[derive(Clone)]
pub struct MoverDeps {
    pub settings: SharedMoverSettings,
    pub cluster: Arc<dyn ClusterOps>,
    pub secrets: Arc<dyn SecretAccessor>,
    pub volumes: Arc<dyn VolumeHandler>,
    pub service_accounts: Arc<dyn ServiceAccountHandler>,
    pub cleaner: Arc<dyn ObjectCleaner>,
    pub references: Arc<dyn ReferenceValidator>,
    pub discovery: Arc<dyn DiscoveryParser>,
    pub metrics: MoverMetrics,
}

/// Status blocks the mover reads and updates
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MoverStatuses {
    pub mover: MoverStatus,
    pub source: KopiaSourceStatus,
    pub destination: KopiaDestinationStatus,
}

/// Everything validated before the Job can be built
struct Prerequisites {
    data_pvc: PersistentVolumeClaim,
    cache: CacheVolume,
    service_account: String,
    secret: Secret,
    custom_ca: Option<MountableReference>,
    policy_config: Option<MountableReference>,
}

/// Kopia implementation of [`DataMover`]
pub struct Mover {
    config: MoverConfig,
    deps: MoverDeps,
    status: MoverStatuses,
}

impl std::fmt::Debug for Mover {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mover")
            .field("config", &self.config)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

impl Mover {
    #[must_use]
    pub fn new(config: MoverConfig, deps: MoverDeps, status: MoverStatuses) -> Self {
        Self {
            config,
            deps,
            status,
        }
    }

    #[must_use]
    pub fn config(&self) -> &MoverConfig {
        &self.config
    }

    /// Current status, to be persisted by the caller
    #[must_use]
    pub fn status(&self) -> &MoverStatuses {
        &self.status
    }

    #[must_use]
    pub fn into_status(self) -> MoverStatuses {
        self.status
    }

    /// Kopia identity for this reconcile
    #[must_use]
    pub fn identity(&self) -> Identity {
        let (hint, pvc) = match &self.config.role {
            RoleConfig::Source(opts) => (None, Some(opts.source_pvc_name.as_str())),
            RoleConfig::Destination(opts) => {
                (opts.source_identity.as_ref(), opts.destination_pvc.as_deref())
            }
        };
        resolve_identity(
            self.config.username.as_deref(),
            self.config.hostname.as_deref(),
            hint,
            &self.config.owner.name,
            &self.config.owner.namespace,
            pvc,
        )
    }

    fn namespace(&self) -> &str {
        &self.config.owner.namespace
    }

    fn role_label(&self) -> &'static str {
        self.config.role().as_str()
    }

    async fn run_synchronize(&mut self) -> Result<SyncResult, MoverError> {
        let Some(prereqs) = self.prerequisites().await? else {
            debug!(state = ?MoverState::PrerequisitesPending, "Waiting for prerequisites");
            return Ok(SyncResult::InProgress);
        };

        let identity = self.identity();
        let name = job_name(&self.config.owner.name, self.config.role());

        // The pod template of an existing Job is immutable, keep its decision
        let existing = self
            .deps
            .cluster
            .get_job(self.namespace(), &name)
            .await
            .map_err(MoverError::Cluster)?;
        let run_maintenance = match existing.as_ref() {
            Some(job) => runs_maintenance(job),
            None => self.maintenance_due(),
        };

        if self.config.role() == Role::Destination {
            self.status.destination.requested_identity = Some(identity.as_kopia_string());
        }

        let desired = self.desired_job(&name, &identity, &prereqs, run_maintenance).await?;
        let outcome = self
            .deps
            .cluster
            .apply_job(&desired)
            .await
            .map_err(MoverError::Cluster)?;
        if outcome != ApplyOutcome::Updated {
            debug!(job = %name, ?outcome, "Job not ready for evaluation");
            return Ok(SyncResult::InProgress);
        }

        let job = self
            .deps
            .cluster
            .get_job(self.namespace(), &name)
            .await
            .map_err(MoverError::Cluster)?;
        let state = classify_job(job.as_ref(), self.deps.settings.job_backoff_limit);
        debug!(job = %name, ?state, "Evaluated mover Job");

        match state {
            MoverState::JobFailedTerminal { failed } => {
                self.capture_logs(&name, &identity).await;
                self.status.mover.result = Some(MoverResult::Failed);
                self.status.mover.error = Some(format!(
                    "Mover Job {name} failed {failed} times and will be recreated"
                ));
                warn!(job = %name, failed, "Backoff limit reached, deleting mover Job");
                self.deps
                    .cluster
                    .delete_job(self.namespace(), &name)
                    .await
                    .map_err(MoverError::Cluster)?;
                if run_maintenance {
                    let run = job
                        .as_ref()
                        .map(|job| MaintenanceRun::from_job(job, false, Utc::now()));
                    self.refresh_maintenance_status(&name, run).await;
                }
                self.deps.metrics.increment_job_resets(self.role_label());
                self.deps
                    .metrics
                    .increment_sync_results(self.role_label(), "failed");
                debug!(next = ?state.after_reset(), "Mover Job reset");
                Ok(SyncResult::InProgress)
            }
            MoverState::JobFailedRetryable { failed } => {
                debug!(job = %name, failed, "Mover Job retrying");
                self.deps.metrics.increment_job_retries(self.role_label());
                Ok(SyncResult::InProgress)
            }
            MoverState::NotStarted | MoverState::PrerequisitesPending | MoverState::JobRunning => {
                Ok(SyncResult::InProgress)
            }
            MoverState::JobSucceeded => {
                self.capture_logs(&name, &identity).await;
                self.status.mover.result = Some(MoverResult::Successful);
                self.status.mover.error = None;
                let run = job
                    .as_ref()
                    .filter(|_| run_maintenance)
                    .map(|job| MaintenanceRun::from_job(job, true, Utc::now()));
                self.complete(&name, &prereqs.data_pvc, run).await
            }
        }
    }

    async fn complete(
        &mut self,
        job_name: &str,
        data_pvc: &PersistentVolumeClaim,
        maintenance: Option<MaintenanceRun>,
    ) -> Result<SyncResult, MoverError> {
        match self.config.role() {
            Role::Source => {
                if maintenance.is_some() {
                    self.status.source.last_maintenance = Some(format_time(Utc::now()));
                    self.deps.metrics.increment_maintenance_runs();
                }
                self.refresh_maintenance_status(job_name, maintenance).await;
                self.deps
                    .metrics
                    .increment_sync_results(self.role_label(), "complete");
                info!(owner = %self.config.owner.name, "Backup complete");
                Ok(SyncResult::Complete)
            }
            Role::Destination => {
                let image = self
                    .deps
                    .volumes
                    .ensure_image(data_pvc)
                    .await
                    .map_err(MoverError::handler("ensure destination image"))?;
                let Some(image) = image else {
                    return Ok(SyncResult::InProgress);
                };
                self.status.destination.available_identities.clear();
                self.status.destination.discovery_message = None;
                self.deps
                    .metrics
                    .increment_sync_results(self.role_label(), "complete");
                info!(owner = %self.config.owner.name, image = %image.name, "Restore complete");
                Ok(SyncResult::CompleteWithImage(image))
            }
        }
    }

    /// Prepare volumes and validate inputs; `Ok(None)` while something is not ready
    async fn prerequisites(&mut self) -> Result<Option<Prerequisites>, MoverError> {
        let Some(data_pvc) = self.ensure_data_pvc().await? else {
            return Ok(None);
        };
        let cache = self.ensure_cache(&data_pvc).await?;

        let service_account = self
            .deps
            .service_accounts
            .reconcile()
            .await
            .map_err(MoverError::handler("reconcile ServiceAccount"))?
            .and_then(|sa| sa.metadata.name);
        let Some(service_account) = service_account else {
            return Ok(None);
        };

        let secret = self.validate_repository_secret().await?;
        self.validate_repository_pvc().await?;

        let namespace = self.config.owner.namespace.clone();
        let custom_ca = if self.config.custom_ca.is_empty() {
            None
        } else {
            self.deps
                .references
                .validate_custom_ca(&namespace, &self.config.custom_ca)
                .await
                .map_err(|source| MoverError::InvalidReference {
                    kind: "custom_ca",
                    source,
                })?
        };
        let policy_config = if self.config.policy_config.is_empty() {
            None
        } else {
            self.deps
                .references
                .validate_policy_config(&namespace, &self.config.policy_config)
                .await
                .map_err(|source| MoverError::InvalidReference {
                    kind: "policy_config",
                    source,
                })?
        };

        Ok(Some(Prerequisites {
            data_pvc,
            cache,
            service_account,
            secret,
            custom_ca,
            policy_config,
        }))
    }

    async fn ensure_data_pvc(&mut self) -> Result<Option<PersistentVolumeClaim>, MoverError> {
        let role = self.config.role();
        let data_name = data_pvc_name(&self.config.owner.name, role);

        let result = match &self.config.role {
            RoleConfig::Source(opts) => {
                let source = self
                    .deps
                    .cluster
                    .get_pvc(self.namespace(), &opts.source_pvc_name)
                    .await
                    .map_err(MoverError::Cluster)?;
                let Some(source) = source else {
                    return Err(MoverError::SourcePvcNotFound(opts.source_pvc_name.clone()));
                };
                self.deps
                    .volumes
                    .ensure_pvc_from_source(&source, &data_name, true)
                    .await
            }
            RoleConfig::Destination(opts) => match opts.destination_pvc.as_deref() {
                Some(provided) => self.deps.volumes.use_provided_pvc(provided).await,
                None => {
                    self.deps
                        .volumes
                        .ensure_new_pvc(&NewVolumeRequest {
                            name: &data_name,
                            capacity: opts.capacity.as_ref(),
                            storage_class_name: opts.storage_class_name.as_deref(),
                            access_modes: &opts.access_modes,
                        })
                        .await
                }
            },
        };

        match result {
            Ok(pvc) => Ok(pvc),
            Err(err) => match err.downcast_ref::<CopyTriggerTimeout>() {
                Some(timeout) => {
                    info!(reason = %timeout, "Waiting for copy trigger");
                    self.status.mover.result = Some(MoverResult::Failed);
                    self.status.mover.error = Some(timeout.to_string());
                    Ok(None)
                }
                None => Err(MoverError::Handler {
                    operation: "prepare data volume",
                    source: err,
                }),
            },
        }
    }

    async fn ensure_cache(
        &self,
        data_pvc: &PersistentVolumeClaim,
    ) -> Result<CacheVolume, MoverError> {
        let cache = &self.config.cache;
        let plan = plan_cache(
            cache.cache_capacity.as_ref(),
            cache.cache_storage_class_name.as_deref(),
            &cache.cache_access_modes,
        );
        if !plan.use_pvc {
            return Ok(CacheVolume::EmptyDir(plan.size_limit));
        }

        let data_modes = data_pvc
            .spec
            .as_ref()
            .and_then(|s| s.access_modes.clone())
            .unwrap_or_default();
        let access_modes = resolve_cache_access_modes(
            &cache.cache_access_modes,
            &self.deps.volumes.access_modes(),
            &data_modes,
        );
        let name = cache_pvc_name(&self.config.owner.name, self.config.role());
        let desired = build_cache_pvc(
            &self.config.owner,
            &name,
            &plan.size_limit,
            cache.cache_storage_class_name.as_deref(),
            access_modes,
        );
        self.deps
            .cluster
            .ensure_pvc(&desired)
            .await
            .map_err(MoverError::Cluster)?;
        Ok(CacheVolume::Pvc(name))
    }

    async fn validate_repository_secret(&self) -> Result<Secret, MoverError> {
        let mut required = vec![SECRET_KEY_PASSWORD];
        if self.config.manual_config {
            required.push(SECRET_KEY_MANUAL_CONFIG);
        } else if self.config.repository_pvc.is_none() {
            required.push(SECRET_KEY_REPOSITORY);
        }

        let name = &self.config.repository_secret;
        let secret = self
            .deps
            .secrets
            .get_and_validate_secret(self.namespace(), name, &required)
            .await
            .map_err(|source| MoverError::SecretInvalid {
                name: name.clone(),
                source,
            })?;

        if self.config.manual_config {
            let raw = secret_value(&secret, SECRET_KEY_MANUAL_CONFIG).unwrap_or_default();
            serde_json::from_slice::<serde_json::Value>(&raw)
                .map_err(MoverError::InvalidManualConfig)?;
        }
        Ok(secret)
    }

    async fn validate_repository_pvc(&self) -> Result<(), MoverError> {
        let Some(name) = self.config.repository_pvc.as_deref() else {
            return Ok(());
        };
        let pvc = self
            .deps
            .cluster
            .get_pvc(self.namespace(), name)
            .await
            .map_err(MoverError::Cluster)?
            .ok_or_else(|| MoverError::RepositoryPvcNotFound(name.to_string()))?;

        let phase = pvc
            .status
            .and_then(|s| s.phase)
            .unwrap_or_else(|| "Unknown".to_string());
        if phase != "Bound" {
            return Err(MoverError::RepositoryPvcNotBound {
                name: name.to_string(),
                phase,
            });
        }
        Ok(())
    }

    fn maintenance_due(&self) -> bool {
        let RoleConfig::Source(opts) = &self.config.role else {
            return false;
        };
        let last = self
            .status
            .source
            .last_maintenance
            .as_deref()
            .and_then(parse_time);
        should_run_maintenance(opts.maintenance_interval_days, last, Utc::now())
    }

    async fn desired_job(
        &self,
        name: &str,
        identity: &Identity,
        prereqs: &Prerequisites,
        run_maintenance: bool,
    ) -> Result<Job, MoverError> {
        let settings = &self.deps.settings;
        let credential_files = present_credential_files(&prereqs.secret);

        let env = build_environment(&EnvironmentContext {
            repository_secret: &self.config.repository_secret,
            identity,
            role: &self.config.role,
            settings,
            uses_repository_pvc: self.config.repository_pvc.is_some(),
            manual_config: self.config.manual_config,
            privileged: self.config.privileged,
            source_path_override: self.config.source_path_override.as_deref(),
            additional_args: &self.config.additional_args,
            has_custom_ca: prereqs.custom_ca.is_some(),
            has_policy_config: prereqs.policy_config.is_some(),
            run_maintenance,
            credential_files: &credential_files,
        });

        let data_pvc = prereqs.data_pvc.metadata.name.clone().unwrap_or_default();
        let affinity = if self.deps.volumes.is_copy_method_direct() {
            self.deps
                .cluster
                .affinity_for_volume(self.namespace(), &data_pvc)
                .await
                .map_err(MoverError::Cluster)?
        } else {
            None
        };

        Ok(build_job(JobInputs {
            config: &self.config,
            name: name.to_string(),
            image: settings
                .image_or_default(self.config.image.as_deref())
                .to_string(),
            service_account: prereqs.service_account.clone(),
            env,
            data_pvc,
            cache: prereqs.cache.clone(),
            custom_ca: prereqs.custom_ca.as_ref(),
            policy_config: prereqs.policy_config.as_ref(),
            credentials: credential_volume(&self.config.repository_secret, &credential_files),
            affinity,
            backoff_limit: settings.job_backoff_limit,
            run_maintenance,
        }))
    }

    /// Copy the Job's filtered logs (and, for restores, discovery results) into status
    async fn capture_logs(&mut self, job: &str, identity: &Identity) {
        let logs = match self.deps.cluster.job_logs(self.namespace(), job).await {
            Ok(Some(logs)) => logs,
            Ok(None) => return,
            Err(err) => {
                warn!(job = %job, error = %err, "Unable to read mover logs");
                return;
            }
        };
        let max_lines = self.deps.settings.max_status_log_lines;

        self.status.mover.logs = Some(match self.config.role() {
            Role::Source => filter_logs(&logs, max_lines),
            Role::Destination => {
                let mut discovery = self.deps.discovery.parse(&logs);
                if discovery.requested_identity.is_empty() {
                    discovery.requested_identity = identity.as_kopia_string();
                }
                let destination = &mut self.status.destination;
                destination.requested_identity = Some(discovery.requested_identity.clone());
                destination.available_identities = discovery
                    .available_identities
                    .iter()
                    .map(|info| IdentityInfo {
                        identity: info.identity.clone(),
                        snapshot_count: info.snapshot_count,
                        latest_snapshot: info.latest_snapshot.map(format_time),
                    })
                    .collect();
                destination.discovery_message =
                    (!discovery.message.is_empty()).then(|| discovery.message.clone());
                filter_destination_logs(&logs, max_lines, &discovery)
            }
        });
    }

    /// Fold a finished maintenance run into status and refresh the schedule
    ///
    /// Labelled Job history seeds the status the first time it is needed,
    /// leaving out `job_name` so its own outcome is not counted twice.
    async fn refresh_maintenance_status(
        &mut self,
        job_name: &str,
        run: Option<MaintenanceRun>,
    ) {
        let RoleConfig::Source(opts) = &self.config.role else {
            return;
        };
        let configured = opts.maintenance_interval_days.is_some_and(|d| d > 0);
        let cron = opts.maintenance_cron_schedule.clone();
        let interval = opts.maintenance_interval_days;

        if !configured {
            self.status.source.maintenance_status = None;
            self.status.source.next_scheduled_maintenance = None;
            return;
        }

        let mut maintenance = match self.status.source.maintenance_status.take() {
            Some(previous) => previous,
            None => self.maintenance_history(job_name).await,
        };
        maintenance.configured = true;
        if let Some(run) = run {
            record_maintenance_run(&mut maintenance, run);
        }
        self.status.source.maintenance_status = Some(maintenance);

        let last = self
            .status
            .source
            .last_maintenance
            .as_deref()
            .and_then(parse_time);
        self.status.source.next_scheduled_maintenance = last.map(|last| {
            let next = match cron.as_deref().filter(|c| !c.is_empty()) {
                Some(cron) => calculate_next_scheduled_time(cron, last),
                None => last + Duration::days(i64::from(interval.unwrap_or(1))),
            };
            format_time(next)
        });
    }

    /// Summary of earlier labelled maintenance Jobs other than `job_name`
    async fn maintenance_history(&self, job_name: &str) -> MaintenanceStatus {
        let selector = maintenance_selector(&self.config.owner);
        let mut jobs = match self.deps.cluster.list_jobs(self.namespace(), &selector).await {
            Ok(jobs) => jobs,
            Err(err) => {
                warn!(error = %err, "Unable to list maintenance Jobs");
                Vec::new()
            }
        };
        jobs.retain(|job| job.metadata.name.as_deref() != Some(job_name));
        jobs.sort_by_key(|job| {
            std::cmp::Reverse(
                job.metadata
                    .creation_timestamp
                    .as_ref()
                    .and_then(time_to_chrono),
            )
        });
        jobs.truncate(self.deps.settings.maintenance_history_limit);
        analyze_job_history(&jobs)
    }
}

/// Raw bytes of `key` from either `data` or `stringData`
fn secret_value(secret: &Secret, key: &str) -> Option<Vec<u8>> {
    secret
        .data
        .as_ref()
        .and_then(|d| d.get(key))
        .map(|v| v.0.clone())
        .or_else(|| {
            secret
                .string_data
                .as_ref()
                .and_then(|d| d.get(key))
                .map(|v| v.as_bytes().to_vec())
        })
}

#[async_trait]
impl DataMover for Mover {
    fn name(&self) -> &'static str {
        "kopia"
    }

    async fn synchronize(&mut self) -> Result<SyncResult, MoverError> {
        if self.config.paused {
            debug!(owner = %self.config.owner.name, "Mover is paused");
            return Ok(SyncResult::Complete);
        }

        let role = self.role_label();
        let span = tracing::info_span!(
            "kopia.synchronize",
            owner.name = %self.config.owner.name,
            owner.namespace = %self.config.owner.namespace,
            role = role,
        );
        let started = Instant::now();
        let result = self.run_synchronize().instrument(span).await;
        self.deps
            .metrics
            .observe_sync_duration(role, started.elapsed().as_secs_f64());

        if let Err(err) = &result {
            match err.metric_reason() {
                Some(reason) => {
                    warn!(reason, error = %err, "Mover configuration error");
                    self.deps.metrics.increment_configuration_errors(role, reason);
                }
                None => warn!(error = %err, "Mover synchronize failed"),
            }
        }
        result
    }

    async fn cleanup(&mut self) -> Result<SyncResult, MoverError> {
        if let RoleConfig::Destination(opts) = &self.config.role {
            let pvc = opts
                .destination_pvc
                .clone()
                .unwrap_or_else(|| data_pvc_name(&self.config.owner.name, Role::Destination));
            self.deps
                .volumes
                .remove_snapshot_annotation(&pvc)
                .await
                .map_err(MoverError::handler("remove snapshot annotation"))?;
        }

        self.deps
            .cleaner
            .cleanup_objects(
                &self.config.owner,
                &[
                    CleanupKind::Job,
                    CleanupKind::PersistentVolumeClaim,
                    CleanupKind::VolumeSnapshot,
                ],
            )
            .await
            .map_err(MoverError::handler("clean up mover objects"))?;
        info!(owner = %self.config.owner.name, "Mover cleanup complete");
        Ok(SyncResult::Complete)
    }
}
