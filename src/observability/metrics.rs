//! # Metrics
//!
//! Prometheus metrics for the Kopia mover.
//!
//! Metrics live on a [`MoverMetrics`] handle registered against a caller
//! supplied [`Registry`], so the operator owns the registry and tests can use
//! an isolated one. The handle is cheap to clone and safe to share across
//! concurrently reconciled resources.
//!
//! ## Metrics Exposed
//!
//! - `kopia_mover_configuration_errors_total{role, reason}` - Prerequisite validation failures
//! - `kopia_mover_job_retries_total{role}` - Reconciles that observed a failed pod on a running Job
//! - `kopia_mover_job_resets_total{role}` - Jobs deleted after exhausting their backoff limit
//! - `kopia_mover_sync_results_total{role, result}` - Completed synchronizations by outcome
//! - `kopia_mover_sync_duration_seconds{role}` - Duration of a single `synchronize` pass
//! - `kopia_mover_maintenance_runs_total` - Backups that carried repository maintenance

use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry};

/// Injected metrics handle for mover instances
#[derive(Debug, Clone)]
pub struct MoverMetrics {
    configuration_errors: IntCounterVec,
    job_retries: IntCounterVec,
    job_resets: IntCounterVec,
    sync_results: IntCounterVec,
    sync_duration: HistogramVec,
    maintenance_runs: IntCounter,
}

impl MoverMetrics {
    /// Create the mover metrics and register them with `registry`
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let metrics = Self::unregistered()?;
        registry.register(Box::new(metrics.configuration_errors.clone()))?;
        registry.register(Box::new(metrics.job_retries.clone()))?;
        registry.register(Box::new(metrics.job_resets.clone()))?;
        registry.register(Box::new(metrics.sync_results.clone()))?;
        registry.register(Box::new(metrics.sync_duration.clone()))?;
        registry.register(Box::new(metrics.maintenance_runs.clone()))?;
        Ok(metrics)
    }

    /// Create metrics that are not exported anywhere
    pub fn unregistered() -> Result<Self, prometheus::Error> {
        Ok(Self {
            configuration_errors: IntCounterVec::new(
                Opts::new(
                    "kopia_mover_configuration_errors_total",
                    "Total number of prerequisite validation failures by reason",
                ),
                &["role", "reason"],
            )?,
            job_retries: IntCounterVec::new(
                Opts::new(
                    "kopia_mover_job_retries_total",
                    "Total number of reconciles that observed failed pods on a running Job",
                ),
                &["role"],
            )?,
            job_resets: IntCounterVec::new(
                Opts::new(
                    "kopia_mover_job_resets_total",
                    "Total number of Jobs deleted after exhausting their backoff limit",
                ),
                &["role"],
            )?,
            sync_results: IntCounterVec::new(
                Opts::new(
                    "kopia_mover_sync_results_total",
                    "Total number of completed synchronizations by result",
                ),
                &["role", "result"],
            )?,
            sync_duration: HistogramVec::new(
                HistogramOpts::new(
                    "kopia_mover_sync_duration_seconds",
                    "Duration of a synchronize pass in seconds",
                )
                .buckets(vec![0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0]),
                &["role"],
            )?,
            maintenance_runs: IntCounter::new(
                "kopia_mover_maintenance_runs_total",
                "Total number of backups that carried repository maintenance",
            )?,
        })
    }

    pub fn increment_configuration_errors(&self, role: &str, reason: &str) {
        self.configuration_errors
            .with_label_values(&[role, reason])
            .inc();
    }

    pub fn increment_job_retries(&self, role: &str) {
        self.job_retries.with_label_values(&[role]).inc();
    }

    pub fn increment_job_resets(&self, role: &str) {
        self.job_resets.with_label_values(&[role]).inc();
    }

    pub fn increment_sync_results(&self, role: &str, result: &str) {
        self.sync_results.with_label_values(&[role, result]).inc();
    }

    pub fn observe_sync_duration(&self, role: &str, duration: f64) {
        self.sync_duration.with_label_values(&[role]).observe(duration);
    }

    pub fn increment_maintenance_runs(&self) {
        self.maintenance_runs.inc();
    }

    /// Current value of the configuration error counter (for tests and diagnostics)
    #[must_use]
    pub fn configuration_errors(&self, role: &str, reason: &str) -> u64 {
        self.configuration_errors
            .with_label_values(&[role, reason])
            .get()
    }

    #[must_use]
    pub fn job_retries(&self, role: &str) -> u64 {
        self.job_retries.with_label_values(&[role]).get()
    }

    #[must_use]
    pub fn job_resets(&self, role: &str) -> u64 {
        self.job_resets.with_label_values(&[role]).get()
    }

    #[must_use]
    pub fn maintenance_runs(&self) -> u64 {
        self.maintenance_runs.get()
    }
}
