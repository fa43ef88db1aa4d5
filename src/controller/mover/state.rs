//! # Job State
//!
//! Classifies the mover Job into the states `synchronize` acts on.

use k8s_openapi::api::batch::v1::Job;

/// Where a mover is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoverState {
    /// No Job exists
    NotStarted,
    /// Volumes, secrets or references are not ready
    PrerequisitesPending,
    JobRunning,
    JobSucceeded,
    /// Pods failed but the Job is within its backoff limit
    JobFailedRetryable { failed: i32 },
    /// Backoff limit reached; the Job must be deleted and recreated
    JobFailedTerminal { failed: i32 },
}

impl MoverState {
    /// State after the orchestrator deleted an exhausted Job
    #[must_use]
    pub fn after_reset(self) -> MoverState {
        match self {
            MoverState::JobFailedTerminal { .. } => MoverState::NotStarted,
            other => other,
        }
    }
}

/// Classify a Job against the backoff limit
///
/// Exhaustion wins over success. A `Failed` condition (deadline exceeded,
/// pod failure policy) also counts as exhausted.
#[must_use]
pub fn classify_job(job: Option<&Job>, backoff_limit: i32) -> MoverState {
    let Some(job) = job else {
        return MoverState::NotStarted;
    };
    let Some(status) = job.status.as_ref() else {
        return MoverState::JobRunning;
    };

    let failed = status.failed.unwrap_or(0);
    let failed_condition = status
        .conditions
        .as_ref()
        .is_some_and(|c| c.iter().any(|c| c.type_ == "Failed" && c.status == "True"));

    if failed >= backoff_limit || failed_condition {
        return MoverState::JobFailedTerminal { failed };
    }
    if status.succeeded.unwrap_or(0) > 0 {
        return MoverState::JobSucceeded;
    }
    if failed > 0 {
        return MoverState::JobFailedRetryable { failed };
    }
    MoverState::JobRunning
}
