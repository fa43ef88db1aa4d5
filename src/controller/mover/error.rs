//! # Mover Errors
//!
//! An error from `synchronize` always means "not done yet"; the controller
//! retries with its own back-off.

use k8s_openapi::api::core::v1::TypedLocalObjectReference;
use thiserror::Error;

/// Outcome of a successful `synchronize` or `cleanup` call
#[derive(Debug, Clone, PartialEq)]
pub enum SyncResult {
    InProgress,
    Complete,
    /// Destination finished; the reference points at the restored image
    CompleteWithImage(TypedLocalObjectReference),
}

#[derive(Debug, Error)]
pub enum MoverError {
    #[error("Repository secret {name} is invalid: {source}")]
    SecretInvalid {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Source PVC {0} not found")]
    SourcePvcNotFound(String),

    #[error("Repository PVC {0} not found")]
    RepositoryPvcNotFound(String),

    #[error("Repository PVC {name} is not bound (phase: {phase})")]
    RepositoryPvcNotBound { name: String, phase: String },

    #[error("Invalid {kind} reference: {source}")]
    InvalidReference {
        kind: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("KOPIA_MANUAL_CONFIG is not valid JSON: {0}")]
    InvalidManualConfig(#[source] serde_json::Error),

    #[error("Cluster operation failed: {0}")]
    Cluster(#[source] anyhow::Error),

    #[error("{operation} failed: {source}")]
    Handler {
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl MoverError {
    /// Reason label for the configuration error counter
    ///
    /// `None` for errors that are not prerequisite validation failures.
    #[must_use]
    pub fn metric_reason(&self) -> Option<&'static str> {
        match self {
            MoverError::SecretInvalid { .. } => Some("secret_invalid"),
            MoverError::SourcePvcNotFound(_) => Some("source_pvc_not_found"),
            MoverError::RepositoryPvcNotFound(_) => Some("repository_pvc_not_found"),
            MoverError::RepositoryPvcNotBound { .. } => Some("repository_pvc_not_bound"),
            MoverError::InvalidReference { kind, .. } => Some(kind),
            MoverError::InvalidManualConfig(_) => Some("manual_config_invalid"),
            MoverError::Cluster(_) | MoverError::Handler { .. } => None,
        }
    }

    pub(crate) fn handler(operation: &'static str) -> impl FnOnce(anyhow::Error) -> Self {
        move |source| MoverError::Handler { operation, source }
    }
}
