//! # Prelude
//!
//! Re-exports commonly used types and traits for convenience.
//!
//! ## Usage
//!
//! ```rust
//! use kopia_mover::prelude::*;
//! ```
//!
//! This brings into scope:
//! - Status and option types (MoverStatus, KopiaSourceStatus, RetentionPolicy, etc.)
//! - The mover and its configuration (Mover, MoverConfig, RoleConfig, etc.)
//! - Collaborator traits implemented by the surrounding operator
//! - Operator settings and the metrics handle

// Status and option types
pub use crate::crd::*;

// Mover and configuration
pub use crate::controller::mover::{
    DataMover, DestinationOptions, Mover, MoverConfig, MoverDeps, MoverError, MoverStatuses,
    OwnerInfo, Role, RoleConfig, SourceOptions, SyncResult,
};

// Collaborator traits
pub use crate::controller::cluster::{ApplyOutcome, ClusterOps, KubeCluster};
pub use crate::controller::discovery::{DiscoveryParser, DiscoveryResult, LogScrapingParser};
pub use crate::controller::handlers::{
    CleanupKind, CopyTriggerTimeout, MountableReference, ObjectCleaner, ReferenceValidator,
    SecretAccessor, ServiceAccountHandler, VolumeHandler,
};

// Settings and observability
pub use crate::config::{MoverSettings, SharedMoverSettings};
pub use crate::observability::MoverMetrics;
