//! # Resource Types
//!
//! Types shared with the replication custom resources.
//!
//! The CRD schema itself belongs to the operator; this module only carries
//! the Kopia-specific option blocks the mover consumes and the status blocks
//! the mover produces.
//!
//! ## Module Structure
//!
//! - `options.rs` - Kopia options read from the resource spec
//! - `status.rs` - Status types written back by the mover

mod options;
mod status;

pub use options::{
    CacheSettings, CustomCaSpec, MoverPodOverrides, PolicyConfigSpec, RetentionPolicy,
    SnapshotActions, SourceIdentity,
};
pub use status::{
    IdentityInfo, KopiaDestinationStatus, KopiaSourceStatus, MaintenanceStatus, MoverResult,
    MoverStatus,
};
