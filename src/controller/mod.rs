//! # Controller
//!
//! Kopia mover reconciliation logic.
//!
//! - `identity`: Kopia username/hostname derivation
//! - `environment`: Mover container environment
//! - `credentials`: File-based backend credentials
//! - `cache`: Metadata cache volume planning
//! - `discovery`: Snapshot discovery from restore logs
//! - `logs`: Log filtering for status
//! - `maintenance`: Repository maintenance scheduling and history
//! - `handlers`: Traits for operator collaborators
//! - `cluster`: Kubernetes API access
//! - `mover`: The `synchronize`/`cleanup` state machine

pub mod cache;
pub mod cluster;
pub mod credentials;
pub mod discovery;
pub mod environment;
pub mod handlers;
pub mod identity;
pub mod logs;
pub mod maintenance;
pub mod mover;
