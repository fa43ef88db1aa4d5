//! # Configuration
//!
//! Operator-level settings for the Kopia mover.
//!
//! Settings are loaded once from environment variables (populated from a
//! ConfigMap via `envFrom`) and shared read-only by every mover instance.

mod mover;

pub use mover::{MoverSettings, ProxySettings, SharedMoverSettings};
