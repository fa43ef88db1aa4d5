//! Kopia Mover Library
//!
//! Reconciliation engine for the Kopia data mover of a volume-replication
//! operator. One [`controller::mover::Mover`] is built per reconcile of a
//! replication source or destination; it provisions the scratch volumes,
//! assembles the Kopia Job and tracks it to completion.
//!
//! ## Quick Start
//!
//! ```rust
//! use kopia_mover::prelude::*;
//! ```
//!
//! This brings commonly used types and traits into scope. For more specific imports,
//! use the individual modules.

pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod observability;
pub mod prelude;
