//! # Observability
//!
//! Observability modules for metrics and logging.
//!
//! - `metrics`: Prometheus metrics handle injected into each mover
//! - `logging`: tracing subscriber setup

pub mod logging;
pub mod metrics;

pub use logging::init_tracing;
pub use metrics::MoverMetrics;
