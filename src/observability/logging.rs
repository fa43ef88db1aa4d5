//! # Logging
//!
//! Tracing subscriber setup for processes embedding the mover.

use crate::config::MoverSettings;
use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is not set
const DEFAULT_FILTER_TARGET: &str = "kopia_mover";

/// Build the env filter from `RUST_LOG`, falling back to the configured level
#[must_use]
pub fn env_filter(settings: &MoverSettings) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "{DEFAULT_FILTER_TARGET}={}",
            settings.log_level.to_lowercase()
        )
        .into()
    })
}

/// Install the global tracing subscriber
///
/// Returns an error if a subscriber is already installed; callers that may
/// initialize twice (tests) can ignore it.
pub fn init_tracing(
    settings: &MoverSettings,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let builder = tracing_subscriber::fmt().with_env_filter(env_filter(settings));
    if settings.log_format.eq_ignore_ascii_case("json") {
        builder.json().try_init()
    } else {
        builder.try_init()
    }
}
