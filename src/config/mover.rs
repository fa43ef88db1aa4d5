//! # Mover Settings
//!
//! Operator-wide settings loaded from environment variables.

use std::sync::Arc;

/// Settings shared by all mover instances
pub type SharedMoverSettings = Arc<MoverSettings>;

/// Cluster-wide proxy configuration forwarded into mover containers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxySettings {
    pub http_proxy: Option<String>,
    pub https_proxy: Option<String>,
    pub no_proxy: Option<String>,
}

impl ProxySettings {
    /// True when no proxy variable is configured
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.http_proxy.is_none() && self.https_proxy.is_none() && self.no_proxy.is_none()
    }
}

/// Operator-level mover configuration
///
/// All settings have sensible defaults and can be overridden via environment variables.
#[derive(Debug, Clone)]
pub struct MoverSettings {
    /// Image used when the resource does not pin one
    pub default_image: String,
    /// Pod failures tolerated before the Job is deleted and recreated
    pub job_backoff_limit: i32,
    /// Enables verbose output from the mover entry point
    pub debug_mover: bool,
    /// Proxy variables forwarded to every mover container
    pub proxy: ProxySettings,
    /// Number of log lines kept in the mover status
    pub max_status_log_lines: usize,
    /// Number of maintenance Jobs scanned for maintenance history
    pub maintenance_history_limit: usize,
    /// Global log level (ERROR, WARN, INFO, DEBUG, TRACE)
    pub log_level: String,
    /// Log format (json, text)
    pub log_format: String,
}

impl Default for MoverSettings {
    fn default() -> Self {
        use crate::constants::{
            DEFAULT_JOB_BACKOFF_LIMIT, DEFAULT_KOPIA_IMAGE, DEFAULT_MAINTENANCE_HISTORY_LIMIT,
            MAX_STATUS_LOG_LINES,
        };
        Self {
            default_image: DEFAULT_KOPIA_IMAGE.to_string(),
            job_backoff_limit: DEFAULT_JOB_BACKOFF_LIMIT,
            debug_mover: false,
            proxy: ProxySettings::default(),
            max_status_log_lines: MAX_STATUS_LOG_LINES,
            maintenance_history_limit: DEFAULT_MAINTENANCE_HISTORY_LIMIT,
            log_level: "INFO".to_string(),
            log_format: "json".to_string(),
        }
    }
}

impl MoverSettings {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        use crate::constants::{
            DEFAULT_JOB_BACKOFF_LIMIT, DEFAULT_KOPIA_IMAGE, DEFAULT_MAINTENANCE_HISTORY_LIMIT,
            MAX_STATUS_LOG_LINES,
        };
        Self {
            default_image: setting("RELATED_IMAGE_KOPIA")
                .unwrap_or_else(|| DEFAULT_KOPIA_IMAGE.to_string()),
            job_backoff_limit: parsed_setting("KOPIA_JOB_BACKOFF_LIMIT", DEFAULT_JOB_BACKOFF_LIMIT),
            debug_mover: flag_setting("DEBUG_MOVER", false),
            proxy: ProxySettings {
                http_proxy: setting("HTTP_PROXY"),
                https_proxy: setting("HTTPS_PROXY"),
                no_proxy: setting("NO_PROXY"),
            },
            max_status_log_lines: parsed_setting("MAX_STATUS_LOG_LINES", MAX_STATUS_LOG_LINES),
            maintenance_history_limit: parsed_setting(
                "MAINTENANCE_HISTORY_LIMIT",
                DEFAULT_MAINTENANCE_HISTORY_LIMIT,
            ),
            log_level: setting("LOG_LEVEL").unwrap_or_else(|| "INFO".to_string()),
            log_format: setting("LOG_FORMAT").unwrap_or_else(|| "json".to_string()),
        }
    }

    /// Wrap the settings for sharing across mover instances
    #[must_use]
    pub fn shared(self) -> SharedMoverSettings {
        Arc::new(self)
    }

    /// Image to run, preferring the resource's own choice
    #[must_use]
    pub fn image_or_default<'a>(&'a self, requested: Option<&'a str>) -> &'a str {
        match requested {
            Some(image) if !image.is_empty() => image,
            _ => &self.default_image,
        }
    }
}

/// Non-empty, trimmed value of an environment variable
fn setting(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parsed value of `key`; unset or unparsable values yield `default`
fn parsed_setting<T: std::str::FromStr>(key: &str, default: T) -> T {
    setting(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Boolean value of `key`; unrecognised values yield `default`
fn flag_setting(key: &str, default: bool) -> bool {
    setting(key).and_then(|v| parse_flag(&v)).unwrap_or(default)
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
