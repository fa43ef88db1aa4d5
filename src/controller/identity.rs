//! # Identity
//!
//! Derives the Kopia `username@hostname` identity under which snapshots are stored.
//!
//! Generated identities use the object name as username and the namespace as
//! hostname. All sources in one namespace therefore share a hostname, and the
//! pair stays unique because object names are unique within a namespace.
//! Explicit overrides are trusted and returned untouched.

use crate::constants::{DEFAULT_IDENTITY, MAX_HOSTNAME_LENGTH, MAX_USERNAME_LENGTH};
use crate::crd::SourceIdentity;

/// Kopia identity attached to every mover run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub username: String,
    pub hostname: String,
}

impl Identity {
    /// `username@hostname`, the form Kopia prints in snapshot listings
    #[must_use]
    pub fn as_kopia_string(&self) -> String {
        format!("{}@{}", self.username, self.hostname)
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.username, self.hostname)
    }
}

/// Generate the Kopia username for an object
///
/// A non-empty `override_username` wins verbatim. Otherwise the object name is
/// sanitized to `[A-Za-z0-9_-]` and truncated to 50 characters.
#[must_use]
pub fn generate_username(
    override_username: Option<&str>,
    object_name: &str,
    _namespace: &str,
) -> String {
    if let Some(username) = override_username.filter(|u| !u.is_empty()) {
        return username.to_string();
    }

    let sanitized: String = object_name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    finish(&sanitized, MAX_USERNAME_LENGTH)
}

/// Generate the Kopia hostname for an object
///
/// A non-empty `override_hostname` wins verbatim. Otherwise the namespace is
/// sanitized to `[A-Za-z0-9.-]` with `_` mapped to `-`. The PVC and object
/// names are accepted but not used.
#[must_use]
pub fn generate_hostname(
    override_hostname: Option<&str>,
    _pvc_name: Option<&str>,
    namespace: &str,
    _object_name: &str,
) -> String {
    if let Some(hostname) = override_hostname.filter(|h| !h.is_empty()) {
        return hostname.to_string();
    }

    let sanitized: String = namespace
        .chars()
        .filter_map(|c| match c {
            '_' => Some('-'),
            c if c.is_ascii_alphanumeric() || c == '-' || c == '.' => Some(c),
            _ => None,
        })
        .collect();
    finish(&sanitized, MAX_HOSTNAME_LENGTH)
}

/// Resolve the identity for a mover
///
/// Each field resolves independently: explicit override, then the source
/// identity hint (the source's name and namespace), then the object's own
/// name and namespace.
#[must_use]
pub fn resolve_identity(
    username_override: Option<&str>,
    hostname_override: Option<&str>,
    source_identity: Option<&SourceIdentity>,
    object_name: &str,
    namespace: &str,
    pvc_name: Option<&str>,
) -> Identity {
    let (name, ns, pvc) = match source_identity {
        Some(hint) if !hint.source_name.is_empty() && !hint.source_namespace.is_empty() => (
            hint.source_name.as_str(),
            hint.source_namespace.as_str(),
            hint.source_pvc_name.as_deref(),
        ),
        _ => (object_name, namespace, pvc_name),
    };

    Identity {
        username: generate_username(username_override, name, ns),
        hostname: generate_hostname(hostname_override, pvc, ns, name),
    }
}

/// Trim separators, bound the length and fall back to the default token
fn finish(sanitized: &str, max_len: usize) -> String {
    let trimmed = trim_separators(sanitized);
    let truncated: String = trimmed.chars().take(max_len).collect();
    let result = trim_separators(&truncated);
    if result.is_empty() {
        DEFAULT_IDENTITY.to_string()
    } else {
        result.to_string()
    }
}

fn trim_separators(value: &str) -> &str {
    value.trim_matches(|c| c == '-' || c == '_' || c == '.')
}
