//! # Credential Files
//!
//! Some backends read their credentials from files rather than the environment.
//! Those secret keys are projected into a single volume mounted at
//! `/credentials`, one file per key present in the repository secret, and the
//! container is told the file paths through literal environment variables.

use crate::constants::CREDENTIALS_MOUNT_PATH;
use k8s_openapi::api::core::v1::{
    EnvVar, KeyToPath, Secret, SecretVolumeSource, Volume, VolumeMount,
};

/// Name of the pod volume carrying credential files
pub const CREDENTIALS_VOLUME_NAME: &str = "credentials";

/// Mode applied to credential files without an explicit mode (0400)
pub const DEFAULT_CREDENTIAL_FILE_MODE: i32 = 0o400;

/// One secret key that is mounted as a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CredentialFile {
    /// Key in the repository secret
    pub key: &'static str,
    /// File name under the credentials mount
    pub file_name: &'static str,
    /// Variable telling the entry point where the file is
    pub env_var: &'static str,
    /// File mode, `None` for the volume default
    pub mode: Option<i32>,
}

impl CredentialFile {
    /// Absolute path of the file inside the container
    #[must_use]
    pub fn path(&self) -> String {
        format!("{CREDENTIALS_MOUNT_PATH}/{}", self.file_name)
    }
}

/// Every file-based credential the mover knows about
pub const CREDENTIAL_FILES: &[CredentialFile] = &[
    CredentialFile {
        key: "GOOGLE_APPLICATION_CREDENTIALS",
        file_name: "gcs.json",
        env_var: "GOOGLE_APPLICATION_CREDENTIALS",
        mode: None,
    },
    CredentialFile {
        key: "GOOGLE_DRIVE_CREDENTIALS",
        file_name: "gdrive.json",
        env_var: "GOOGLE_DRIVE_CREDENTIALS_FILE",
        mode: None,
    },
    CredentialFile {
        key: "SFTP_KEY_FILE",
        file_name: "sftp_key",
        env_var: "SFTP_KEY_FILE",
        mode: Some(0o600),
    },
    CredentialFile {
        key: "SFTP_KNOWN_HOSTS_DATA",
        file_name: "known_hosts",
        env_var: "SFTP_KNOWN_HOSTS_FILE",
        mode: None,
    },
];

/// Credential files whose key is present in `secret`
///
/// Both `data` and `stringData` are consulted.
#[must_use]
pub fn present_credential_files(secret: &Secret) -> Vec<&'static CredentialFile> {
    let has_key = |key: &str| {
        secret.data.as_ref().is_some_and(|d| d.contains_key(key))
            || secret.string_data.as_ref().is_some_and(|d| d.contains_key(key))
    };
    CREDENTIAL_FILES.iter().filter(|f| has_key(f.key)).collect()
}

/// Secret volume and mount for the given credential files
///
/// Returns `None` when `files` is empty so no empty mount is emitted.
#[must_use]
pub fn credential_volume(
    secret_name: &str,
    files: &[&CredentialFile],
) -> Option<(Volume, VolumeMount)> {
    if files.is_empty() {
        return None;
    }

    let items = files
        .iter()
        .map(|f| KeyToPath {
            key: f.key.to_string(),
            path: f.file_name.to_string(),
            mode: f.mode,
        })
        .collect();

    let volume = Volume {
        name: CREDENTIALS_VOLUME_NAME.to_string(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(secret_name.to_string()),
            items: Some(items),
            default_mode: Some(DEFAULT_CREDENTIAL_FILE_MODE),
            ..Default::default()
        }),
        ..Default::default()
    };
    let mount = VolumeMount {
        name: CREDENTIALS_VOLUME_NAME.to_string(),
        mount_path: CREDENTIALS_MOUNT_PATH.to_string(),
        read_only: Some(true),
        ..Default::default()
    };
    Some((volume, mount))
}

/// Literal path variables for the given credential files
#[must_use]
pub fn credential_env(files: &[&CredentialFile]) -> Vec<EnvVar> {
    files
        .iter()
        .map(|f| EnvVar {
            name: f.env_var.to_string(),
            value: Some(f.path()),
            ..Default::default()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::ByteString;
    use std::collections::BTreeMap;

    fn secret_with(keys: &[&str]) -> Secret {
        let data: BTreeMap<String, ByteString> = keys
            .iter()
            .map(|k| ((*k).to_string(), ByteString(b"x".to_vec())))
            .collect();
        Secret {
            data: Some(data),
            ..Default::default()
        }
    }

    #[test]
    fn test_no_file_keys_means_no_volume() {
        let secret = secret_with(&["KOPIA_PASSWORD", "KOPIA_REPOSITORY"]);
        let files = present_credential_files(&secret);
        assert!(files.is_empty());
        assert!(credential_volume("repo", &files).is_none());
        assert!(credential_env(&files).is_empty());
    }

    #[test]
    fn test_sftp_key_gets_restrictive_mode() {
        let secret = secret_with(&["SFTP_KEY_FILE", "SFTP_KNOWN_HOSTS_DATA"]);
        let files = present_credential_files(&secret);
        let (volume, mount) = credential_volume("repo", &files).unwrap();

        let source = volume.secret.unwrap();
        assert_eq!(source.secret_name.as_deref(), Some("repo"));
        assert_eq!(source.default_mode, Some(0o400));
        let items = source.items.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].path, "sftp_key");
        assert_eq!(items[0].mode, Some(0o600));
        assert_eq!(items[1].path, "known_hosts");
        assert_eq!(items[1].mode, None);
        assert_eq!(mount.mount_path, "/credentials");
    }

    #[test]
    fn test_one_file_per_present_key() {
        let secret = secret_with(&["GOOGLE_APPLICATION_CREDENTIALS"]);
        let files = present_credential_files(&secret);
        let (volume, _) = credential_volume("repo", &files).unwrap();
        let items = volume.secret.unwrap().items.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].key, "GOOGLE_APPLICATION_CREDENTIALS");
        assert_eq!(items[0].path, "gcs.json");
    }

    #[test]
    fn test_paths_exposed_as_literals() {
        let secret = secret_with(&["GOOGLE_DRIVE_CREDENTIALS"]);
        let env = credential_env(&present_credential_files(&secret));
        assert_eq!(env.len(), 1);
        assert_eq!(env[0].name, "GOOGLE_DRIVE_CREDENTIALS_FILE");
        assert_eq!(env[0].value.as_deref(), Some("/credentials/gdrive.json"));
        assert!(env[0].value_from.is_none());
    }

    #[test]
    fn test_string_data_keys_are_recognised() {
        let secret = Secret {
            string_data: Some(BTreeMap::from([(
                "SFTP_KEY_FILE".to_string(),
                "-----BEGIN".to_string(),
            )])),
            ..Default::default()
        };
        assert_eq!(present_credential_files(&secret).len(), 1);
    }
}
