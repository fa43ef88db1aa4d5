//! # Constants
//!
//! Shared constants used throughout the mover.
//!
//! Values that the in-container entry point depends on (mount paths, the
//! argument separator) are part of the wire contract with the mover image and
//! must not change without a matching image release.

/// Pod failures tolerated before the mover deletes and recreates the Job
pub const DEFAULT_JOB_BACKOFF_LIMIT: i32 = 8;

/// Default container image for the Kopia mover
pub const DEFAULT_KOPIA_IMAGE: &str = "quay.io/backube/volsync:latest";

/// Entry point inside the mover image
pub const MOVER_ENTRY_POINT: &str = "/mover-kopia/entry.sh";

/// Name of the single container in the mover pod
pub const MOVER_CONTAINER_NAME: &str = "kopia";

/// Mount path of the data volume (source or destination PVC)
pub const DATA_MOUNT_PATH: &str = "/data";

/// Mount path of the Kopia metadata cache
pub const CACHE_MOUNT_PATH: &str = "/cache";

/// Mount path of the repository PVC when a filesystem repository is used
pub const REPOSITORY_PVC_MOUNT_PATH: &str = "/kopia";

/// Repository URL handed to Kopia when the repository lives on a PVC
pub const REPOSITORY_PVC_URL: &str = "filesystem:///kopia/repository";

/// Mount path of the credential files volume
pub const CREDENTIALS_MOUNT_PATH: &str = "/credentials";

/// Mount path of the custom CA bundle
pub const CUSTOM_CA_MOUNT_PATH: &str = "/customca";

/// File name of the custom CA bundle inside its mount
pub const CUSTOM_CA_FILE_NAME: &str = "ca.crt";

/// Mount path of the policy configuration
pub const POLICY_CONFIG_MOUNT_PATH: &str = "/kopia-config";

/// File name of the repository/policy configuration inside its mount
pub const POLICY_CONFIG_FILE_NAME: &str = "repository.config";

/// Separator used to join additional CLI arguments into one env var
pub const ADDITIONAL_ARGS_SEPARATOR: &str = "|SEP|";

/// Default cache PVC capacity when a PVC is requested without a size
pub const DEFAULT_CACHE_PVC_CAPACITY: &str = "1Gi";

/// Default size cap for the ephemeral (EmptyDir) cache
pub const DEFAULT_CACHE_EMPTY_DIR_LIMIT: &str = "8Gi";

/// Default access mode when nothing else can be inherited
pub const DEFAULT_ACCESS_MODE: &str = "ReadWriteOnce";

/// Maximum length of a generated username
pub const MAX_USERNAME_LENGTH: usize = 50;

/// Maximum length of a generated hostname (DNS name ceiling)
pub const MAX_HOSTNAME_LENGTH: usize = 253;

/// Identity token used when sanitization leaves nothing
pub const DEFAULT_IDENTITY: &str = "volsync-default";

/// Maximum Kubernetes object name length we generate for Jobs
pub const MAX_JOB_NAME_LENGTH: usize = 63;

/// Number of log lines retained in the mover status
pub const MAX_STATUS_LOG_LINES: usize = 40;

/// Number of maintenance Jobs scanned when computing maintenance history
pub const DEFAULT_MAINTENANCE_HISTORY_LIMIT: usize = 10;

/// Label placed on every object the mover creates for the cleanup pass
pub const CLEANUP_LABEL: &str = "volsync.backube/cleanup";

/// Label identifying the owning replication object on created objects
pub const OWNER_NAME_LABEL: &str = "volsync.backube/owner-name";

/// Label marking Jobs that ran repository maintenance
pub const MAINTENANCE_LABEL: &str = "volsync.backube/kopia-maintenance";

/// Annotation on destination PVCs recording the snapshot to reuse
pub const SNAPSHOT_REUSE_ANNOTATION: &str = "volsync.backube/snapname";

/// Field manager used for every write the mover performs
pub const FIELD_MANAGER: &str = "volsync-kopia-mover";
