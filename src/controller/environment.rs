//! # Mover Environment
//!
//! Builds the container environment handed to the mover entry point.
//!
//! The variable names, their secret-versus-literal sourcing and the
//! `|SEP|` encoding of additional arguments form the contract with the mover
//! image. Backend variables are always emitted as optional secret references,
//! whether or not the key exists in the repository secret, so the secret can
//! change without the Job spec changing.

use crate::config::MoverSettings;
use crate::constants::{
    ADDITIONAL_ARGS_SEPARATOR, CACHE_MOUNT_PATH, CUSTOM_CA_FILE_NAME, CUSTOM_CA_MOUNT_PATH,
    DATA_MOUNT_PATH, POLICY_CONFIG_FILE_NAME, POLICY_CONFIG_MOUNT_PATH, REPOSITORY_PVC_URL,
};
use crate::controller::credentials::{credential_env, CredentialFile};
use crate::controller::identity::Identity;
use crate::controller::mover::{DestinationOptions, RoleConfig, SourceOptions};
use k8s_openapi::api::core::v1::{EnvVar, EnvVarSource, SecretKeySelector};

/// Backend variables passed through from the repository secret, by family
pub const BACKEND_VARIABLES: &[(&str, &[&str])] = &[
    (
        "s3",
        &[
            "KOPIA_S3_BUCKET",
            "KOPIA_S3_ENDPOINT",
            "KOPIA_S3_DISABLE_TLS",
            "AWS_ACCESS_KEY_ID",
            "AWS_SECRET_ACCESS_KEY",
            "AWS_SESSION_TOKEN",
            "AWS_DEFAULT_REGION",
            "AWS_REGION",
            "AWS_PROFILE",
            "AWS_S3_ENDPOINT",
            "AWS_S3_DISABLE_TLS",
        ],
    ),
    (
        "azure",
        &[
            "KOPIA_AZURE_CONTAINER",
            "KOPIA_AZURE_STORAGE_ACCOUNT",
            "KOPIA_AZURE_STORAGE_KEY",
            "KOPIA_AZURE_SAS_TOKEN",
            "KOPIA_AZURE_ENDPOINT_SUFFIX",
            "AZURE_ACCOUNT_NAME",
            "AZURE_ACCOUNT_KEY",
            "AZURE_ACCOUNT_SAS",
            "AZURE_ENDPOINT_SUFFIX",
            "AZURE_STORAGE_ACCOUNT",
            "AZURE_STORAGE_KEY",
            "AZURE_STORAGE_SAS_TOKEN",
        ],
    ),
    ("gcs", &["KOPIA_GCS_BUCKET", "GOOGLE_PROJECT_ID"]),
    ("gdrive", &["GOOGLE_DRIVE_FOLDER_ID"]),
    (
        "b2",
        &["KOPIA_B2_BUCKET", "B2_ACCOUNT_ID", "B2_APPLICATION_KEY"],
    ),
    ("webdav", &["WEBDAV_URL", "WEBDAV_USERNAME", "WEBDAV_PASSWORD"]),
    (
        "sftp",
        &[
            "SFTP_HOST",
            "SFTP_PORT",
            "SFTP_USERNAME",
            "SFTP_PASSWORD",
            "SFTP_PATH",
        ],
    ),
    ("rclone", &["RCLONE_REMOTE_PATH", "RCLONE_EXE", "RCLONE_CONFIG"]),
    ("filesystem", &["KOPIA_FS_PATH"]),
];

/// Everything the environment depends on for one mover run
#[derive(Debug, Clone)]
pub struct EnvironmentContext<'a> {
    pub repository_secret: &'a str,
    pub identity: &'a Identity,
    pub role: &'a RoleConfig,
    pub settings: &'a MoverSettings,
    /// A repository PVC replaces the secret's repository URL
    pub uses_repository_pvc: bool,
    /// Connection comes from `KOPIA_MANUAL_CONFIG`; the URL key may be absent
    pub manual_config: bool,
    pub privileged: bool,
    pub source_path_override: Option<&'a str>,
    pub additional_args: &'a [String],
    pub has_custom_ca: bool,
    pub has_policy_config: bool,
    /// Source only: repository maintenance is due on this run
    pub run_maintenance: bool,
    pub credential_files: &'a [&'static CredentialFile],
}

/// Build the full mover environment
///
/// Total over its input. Manual configuration is forwarded by reference and
/// never parsed here.
#[must_use]
pub fn build_environment(ctx: &EnvironmentContext<'_>) -> Vec<EnvVar> {
    let secret = ctx.repository_secret;
    let mut env = vec![
        literal("DATA_DIR", DATA_MOUNT_PATH),
        literal("KOPIA_CACHE_DIR", CACHE_MOUNT_PATH),
        secret_ref("KOPIA_PASSWORD", secret, false),
    ];

    if ctx.uses_repository_pvc {
        env.push(literal("KOPIA_REPOSITORY", REPOSITORY_PVC_URL));
    } else {
        env.push(secret_ref("KOPIA_REPOSITORY", secret, ctx.manual_config));
    }
    env.push(secret_ref("KOPIA_MANUAL_CONFIG", secret, true));

    for (_, variables) in BACKEND_VARIABLES {
        env.extend(variables.iter().map(|name| secret_ref(name, secret, true)));
    }

    env.push(literal("KOPIA_OVERRIDE_USERNAME", &ctx.identity.username));
    env.push(literal("KOPIA_OVERRIDE_HOSTNAME", &ctx.identity.hostname));
    env.push(literal("DIRECTION", ctx.role.role().as_str()));
    env.push(literal(
        "PRIVILEGED_MOVER",
        if ctx.privileged { "1" } else { "0" },
    ));

    env.extend(settings_env(ctx.settings));

    if ctx.has_custom_ca {
        env.push(literal(
            "CUSTOM_CA",
            &format!("{CUSTOM_CA_MOUNT_PATH}/{CUSTOM_CA_FILE_NAME}"),
        ));
    }
    if ctx.has_policy_config {
        env.push(literal(
            "KOPIA_CONFIG_PATH",
            &format!("{POLICY_CONFIG_MOUNT_PATH}/{POLICY_CONFIG_FILE_NAME}"),
        ));
    }

    if !ctx.additional_args.is_empty() {
        env.push(literal(
            "KOPIA_ADDITIONAL_ARGS",
            &ctx.additional_args.join(ADDITIONAL_ARGS_SEPARATOR),
        ));
    }

    if let Some(path) = ctx.source_path_override.filter(|p| !p.is_empty()) {
        env.push(literal("KOPIA_SOURCE_PATH_OVERRIDE", path));
    }

    match ctx.role {
        RoleConfig::Source(opts) => env.extend(source_env(opts, ctx.run_maintenance)),
        RoleConfig::Destination(opts) => env.extend(destination_env(opts)),
    }

    env.extend(credential_env(ctx.credential_files));
    env
}

/// Proxy and debug variables from operator settings
fn settings_env(settings: &MoverSettings) -> Vec<EnvVar> {
    let mut env = Vec::new();
    let proxies = [
        ("HTTP_PROXY", "http_proxy", settings.proxy.http_proxy.as_deref()),
        ("HTTPS_PROXY", "https_proxy", settings.proxy.https_proxy.as_deref()),
        ("NO_PROXY", "no_proxy", settings.proxy.no_proxy.as_deref()),
    ];
    for (upper, lower, value) in proxies {
        if let Some(value) = value {
            env.push(literal(upper, value));
            env.push(literal(lower, value));
        }
    }
    if settings.debug_mover {
        env.push(literal("DEBUG_MOVER", "1"));
    }
    env
}

fn source_env(opts: &SourceOptions, run_maintenance: bool) -> Vec<EnvVar> {
    let mut env = Vec::new();

    if let Some(compression) = opts.compression.as_deref().filter(|c| !c.is_empty()) {
        env.push(literal("KOPIA_COMPRESSION", compression));
    }
    if let Some(parallelism) = opts.parallelism {
        env.push(literal("KOPIA_PARALLELISM", &parallelism.to_string()));
    }

    if let Some(retain) = &opts.retain {
        let policy = [
            ("KOPIA_RETAIN_HOURLY", retain.hourly),
            ("KOPIA_RETAIN_DAILY", retain.daily),
            ("KOPIA_RETAIN_WEEKLY", retain.weekly),
            ("KOPIA_RETAIN_MONTHLY", retain.monthly),
            ("KOPIA_RETAIN_YEARLY", retain.yearly),
            ("KOPIA_RETAIN_LATEST", retain.latest),
        ];
        env.extend(
            policy
                .into_iter()
                .filter_map(|(name, value)| value.map(|v| literal(name, &v.to_string()))),
        );
    }

    if let Some(actions) = &opts.actions {
        if let Some(cmd) = actions.before_snapshot.as_deref().filter(|c| !c.is_empty()) {
            env.push(literal("KOPIA_BEFORE_SNAPSHOT", cmd));
        }
        if let Some(cmd) = actions.after_snapshot.as_deref().filter(|c| !c.is_empty()) {
            env.push(literal("KOPIA_AFTER_SNAPSHOT", cmd));
        }
    }

    if run_maintenance {
        env.push(literal("KOPIA_RUN_MAINTENANCE", "true"));
    }
    env
}

fn destination_env(opts: &DestinationOptions) -> Vec<EnvVar> {
    let mut env = Vec::new();
    if let Some(as_of) = opts.restore_as_of.as_deref().filter(|t| !t.is_empty()) {
        env.push(literal("KOPIA_RESTORE_AS_OF", as_of));
    }
    if let Some(shallow) = opts.shallow {
        env.push(literal("KOPIA_SHALLOW", &shallow.to_string()));
    }
    if let Some(previous) = opts.previous {
        env.push(literal("KOPIA_PREVIOUS", &previous.to_string()));
    }
    if opts.enable_file_deletion {
        env.push(literal("KOPIA_ENABLE_FILE_DELETION", "true"));
    }
    env.push(literal("KOPIA_DISCOVER_SNAPSHOTS", "true"));
    env
}

fn literal(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        ..Default::default()
    }
}

/// Reference to the key of the same name in the repository secret
fn secret_ref(key: &str, secret_name: &str, optional: bool) -> EnvVar {
    EnvVar {
        name: key.to_string(),
        value: None,
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: secret_name.to_string(),
                key: key.to_string(),
                optional: Some(optional),
            }),
            ..Default::default()
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProxySettings;
    use crate::controller::credentials::CREDENTIAL_FILES;
    use crate::crd::{RetentionPolicy, SnapshotActions};

    fn identity() -> Identity {
        Identity {
            username: "webapp".to_string(),
            hostname: "prod".to_string(),
        }
    }

    fn source(opts: SourceOptions) -> RoleConfig {
        RoleConfig::Source(opts)
    }

    fn context<'a>(
        identity: &'a Identity,
        role: &'a RoleConfig,
        settings: &'a MoverSettings,
    ) -> EnvironmentContext<'a> {
        EnvironmentContext {
            repository_secret: "repo-secret",
            identity,
            role,
            settings,
            uses_repository_pvc: false,
            manual_config: false,
            privileged: false,
            source_path_override: None,
            additional_args: &[],
            has_custom_ca: false,
            has_policy_config: false,
            run_maintenance: false,
            credential_files: &[],
        }
    }

    fn find<'a>(env: &'a [EnvVar], name: &str) -> Option<&'a EnvVar> {
        env.iter().find(|e| e.name == name)
    }

    fn optional_flag(var: &EnvVar) -> Option<bool> {
        var.value_from
            .as_ref()
            .and_then(|v| v.secret_key_ref.as_ref())
            .and_then(|s| s.optional)
    }

    #[test]
    fn test_manual_config_makes_repository_reference_optional() {
        let id = identity();
        let role = source(SourceOptions::new("data"));
        let settings = MoverSettings::default();
        let mut ctx = context(&id, &role, &settings);
        ctx.manual_config = true;
        let env = build_environment(&ctx);

        let repo = find(&env, "KOPIA_REPOSITORY").unwrap();
        assert_eq!(optional_flag(repo), Some(true));
        let manual = find(&env, "KOPIA_MANUAL_CONFIG").unwrap();
        assert_eq!(optional_flag(manual), Some(true));
        assert_eq!(
            optional_flag(find(&env, "KOPIA_PASSWORD").unwrap()),
            Some(false)
        );
    }

    #[test]
    fn test_s3_secret_yields_mandatory_and_optional_references() {
        let id = identity();
        let role = source(SourceOptions::new("data"));
        let settings = MoverSettings::default();
        let env = build_environment(&context(&id, &role, &settings));

        let repo = find(&env, "KOPIA_REPOSITORY").unwrap();
        assert!(repo.value.is_none());
        assert_eq!(optional_flag(repo), Some(false));
        let password = find(&env, "KOPIA_PASSWORD").unwrap();
        assert_eq!(optional_flag(password), Some(false));

        for name in BACKEND_VARIABLES
            .iter()
            .find(|(family, _)| *family == "s3")
            .unwrap()
            .1
        {
            let var = find(&env, name).unwrap();
            assert!(var.value.is_none(), "{name} must not be a literal");
            assert_eq!(optional_flag(var), Some(true));
            let selector = var
                .value_from
                .as_ref()
                .and_then(|v| v.secret_key_ref.as_ref())
                .unwrap();
            assert_eq!(selector.name, "repo-secret");
            assert_eq!(selector.key, *name);
        }
    }

    #[test]
    fn test_every_backend_family_is_present() {
        let id = identity();
        let role = source(SourceOptions::new("data"));
        let settings = MoverSettings::default();
        let env = build_environment(&context(&id, &role, &settings));
        assert_eq!(BACKEND_VARIABLES.len(), 9);
        for (_, variables) in BACKEND_VARIABLES {
            for name in *variables {
                assert!(find(&env, name).is_some(), "{name} missing");
            }
        }
    }

    #[test]
    fn test_identity_pair_always_present() {
        let id = identity();
        let role = RoleConfig::Destination(DestinationOptions::default());
        let settings = MoverSettings::default();
        let env = build_environment(&context(&id, &role, &settings));
        assert_eq!(
            find(&env, "KOPIA_OVERRIDE_USERNAME").unwrap().value.as_deref(),
            Some("webapp")
        );
        assert_eq!(
            find(&env, "KOPIA_OVERRIDE_HOSTNAME").unwrap().value.as_deref(),
            Some("prod")
        );
    }

    #[test]
    fn test_only_hourly_retention_emits_one_variable() {
        let id = identity();
        let role = source(SourceOptions {
            retain: Some(RetentionPolicy {
                hourly: Some(24),
                ..Default::default()
            }),
            ..SourceOptions::new("data")
        });
        let settings = MoverSettings::default();
        let env = build_environment(&context(&id, &role, &settings));

        let retention: Vec<&EnvVar> = env
            .iter()
            .filter(|e| e.name.starts_with("KOPIA_RETAIN_"))
            .collect();
        assert_eq!(retention.len(), 1);
        assert_eq!(retention[0].name, "KOPIA_RETAIN_HOURLY");
        assert_eq!(retention[0].value.as_deref(), Some("24"));
    }

    #[test]
    fn test_repository_pvc_replaces_secret_url() {
        let id = identity();
        let role = source(SourceOptions::new("data"));
        let settings = MoverSettings::default();
        let mut ctx = context(&id, &role, &settings);
        ctx.uses_repository_pvc = true;
        let env = build_environment(&ctx);

        let repo = find(&env, "KOPIA_REPOSITORY").unwrap();
        assert_eq!(repo.value.as_deref(), Some("filesystem:///kopia/repository"));
        assert!(repo.value_from.is_none());
        assert_eq!(env.iter().filter(|e| e.name == "KOPIA_REPOSITORY").count(), 1);
    }

    #[test]
    fn test_additional_args_joined_without_validation() {
        let id = identity();
        let role = source(SourceOptions::new("data"));
        let settings = MoverSettings::default();
        let args = vec![
            "--one-file-system".to_string(),
            "--ignore-cache-dirs; rm -rf /".to_string(),
        ];
        let mut ctx = context(&id, &role, &settings);
        ctx.additional_args = &args;
        let env = build_environment(&ctx);
        assert_eq!(
            find(&env, "KOPIA_ADDITIONAL_ARGS").unwrap().value.as_deref(),
            Some("--one-file-system|SEP|--ignore-cache-dirs; rm -rf /")
        );
    }

    #[test]
    fn test_empty_actions_are_skipped() {
        let id = identity();
        let role = source(SourceOptions {
            actions: Some(SnapshotActions {
                before_snapshot: Some(String::new()),
                after_snapshot: Some("sync".to_string()),
            }),
            ..SourceOptions::new("data")
        });
        let settings = MoverSettings::default();
        let env = build_environment(&context(&id, &role, &settings));
        assert!(find(&env, "KOPIA_BEFORE_SNAPSHOT").is_none());
        assert_eq!(
            find(&env, "KOPIA_AFTER_SNAPSHOT").unwrap().value.as_deref(),
            Some("sync")
        );
    }

    #[test]
    fn test_destination_variables() {
        let id = identity();
        let role = RoleConfig::Destination(DestinationOptions {
            restore_as_of: Some("2024-01-01T00:00:00Z".to_string()),
            shallow: Some(3),
            previous: Some(1),
            ..Default::default()
        });
        let settings = MoverSettings::default();
        let mut ctx = context(&id, &role, &settings);
        ctx.source_path_override = Some("/var/lib/app");
        let env = build_environment(&ctx);

        assert_eq!(find(&env, "DIRECTION").unwrap().value.as_deref(), Some("destination"));
        assert_eq!(find(&env, "KOPIA_SHALLOW").unwrap().value.as_deref(), Some("3"));
        assert_eq!(find(&env, "KOPIA_PREVIOUS").unwrap().value.as_deref(), Some("1"));
        assert_eq!(
            find(&env, "KOPIA_DISCOVER_SNAPSHOTS").unwrap().value.as_deref(),
            Some("true")
        );
        assert_eq!(
            find(&env, "KOPIA_SOURCE_PATH_OVERRIDE").unwrap().value.as_deref(),
            Some("/var/lib/app")
        );
        assert!(find(&env, "KOPIA_ENABLE_FILE_DELETION").is_none());
        assert!(find(&env, "KOPIA_COMPRESSION").is_none());
    }

    #[test]
    fn test_settings_forward_proxy_and_debug() {
        let id = identity();
        let role = source(SourceOptions::new("data"));
        let settings = MoverSettings {
            debug_mover: true,
            proxy: ProxySettings {
                https_proxy: Some("http://proxy:3128".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let env = build_environment(&context(&id, &role, &settings));
        assert_eq!(find(&env, "DEBUG_MOVER").unwrap().value.as_deref(), Some("1"));
        assert_eq!(
            find(&env, "HTTPS_PROXY").unwrap().value.as_deref(),
            Some("http://proxy:3128")
        );
        assert!(find(&env, "https_proxy").is_some());
        assert!(find(&env, "HTTP_PROXY").is_none());
    }

    #[test]
    fn test_file_credentials_never_referenced_from_secret() {
        let id = identity();
        let role = source(SourceOptions::new("data"));
        let settings = MoverSettings::default();
        let files: Vec<&'static CredentialFile> = CREDENTIAL_FILES.iter().collect();
        let mut ctx = context(&id, &role, &settings);
        ctx.credential_files = &files;
        let env = build_environment(&ctx);

        let sftp_key = find(&env, "SFTP_KEY_FILE").unwrap();
        assert_eq!(sftp_key.value.as_deref(), Some("/credentials/sftp_key"));
        assert!(sftp_key.value_from.is_none());
        assert!(find(&env, "GOOGLE_DRIVE_CREDENTIALS").is_none());
    }

    #[test]
    fn test_maintenance_flag_only_when_due() {
        let id = identity();
        let role = source(SourceOptions::new("data"));
        let settings = MoverSettings::default();
        let mut ctx = context(&id, &role, &settings);
        assert!(find(&build_environment(&ctx), "KOPIA_RUN_MAINTENANCE").is_none());
        ctx.run_maintenance = true;
        assert_eq!(
            find(&build_environment(&ctx), "KOPIA_RUN_MAINTENANCE")
                .unwrap()
                .value
                .as_deref(),
            Some("true")
        );
    }
}
