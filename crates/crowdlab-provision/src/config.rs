//! Configuration for crowdlab-provision.

use std::path::PathBuf;
use std::time::Duration;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::Deserialize;

use crate::error::{ProvisionError, ProvisionResult};
use crate::types::DatabaseCredentials;

/// Fixed, human-readable name of the database security group.
pub const SECURITY_GROUP_NAME: &str = "crowdlab-db-security-group";

/// Description attached to the database security group on creation.
pub const SECURITY_GROUP_DESCRIPTION: &str = "Security group for the crowdlab experiment database";

/// Top-level configuration for the provisioning pipeline.
///
/// Constructed once and passed to every component; nothing reads ambient
/// process state for naming or credentials.
#[derive(Debug, Clone, Deserialize)]
pub struct StackConfig {
    /// Namespace embedded in every user-scoped resource name.
    ///
    /// Two operators with different namespaces can run the pipeline
    /// concurrently without touching each other's resources.
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Cloud provider settings.
    #[serde(default)]
    pub aws: AwsConfig,

    /// Managed database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Reconciliation loop settings.
    #[serde(default)]
    pub provisioning: ProvisioningConfig,

    /// Deployment publisher settings.
    #[serde(default)]
    pub deploy: DeployConfig,

    /// Teardown settings.
    #[serde(default)]
    pub teardown: TeardownConfig,
}

fn default_namespace() -> String {
    "local".to_owned()
}

impl StackConfig {
    /// Load configuration from the default sources.
    ///
    /// Configuration is loaded in the following order (later sources override earlier):
    /// 1. Default values
    /// 2. `crowdlab.toml` in the current directory (if present)
    /// 3. Environment variables with `CROWDLAB_` prefix
    pub fn load() -> ProvisionResult<Self> {
        Figment::new()
            .merge(Toml::file("crowdlab.toml"))
            .merge(Env::prefixed("CROWDLAB_").split("__"))
            .extract()
            .map_err(|e| ProvisionError::Config(e.to_string()))
    }

    /// Load configuration from a specific TOML file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> ProvisionResult<Self> {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("CROWDLAB_").split("__"))
            .extract()
            .map_err(|e| ProvisionError::Config(e.to_string()))
    }

    /// Identifier of the managed database instance.
    #[must_use]
    pub fn instance_identifier(&self) -> String {
        format!("crowdlab-db-{}", self.namespace)
    }

    /// Name of the database created inside the instance.
    #[must_use]
    pub fn database_name(&self) -> String {
        format!("crowdlab_db_{}", self.namespace)
    }

    /// Location of the managed database at the given endpoint host.
    #[must_use]
    pub fn database_location(&self, host: &str) -> crate::schema::DatabaseLocation {
        crate::schema::DatabaseLocation {
            host: host.to_owned(),
            port: self.database.port,
            database: self.database_name(),
            credentials: self.database.credentials.clone(),
        }
    }
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            aws: AwsConfig::default(),
            database: DatabaseConfig::default(),
            provisioning: ProvisioningConfig::default(),
            deploy: DeployConfig::default(),
            teardown: TeardownConfig::default(),
        }
    }
}

/// Cloud provider settings.
#[derive(Debug, Clone, Deserialize)]
pub struct AwsConfig {
    /// Region every managed resource lives in.
    #[serde(default = "default_region")]
    pub region: String,

    /// Named credentials profile, if not using the default chain.
    pub profile: Option<String>,
}

fn default_region() -> String {
    "us-east-1".to_owned()
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            profile: None,
        }
    }
}

/// Managed database settings.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Desired instance class.
    #[serde(default = "default_instance_class")]
    pub instance_class: String,

    /// Database port the security group opens.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Allocated storage in GB.
    #[serde(default = "default_allocated_storage_gb")]
    pub allocated_storage_gb: i32,

    /// Master credentials.
    #[serde(default = "default_credentials")]
    pub credentials: DatabaseCredentials,
}

fn default_instance_class() -> String {
    "db.t2.medium".to_owned()
}

const fn default_port() -> u16 {
    5432
}

const fn default_allocated_storage_gb() -> i32 {
    20
}

fn default_credentials() -> DatabaseCredentials {
    DatabaseCredentials {
        username: "crowdlab_user".to_owned(),
        password: "crowdlab_user_password".to_owned(),
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            instance_class: default_instance_class(),
            port: default_port(),
            allocated_storage_gb: default_allocated_storage_gb(),
            credentials: default_credentials(),
        }
    }
}

/// Reconciliation loop settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ProvisioningConfig {
    /// Seconds between status polls.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Wall-clock bound on a single reconciliation run, in seconds.
    #[serde(default = "default_max_wait_secs")]
    pub max_wait_secs: u64,
}

const fn default_poll_interval_secs() -> u64 {
    5
}

const fn default_max_wait_secs() -> u64 {
    1800
}

impl ProvisioningConfig {
    /// Interval between status polls.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Maximum time a reconciliation run may take.
    #[must_use]
    pub const fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs)
    }
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            max_wait_secs: default_max_wait_secs(),
        }
    }
}

/// Deployment publisher settings.
#[derive(Debug, Clone, Deserialize)]
pub struct DeployConfig {
    /// Login user on the compute target.
    #[serde(default = "default_remote_user")]
    pub remote_user: String,

    /// Application root directory on the compute target.
    #[serde(default = "default_app_root")]
    pub app_root: String,

    /// Name of the serving process restarted after upload.
    #[serde(default = "default_service")]
    pub service: String,

    /// Height of the worker-facing UI frame, in pixels.
    #[serde(default = "default_frame_height")]
    pub frame_height: u32,

    /// Directory where generated configuration artifacts are written.
    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: PathBuf,
}

fn default_remote_user() -> String {
    "ubuntu".to_owned()
}

fn default_app_root() -> String {
    "/var/www/crowdlab".to_owned()
}

fn default_service() -> String {
    "uwsgi".to_owned()
}

const fn default_frame_height() -> u32 {
    650
}

fn default_artifact_dir() -> PathBuf {
    std::env::temp_dir().join("crowdlab")
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            remote_user: default_remote_user(),
            app_root: default_app_root(),
            service: default_service(),
            frame_height: default_frame_height(),
            artifact_dir: default_artifact_dir(),
        }
    }
}

/// Teardown settings.
#[derive(Debug, Clone, Deserialize)]
pub struct TeardownConfig {
    /// Name of the provisioning role removed on teardown.
    #[serde(default = "default_role_name")]
    pub role_name: String,

    /// Policies detached from the role before it is deleted.
    #[serde(default = "default_policy_arns")]
    pub policy_arns: Vec<String>,
}

fn default_role_name() -> String {
    "crowdlab-provisioning-role".to_owned()
}

fn default_policy_arns() -> Vec<String> {
    vec![
        "arn:aws:iam::aws:policy/AmazonRDSFullAccess".to_owned(),
        "arn:aws:iam::aws:policy/AmazonMechanicalTurkFullAccess".to_owned(),
    ]
}

impl Default for TeardownConfig {
    fn default() -> Self {
        Self {
            role_name: default_role_name(),
            policy_arns: default_policy_arns(),
        }
    }
}
