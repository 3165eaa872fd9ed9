//! Core types for crowdlab-provision.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Lifecycle status of the managed database instance, as reported by the
/// provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstanceStatus {
    /// Instance is being created.
    Creating,
    /// Instance is ready and has an endpoint.
    Available,
    /// Instance is being deleted.
    Deleting,
    /// Instance is taking a backup.
    BackingUp,
    /// Instance configuration is being modified.
    Modifying,
    /// Instance entered a failed state.
    Failed,
}

impl InstanceStatus {
    /// Parse a provider status string.
    ///
    /// Returns `None` for statuses this pipeline does not model; callers
    /// surface those as unclassified provider errors rather than guessing.
    #[must_use]
    pub fn parse(status: &str) -> Option<Self> {
        match status {
            "creating" => Some(Self::Creating),
            "available" => Some(Self::Available),
            "deleting" => Some(Self::Deleting),
            "backing-up" => Some(Self::BackingUp),
            "modifying" => Some(Self::Modifying),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Get the status name as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Creating => "creating",
            Self::Available => "available",
            Self::Deleting => "deleting",
            Self::BackingUp => "backing-up",
            Self::Modifying => "modifying",
            Self::Failed => "failed",
        }
    }

    /// Whether the status resolves on its own and should simply be polled.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Creating | Self::BackingUp | Self::Modifying)
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A point-in-time description of a live database instance.
#[derive(Debug, Clone)]
pub struct InstanceDescription {
    /// Current lifecycle status.
    pub status: InstanceStatus,
    /// Instance class the instance is actually running as.
    pub instance_class: String,
    /// Endpoint host address, present only once the instance is available.
    pub endpoint: Option<String>,
}

/// Outcome of inspecting a live database against the expected schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseHealth {
    /// Schema matches expectations.
    Healthy,
    /// Expected tables are absent; schema initialisation will create them.
    MissingTable,
    /// Tables exist but do not match the expected shape.
    InconsistentSchema,
    /// Inspection itself failed in a way that cannot be classified.
    UnknownError,
}

impl DatabaseHealth {
    /// Whether the instance can be brought to a good state in place.
    ///
    /// Healthy and missing-table databases are acceptable (the latter just
    /// needs initialisation); anything else forces full recreation.
    #[must_use]
    pub const fn is_recoverable_in_place(&self) -> bool {
        matches!(self, Self::Healthy | Self::MissingTable)
    }

    /// Get the health name as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::MissingTable => "missing_table",
            Self::InconsistentSchema => "inconsistent_schema",
            Self::UnknownError => "unknown_error",
        }
    }
}

impl fmt::Display for DatabaseHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Master credentials for the managed database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseCredentials {
    /// Master username.
    pub username: String,
    /// Master password.
    pub password: String,
}

/// The compute host that receives the deployed application.
#[derive(Debug, Clone)]
pub struct DeployTarget {
    /// Hostname of the compute instance.
    pub host: String,
    /// Path to the private key used to authenticate the channel.
    pub key_path: PathBuf,
}

impl DeployTarget {
    /// Create a new deploy target.
    #[must_use]
    pub fn new(host: impl Into<String>, key_path: impl Into<PathBuf>) -> Self {
        Self {
            host: host.into(),
            key_path: key_path.into(),
        }
    }
}

/// Ordered set of local artifacts to push to the compute target.
///
/// The publisher appends its generated database configuration artifact;
/// the optional listing configuration artifact is listed here so it is
/// transferred and cleaned up alongside the task files.
#[derive(Debug, Clone, Default)]
pub struct DeploymentManifest {
    /// Task-specific files to copy.
    pub task_files: Vec<PathBuf>,
    /// Generated listing configuration artifact, if one was produced.
    pub listing_config: Option<PathBuf>,
}

impl DeploymentManifest {
    /// Create a manifest from a list of task files.
    #[must_use]
    pub fn new(task_files: Vec<PathBuf>) -> Self {
        Self {
            task_files,
            listing_config: None,
        }
    }

    /// Attach the listing configuration artifact.
    #[must_use]
    pub fn with_listing_config(mut self, path: impl Into<PathBuf>) -> Self {
        self.listing_config = Some(path.into());
        self
    }
}

/// Endpoint URLs of the deployed application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    /// Endpoint serving the worker-facing pages.
    pub html_url: String,
    /// Endpoint serving the data API.
    pub json_url: String,
}

impl Endpoints {
    /// Derive the endpoint URLs for a deploy target host.
    #[must_use]
    pub fn for_host(host: &str) -> Self {
        Self {
            html_url: format!("https://{host}/html"),
            json_url: format!("https://{host}/json"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parse_roundtrip() {
        for status in [
            InstanceStatus::Creating,
            InstanceStatus::Available,
            InstanceStatus::Deleting,
            InstanceStatus::BackingUp,
            InstanceStatus::Modifying,
            InstanceStatus::Failed,
        ] {
            assert_eq!(InstanceStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(InstanceStatus::parse("rebooting"), None);
    }

    #[test]
    fn transient_statuses() {
        assert!(InstanceStatus::Creating.is_transient());
        assert!(InstanceStatus::Modifying.is_transient());
        assert!(InstanceStatus::BackingUp.is_transient());
        assert!(!InstanceStatus::Available.is_transient());
        assert!(!InstanceStatus::Deleting.is_transient());
        assert!(!InstanceStatus::Failed.is_transient());
    }

    #[test]
    fn health_classification() {
        assert!(DatabaseHealth::Healthy.is_recoverable_in_place());
        assert!(DatabaseHealth::MissingTable.is_recoverable_in_place());
        assert!(!DatabaseHealth::InconsistentSchema.is_recoverable_in_place());
        assert!(!DatabaseHealth::UnknownError.is_recoverable_in_place());
    }

    #[test]
    fn endpoints_derived_from_host() {
        let endpoints = Endpoints::for_host("ec2-1-2-3-4.compute.amazonaws.com");
        assert_eq!(
            endpoints.html_url,
            "https://ec2-1-2-3-4.compute.amazonaws.com/html"
        );
        assert_eq!(
            endpoints.json_url,
            "https://ec2-1-2-3-4.compute.amazonaws.com/json"
        );
    }
}
