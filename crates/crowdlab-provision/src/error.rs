//! Error types for crowdlab-provision.

/// Result type alias using [`ProvisionError`].
pub type ProvisionResult<T> = Result<T, ProvisionError>;

/// Errors that can occur while provisioning, deploying or tearing down
/// the experiment stack.
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    /// Unclassified cloud provider error.
    ///
    /// Carries the resource identifier and the attempted operation so the
    /// failure is actionable without digging through logs.
    #[error("{operation} failed for {resource}: {message}")]
    Provider {
        /// Identifier of the resource the operation targeted.
        resource: String,
        /// The operation that was being attempted.
        operation: &'static str,
        /// Provider-supplied error message.
        message: String,
    },

    /// The provisioning deadline elapsed before the resource converged.
    #[error("provisioning timed out for {resource} after {waited_secs}s")]
    Timeout {
        /// Identifier of the resource that never converged.
        resource: String,
        /// How long the reconciliation loop waited.
        waited_secs: u64,
    },

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// Schema inspection or initialisation error.
    #[error("schema error: {0}")]
    Schema(String),

    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Secure channel error.
    #[error("ssh error: {0}")]
    Ssh(#[from] ssh2::Error),

    /// Local filesystem error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl ProvisionError {
    /// Create an unclassified provider error.
    #[must_use]
    pub fn provider(
        resource: impl Into<String>,
        operation: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self::Provider {
            resource: resource.into(),
            operation,
            message: message.into(),
        }
    }

    /// Create a schema error.
    #[must_use]
    pub fn schema(msg: impl Into<String>) -> Self {
        Self::Schema(msg.into())
    }
}
