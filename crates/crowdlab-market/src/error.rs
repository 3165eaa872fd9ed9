//! Error types for crowdlab-market.

/// Result type alias using [`MarketError`].
pub type MarketResult<T> = Result<T, MarketError>;

/// Errors that can occur while pricing or publishing marketplace
/// listings.
#[derive(Debug, thiserror::Error)]
pub enum MarketError {
    /// The requester account is not linked to the cloud account.
    ///
    /// Fatal: no marketplace call can succeed until the operator links
    /// the accounts, so the message tells them exactly what to do.
    #[error(
        "marketplace account is not linked: your cloud account must be linked to \
         your requester account before the marketplace API can be used; visit \
         https://requestersandbox.mturk.com/developer to link them, then wait a \
         couple of minutes and try again"
    )]
    AccountNotLinked,

    /// Unclassified marketplace provider error.
    #[error("{operation} failed: {message}")]
    Provider {
        /// The operation that was being attempted.
        operation: &'static str,
        /// Provider-supplied error message.
        message: String,
    },

    /// Listing configuration artifact error.
    #[error("artifact error: {0}")]
    Artifact(#[from] std::io::Error),

    /// Serialisation error.
    #[error("serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl MarketError {
    /// Create an unclassified provider error.
    #[must_use]
    pub fn provider(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Provider {
            operation,
            message: message.into(),
        }
    }
}
