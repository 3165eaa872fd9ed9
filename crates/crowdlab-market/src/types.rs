//! Core types shared across the market crate.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::MarketResult;

/// Submit endpoint workers post results to in the sandbox marketplace.
pub const SANDBOX_SUBMIT_URL: &str = "https://workersandbox.mturk.com/mturk/externalSubmit";

/// Submit endpoint workers post results to in the live marketplace.
pub const PRODUCTION_SUBMIT_URL: &str = "https://www.mturk.com/mturk/externalSubmit";

/// File name of the generated listing configuration artifact.
pub const LISTING_CONFIG_FILE: &str = "listing_config.json";

/// A payment the requester is about to make.
#[derive(Debug, Clone, PartialEq)]
pub enum PaymentAction {
    /// Per-assignment reward across a batch of listings.
    Reward {
        /// Number of listings in the batch.
        listings: u32,
        /// Assignments accepted per listing.
        assignments: u32,
        /// Reward per assignment, in dollars.
        reward: f64,
    },
    /// A one-off bonus payment.
    Bonus {
        /// Bonus amount, in dollars.
        amount: f64,
    },
}

/// Reusable listing type parameters.
#[derive(Debug, Clone)]
pub struct ListingTypeSpec {
    /// Worker-facing title.
    pub title: String,
    /// Worker-facing description.
    pub description: String,
    /// Comma-separated search keywords.
    pub keywords: String,
    /// Reward per assignment, in dollars.
    pub reward: f64,
    /// How long a worker may hold an assignment, in seconds.
    pub assignment_duration_secs: i64,
}

/// Provider-assigned identifier of a listing type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListingTypeId(pub String);

impl fmt::Display for ListingTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A listing published to the marketplace.
#[derive(Debug, Clone)]
pub struct CreatedListing {
    /// Provider-assigned listing identifier.
    pub listing_id: String,
    /// Listing type the listing was published under.
    pub listing_type_id: ListingTypeId,
    /// Worker-facing preview URL for the listing group.
    pub preview_url: String,
}

/// Configuration artifact describing the published batch, consumed by
/// the server-side application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingConfig {
    /// Worker-facing task description.
    pub task_description: String,
    /// Number of listings in the batch.
    pub num_listings: u32,
    /// Assignments accepted per listing.
    pub num_assignments: u32,
    /// Whether the batch targets the sandbox marketplace.
    pub is_sandbox: bool,
    /// Endpoint workers post results to.
    pub submit_url: String,
}

impl ListingConfig {
    /// Build the artifact, deriving the submit URL from the sandbox flag.
    #[must_use]
    pub fn new(
        task_description: impl Into<String>,
        num_listings: u32,
        num_assignments: u32,
        is_sandbox: bool,
    ) -> Self {
        let submit_url = if is_sandbox {
            SANDBOX_SUBMIT_URL
        } else {
            PRODUCTION_SUBMIT_URL
        };
        Self {
            task_description: task_description.into(),
            num_listings,
            num_assignments,
            is_sandbox,
            submit_url: submit_url.to_owned(),
        }
    }

    /// Write the artifact into the given directory, replacing any
    /// previous one, and return its path.
    pub fn write(&self, dir: &Path) -> MarketResult<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(LISTING_CONFIG_FILE);
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        std::fs::write(&path, serde_json::to_string(self)?)?;
        Ok(path)
    }

    /// Remove a previously written artifact; absence is not an error.
    pub fn remove(dir: &Path) -> MarketResult<()> {
        let path = dir.join(LISTING_CONFIG_FILE);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
