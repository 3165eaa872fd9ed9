//! Marketplace client seam.
//!
//! The listing lifecycle talks to the marketplace through [`Marketplace`]
//! so pricing and publishing rules can be tested against the recording
//! [`MockMarketplace`]. The production implementation is
//! [`MturkMarketplace`](crate::MturkMarketplace).

use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{MarketError, MarketResult};
use crate::types::{ListingTypeId, ListingTypeSpec};

/// Request to register a reusable listing type.
#[derive(Debug, Clone)]
pub struct ListingTypeRequest {
    /// Listing type parameters.
    pub spec: ListingTypeSpec,
    /// Delay before submitted assignments auto-approve, in seconds.
    pub auto_approval_delay_secs: i64,
    /// Countries whose workers may take the listing.
    pub locale_countries: Vec<String>,
    /// Whether the locale constraint also gates previewing.
    pub required_to_preview: bool,
}

/// Request to publish one listing under an existing type.
#[derive(Debug, Clone)]
pub struct ListingRequest {
    /// Listing type to publish under.
    pub listing_type_id: ListingTypeId,
    /// Maximum assignments accepted.
    pub max_assignments: i32,
    /// How long the listing stays discoverable, in seconds.
    pub lifetime_secs: i64,
    /// Rendered external question document.
    pub question_xml: String,
}

/// Requester-side marketplace API.
#[async_trait]
pub trait Marketplace: Send + Sync {
    /// Available account balance, in dollars.
    ///
    /// Fails with [`MarketError::AccountNotLinked`] when the requester
    /// account is not linked to the cloud account.
    async fn account_balance(&self) -> MarketResult<f64>;

    /// Register a listing type and return its identifier.
    async fn create_listing_type(
        &self,
        request: &ListingTypeRequest,
    ) -> MarketResult<ListingTypeId>;

    /// Publish a listing and return its identifier.
    async fn create_listing(&self, request: &ListingRequest) -> MarketResult<String>;
}

// =============================================================================
// Mock implementation for tests
// =============================================================================

#[derive(Debug, Default)]
struct MockMarketplaceLog {
    type_requests: Vec<ListingTypeRequest>,
    listing_requests: Vec<ListingRequest>,
}

/// Recording in-memory marketplace.
///
/// Reports the sandbox's fixed balance unless overridden and hands out
/// sequential identifiers.
#[derive(Debug)]
pub struct MockMarketplace {
    balance: f64,
    linked: bool,
    log: Mutex<MockMarketplaceLog>,
}

impl Default for MockMarketplace {
    fn default() -> Self {
        // The sandbox always reports $10,000.
        Self::with_balance(10_000.0)
    }
}

impl MockMarketplace {
    /// Create a mock reporting the given balance.
    #[must_use]
    pub fn with_balance(balance: f64) -> Self {
        Self {
            balance,
            linked: true,
            log: Mutex::new(MockMarketplaceLog::default()),
        }
    }

    /// Create a mock whose account is not linked; every call fails.
    #[must_use]
    pub fn unlinked() -> Self {
        Self {
            balance: 0.0,
            linked: false,
            log: Mutex::new(MockMarketplaceLog::default()),
        }
    }

    fn ensure_linked(&self) -> MarketResult<()> {
        if self.linked {
            Ok(())
        } else {
            Err(MarketError::AccountNotLinked)
        }
    }

    fn lock(&self) -> MarketResult<std::sync::MutexGuard<'_, MockMarketplaceLog>> {
        self.log
            .lock()
            .map_err(|_| MarketError::provider("mock_lock", "poisoned"))
    }

    /// Listing type requests recorded so far.
    pub fn type_requests(&self) -> Vec<ListingTypeRequest> {
        self.log.lock().map(|l| l.type_requests.clone()).unwrap_or_default()
    }

    /// Listing requests recorded so far.
    pub fn listing_requests(&self) -> Vec<ListingRequest> {
        self.log.lock().map(|l| l.listing_requests.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Marketplace for MockMarketplace {
    async fn account_balance(&self) -> MarketResult<f64> {
        self.ensure_linked()?;
        Ok(self.balance)
    }

    async fn create_listing_type(
        &self,
        request: &ListingTypeRequest,
    ) -> MarketResult<ListingTypeId> {
        self.ensure_linked()?;
        let mut log = self.lock()?;
        log.type_requests.push(request.clone());
        Ok(ListingTypeId(format!("LTYPE{:04}", log.type_requests.len())))
    }

    async fn create_listing(&self, request: &ListingRequest) -> MarketResult<String> {
        self.ensure_linked()?;
        let mut log = self.lock()?;
        log.listing_requests.push(request.clone());
        Ok(format!("LISTING{:04}", log.listing_requests.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_reports_sandbox_balance() {
        let marketplace = MockMarketplace::default();
        assert_eq!(marketplace.account_balance().await.unwrap(), 10_000.0);
    }

    #[tokio::test]
    async fn unlinked_mock_fails_every_call() {
        let marketplace = MockMarketplace::unlinked();
        let err = marketplace.account_balance().await.unwrap_err();
        assert!(matches!(err, MarketError::AccountNotLinked));
    }

    #[tokio::test]
    async fn mock_hands_out_sequential_ids() {
        let marketplace = MockMarketplace::default();
        let request = ListingRequest {
            listing_type_id: ListingTypeId("LTYPE0001".to_owned()),
            max_assignments: 1,
            lifetime_secs: 60,
            question_xml: "<q/>".to_owned(),
        };

        assert_eq!(marketplace.create_listing(&request).await.unwrap(), "LISTING0001");
        assert_eq!(marketplace.create_listing(&request).await.unwrap(), "LISTING0002");
        assert_eq!(marketplace.listing_requests().len(), 2);
    }
}
