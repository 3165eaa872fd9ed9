//! Listing lifecycle: registering listing types and publishing listings.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use crate::client::{ListingRequest, ListingTypeRequest, Marketplace};
use crate::config::MarketConfig;
use crate::error::MarketResult;
use crate::types::{CreatedListing, ListingConfig, ListingTypeId, ListingTypeSpec};

/// Countries whose workers may preview and take the listings.
pub const LOCALE_COUNTRIES: [&str; 5] = ["US", "CA", "GB", "AU", "NZ"];

/// Submitted assignments auto-approve after four weeks.
pub const AUTO_APPROVAL_DELAY_SECS: i64 = 4 * 7 * 24 * 3600;

/// Listings stay discoverable for one year.
pub const LISTING_LIFETIME_SECS: i64 = 365 * 24 * 3600;

/// Registers listing types and publishes listings under them.
pub struct ListingLifecycleManager {
    marketplace: Arc<dyn Marketplace>,
    config: MarketConfig,
}

impl ListingLifecycleManager {
    /// Create a new manager.
    pub fn new(marketplace: Arc<dyn Marketplace>, config: MarketConfig) -> Self {
        Self {
            marketplace,
            config,
        }
    }

    /// Register a listing type with the locale constraint and the
    /// standard auto-approval delay.
    pub async fn create_type(&self, spec: &ListingTypeSpec) -> MarketResult<ListingTypeId> {
        let request = ListingTypeRequest {
            spec: spec.clone(),
            auto_approval_delay_secs: AUTO_APPROVAL_DELAY_SECS,
            locale_countries: LOCALE_COUNTRIES.iter().map(|&c| c.to_owned()).collect(),
            required_to_preview: true,
        };
        let id = self.marketplace.create_listing_type(&request).await?;
        info!(listing_type = %id, title = %spec.title, "listing type registered");
        Ok(id)
    }

    /// Publish one listing pointing workers at the given page.
    pub async fn create_listing(
        &self,
        listing_type_id: &ListingTypeId,
        page_url: &str,
        max_assignments: i32,
    ) -> MarketResult<CreatedListing> {
        let request = ListingRequest {
            listing_type_id: listing_type_id.clone(),
            max_assignments,
            lifetime_secs: LISTING_LIFETIME_SECS,
            question_xml: external_question(page_url, self.config.frame_height),
        };
        let listing_id = self.marketplace.create_listing(&request).await?;

        let preview_url = self.preview_url(listing_type_id);
        info!(listing = %listing_id, preview = %preview_url, "listing published");
        Ok(CreatedListing {
            listing_id,
            listing_type_id: listing_type_id.clone(),
            preview_url,
        })
    }

    /// Write the listing configuration artifact for a published batch.
    pub fn write_listing_config(
        &self,
        task_description: &str,
        num_listings: u32,
        num_assignments: u32,
    ) -> MarketResult<PathBuf> {
        let config = ListingConfig::new(
            task_description,
            num_listings,
            num_assignments,
            self.config.sandbox,
        );
        config.write(&self.config.artifact_dir)
    }

    fn preview_url(&self, listing_type_id: &ListingTypeId) -> String {
        let domain = if self.config.sandbox {
            "https://workersandbox.mturk.com"
        } else {
            "https://www.mturk.com"
        };
        format!("{domain}/mturk/preview?groupId={listing_type_id}")
    }
}

/// Render the external question document the marketplace embeds in its
/// worker-facing frame. Ampersands in the URL are XML-escaped.
fn external_question(page_url: &str, frame_height: u32) -> String {
    let escaped = page_url.replace('&', "&amp;");
    format!(
        "<ExternalQuestion xmlns=\"http://mechanicalturk.amazonaws.com/AWSMechanicalTurkDataSchemas/2006-07-14/ExternalQuestion.xsd\">\n\
         \x20\x20<ExternalURL>{escaped}</ExternalURL>\n\
         \x20\x20<FrameHeight>{frame_height}</FrameHeight>\n\
         </ExternalQuestion>\n"
    )
}
