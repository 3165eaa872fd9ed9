//! Labor-marketplace side of the crowdlab experiment.
//!
//! Prices listing batches, checks the requester balance, registers
//! listing types with the standard worker constraints, publishes
//! listings and renders the listing configuration artifact consumed by
//! the deployed application.

mod client;
mod config;
mod economics;
mod error;
mod listing;
mod mturk;
mod types;

pub use client::{ListingRequest, ListingTypeRequest, Marketplace, MockMarketplace};
pub use config::MarketConfig;
pub use economics::{
    cost, has_sufficient_balance, BULK_ASSIGNMENT_THRESHOLD, MARKETPLACE_FEE,
};
pub use error::{MarketError, MarketResult};
pub use listing::{
    ListingLifecycleManager, AUTO_APPROVAL_DELAY_SECS, LISTING_LIFETIME_SECS, LOCALE_COUNTRIES,
};
pub use mturk::MturkMarketplace;
pub use types::{
    CreatedListing, ListingConfig, ListingTypeId, ListingTypeSpec, PaymentAction,
    LISTING_CONFIG_FILE, PRODUCTION_SUBMIT_URL, SANDBOX_SUBMIT_URL,
};
