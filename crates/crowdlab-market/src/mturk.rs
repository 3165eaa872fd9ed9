//! MTurk implementation of the marketplace seam.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_mturk::config::Region;
use aws_sdk_mturk::types::{Comparator, Locale, QualificationRequirement};
use tracing::debug;

use crate::client::{ListingRequest, ListingTypeRequest, Marketplace};
use crate::config::MarketConfig;
use crate::error::{MarketError, MarketResult};
use crate::types::ListingTypeId;

/// Sandbox requester endpoint; the live endpoint is the regional default.
const SANDBOX_ENDPOINT_URL: &str = "https://mturk-requester-sandbox.us-east-1.amazonaws.com";

/// System qualification type holding a worker's locale.
const LOCALE_QUALIFICATION_TYPE_ID: &str = "00000000000000000071";

/// Requester API client for MTurk.
#[derive(Debug, Clone)]
pub struct MturkMarketplace {
    client: aws_sdk_mturk::Client,
}

impl MturkMarketplace {
    /// Connect using the given settings, targeting the sandbox endpoint
    /// when configured.
    pub async fn connect(config: &MarketConfig) -> Self {
        let shared = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .load()
            .await;

        let mut builder = aws_sdk_mturk::config::Builder::from(&shared);
        if config.sandbox {
            builder = builder.endpoint_url(SANDBOX_ENDPOINT_URL);
        }
        Self {
            client: aws_sdk_mturk::Client::from_conf(builder.build()),
        }
    }
}

#[async_trait]
impl Marketplace for MturkMarketplace {
    async fn account_balance(&self) -> MarketResult<f64> {
        let result = self.client.get_account_balance().send().await;

        let output = match result {
            Ok(output) => output,
            Err(err) => {
                let service = err.into_service_error();
                // A request error here means the requester account was
                // never linked to the cloud account.
                if service.is_request_error() {
                    return Err(MarketError::AccountNotLinked);
                }
                return Err(MarketError::provider(
                    "get_account_balance",
                    service.to_string(),
                ));
            }
        };

        let raw = output.available_balance().unwrap_or_default();
        raw.parse::<f64>().map_err(|_| {
            MarketError::provider(
                "get_account_balance",
                format!("unparseable balance: {raw:?}"),
            )
        })
    }

    async fn create_listing_type(
        &self,
        request: &ListingTypeRequest,
    ) -> MarketResult<ListingTypeId> {
        let mut locales = Vec::with_capacity(request.locale_countries.len());
        for country in &request.locale_countries {
            locales.push(
                Locale::builder()
                    .country(country)
                    .build()
                    .map_err(|err| {
                        MarketError::provider("create_hit_type", err.to_string())
                    })?,
            );
        }
        let mut qualification = QualificationRequirement::builder()
            .qualification_type_id(LOCALE_QUALIFICATION_TYPE_ID)
            .comparator(Comparator::In)
            .required_to_preview(request.required_to_preview);
        for locale in locales {
            qualification = qualification.locale_values(locale);
        }
        let qualification = qualification
            .build()
            .map_err(|err| MarketError::provider("create_hit_type", err.to_string()))?;

        debug!(title = %request.spec.title, "registering listing type");
        let output = self
            .client
            .create_hit_type()
            .auto_approval_delay_in_seconds(request.auto_approval_delay_secs)
            .assignment_duration_in_seconds(request.spec.assignment_duration_secs)
            .reward(request.spec.reward.to_string())
            .title(&request.spec.title)
            .keywords(&request.spec.keywords)
            .description(&request.spec.description)
            .qualification_requirements(qualification)
            .send()
            .await
            .map_err(|err| {
                MarketError::provider("create_hit_type", err.into_service_error().to_string())
            })?;

        let id = output.hit_type_id().ok_or_else(|| {
            MarketError::provider("create_hit_type", "response carried no listing type id")
        })?;
        Ok(ListingTypeId(id.to_owned()))
    }

    async fn create_listing(&self, request: &ListingRequest) -> MarketResult<String> {
        debug!(listing_type = %request.listing_type_id, "publishing listing");
        let output = self
            .client
            .create_hit_with_hit_type()
            .hit_type_id(&request.listing_type_id.0)
            .max_assignments(request.max_assignments)
            .lifetime_in_seconds(request.lifetime_secs)
            .question(&request.question_xml)
            .send()
            .await
            .map_err(|err| {
                MarketError::provider(
                    "create_hit_with_hit_type",
                    err.into_service_error().to_string(),
                )
            })?;

        let listing_id = output
            .hit()
            .and_then(|hit| hit.hit_id())
            .ok_or_else(|| {
                MarketError::provider("create_hit_with_hit_type", "response carried no listing id")
            })?;
        Ok(listing_id.to_owned())
    }
}
