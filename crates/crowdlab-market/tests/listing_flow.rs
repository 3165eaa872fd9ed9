//! Budget-to-publish flow against the in-memory marketplace.

use std::sync::Arc;

use crowdlab_market::{
    cost, has_sufficient_balance, ListingConfig, ListingLifecycleManager, ListingTypeSpec,
    MarketConfig, MarketError, Marketplace, MockMarketplace, PaymentAction, SANDBOX_SUBMIT_URL,
};

fn spec() -> ListingTypeSpec {
    ListingTypeSpec {
        title: "Describe an image".to_owned(),
        description: "Write one sentence describing the image".to_owned(),
        keywords: "image,caption".to_owned(),
        reward: 0.50,
        assignment_duration_secs: 1800,
    }
}

#[tokio::test]
async fn priced_batch_is_published_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let marketplace = Arc::new(MockMarketplace::default());
    let config = MarketConfig {
        sandbox: true,
        artifact_dir: dir.path().to_path_buf(),
        ..MarketConfig::default()
    };
    let manager = ListingLifecycleManager::new(
        Arc::clone(&marketplace) as Arc<dyn Marketplace>,
        config,
    );

    let batch = PaymentAction::Reward {
        listings: 2,
        assignments: 10,
        reward: 0.50,
    };
    let required = cost(&batch);
    assert!((required - 14.4).abs() < 1e-9);
    assert!(has_sufficient_balance(marketplace.as_ref(), required)
        .await
        .unwrap());

    let type_id = manager.create_type(&spec()).await.unwrap();
    for _ in 0..2 {
        manager
            .create_listing(&type_id, "https://app.example.com/task?hit=1&worker=2", 10)
            .await
            .unwrap();
    }
    assert_eq!(marketplace.listing_requests().len(), 2);

    let path = manager
        .write_listing_config("Write one sentence describing the image", 2, 10)
        .unwrap();
    let artifact: ListingConfig =
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
    assert!(artifact.is_sandbox);
    assert_eq!(artifact.submit_url, SANDBOX_SUBMIT_URL);
    assert_eq!(artifact.num_listings, 2);
}

#[tokio::test]
async fn unlinked_account_aborts_before_publishing() {
    let marketplace = Arc::new(MockMarketplace::unlinked());
    let manager = ListingLifecycleManager::new(
        Arc::clone(&marketplace) as Arc<dyn Marketplace>,
        MarketConfig::default(),
    );

    let err = has_sufficient_balance(marketplace.as_ref(), 1.0)
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::AccountNotLinked));

    let err = manager.create_type(&spec()).await.unwrap_err();
    assert!(matches!(err, MarketError::AccountNotLinked));
    assert!(marketplace.type_requests().is_empty());
}

#[tokio::test]
async fn insufficient_balance_is_reported_not_fatal() {
    let marketplace = Arc::new(MockMarketplace::with_balance(5.0));
    assert!(!has_sufficient_balance(marketplace.as_ref(), 10.0)
        .await
        .unwrap());
}
