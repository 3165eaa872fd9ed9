//! Listing cost rules and the pre-flight balance check.
//!
//! The marketplace charges a 20% fee on every reward and bonus payment,
//! and a further 20% surcharge on rewards for batches accepting ten or
//! more assignments per listing.

use crate::client::Marketplace;
use crate::error::MarketResult;
use crate::types::PaymentAction;

/// Fee multiplier applied to every payment.
pub const MARKETPLACE_FEE: f64 = 1.2;

/// Assignment count at which the bulk surcharge applies.
pub const BULK_ASSIGNMENT_THRESHOLD: u32 = 10;

/// Total fee-inclusive cost of a payment action, in dollars.
#[must_use]
pub fn cost(action: &PaymentAction) -> f64 {
    match action {
        PaymentAction::Reward {
            listings,
            assignments,
            reward,
        } => {
            let mut total =
                f64::from(*listings) * f64::from(*assignments) * reward * MARKETPLACE_FEE;
            if *assignments >= BULK_ASSIGNMENT_THRESHOLD {
                total *= MARKETPLACE_FEE;
            }
            total
        }
        PaymentAction::Bonus { amount } => amount * MARKETPLACE_FEE,
    }
}

/// Whether the account balance covers the required amount plus fees.
///
/// Exact equality counts as sufficient.
pub async fn has_sufficient_balance(
    marketplace: &dyn Marketplace,
    required: f64,
) -> MarketResult<bool> {
    let balance = marketplace.account_balance().await?;
    Ok(balance >= required * MARKETPLACE_FEE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockMarketplace;
    use crate::error::MarketError;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn reward_cost_includes_fee() {
        let action = PaymentAction::Reward {
            listings: 2,
            assignments: 1,
            reward: 0.50,
        };
        assert!(close(cost(&action), 1.2));
    }

    #[test]
    fn bulk_batches_pay_a_compounding_surcharge() {
        let action = PaymentAction::Reward {
            listings: 2,
            assignments: 10,
            reward: 0.50,
        };
        assert!(close(cost(&action), 14.4));

        // One assignment under the threshold: no surcharge.
        let action = PaymentAction::Reward {
            listings: 2,
            assignments: 9,
            reward: 0.50,
        };
        assert!(close(cost(&action), 10.8));
    }

    #[test]
    fn bonus_cost_is_fee_only() {
        let action = PaymentAction::Bonus { amount: 100.0 };
        assert!(close(cost(&action), 120.0));
    }

    #[tokio::test]
    async fn boundary_balance_is_sufficient() {
        let marketplace = MockMarketplace::with_balance(12.0);
        assert!(has_sufficient_balance(&marketplace, 10.0).await.unwrap());

        let marketplace = MockMarketplace::with_balance(11.99);
        assert!(!has_sufficient_balance(&marketplace, 10.0).await.unwrap());
    }

    #[tokio::test]
    async fn unlinked_account_surfaces_fatal_error() {
        let marketplace = MockMarketplace::unlinked();
        let err = has_sufficient_balance(&marketplace, 1.0).await.unwrap_err();
        assert!(matches!(err, MarketError::AccountNotLinked));
    }
}
