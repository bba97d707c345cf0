//! Opportunity evaluation.
//!
//! Compares a listing's landed cost to its cohort floor price and, when the
//! listing clears the arbitrage threshold, projects the resale economics.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::debug;

use crate::types::{DetectionError, DetectionResult, FloorPrice, ListingObservation, Opportunity};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Economics knobs. All values come from the caller's configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluatorConfig {
    /// A listing qualifies when `total < threshold × floor` (0 < t ≤ 1).
    pub threshold: Decimal,
    /// Marketplace fee rate charged on the resale price (0 ≤ f < 1).
    pub fee_rate: Decimal,
    /// Flat shipping paid when reselling.
    pub resale_shipping_cost: Decimal,
}

impl EvaluatorConfig {
    pub fn validate(&self) -> DetectionResult<()> {
        if self.threshold <= Decimal::ZERO || self.threshold > Decimal::ONE {
            return Err(DetectionError::InvalidConfiguration(format!(
                "arbitrage_threshold must be in (0, 1], got {}",
                self.threshold
            )));
        }
        if self.fee_rate < Decimal::ZERO || self.fee_rate >= Decimal::ONE {
            return Err(DetectionError::InvalidConfiguration(format!(
                "ebay_fee_rate must be in [0, 1), got {}",
                self.fee_rate
            )));
        }
        if self.resale_shipping_cost < Decimal::ZERO {
            return Err(DetectionError::InvalidConfiguration(format!(
                "resale_shipping_cost must be non-negative, got {}",
                self.resale_shipping_cost
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Evaluator
// ---------------------------------------------------------------------------

/// Resale economics of a listing that cleared the threshold.
struct Economics {
    gross_profit: Decimal,
    marketplace_fees: Decimal,
    net_profit: Decimal,
    margin_pct: Decimal,
    discount_pct: Decimal,
}

pub struct OpportunityEvaluator {
    config: EvaluatorConfig,
}

impl OpportunityEvaluator {
    pub fn new(config: EvaluatorConfig) -> Self {
        Self { config }
    }

    /// Whether a landed cost clears the threshold against `floor`.
    /// `None` when the threshold price is not representable.
    pub fn is_profitable(&self, listing_total: Decimal, floor: Decimal) -> Option<bool> {
        self.config
            .threshold
            .checked_mul(floor)
            .map(|limit| listing_total < limit)
    }

    /// Project an unsaved opportunity, or `Ok(None)` when the listing is not
    /// cheap enough. `None` is a normal outcome, not an error.
    ///
    /// Fails with `ArithmeticOverflow` when a price is too large or too
    /// small for the economics to be represented.
    pub fn evaluate(
        &self,
        listing: &ListingObservation,
        floor: &FloorPrice,
        now: DateTime<Utc>,
    ) -> DetectionResult<Option<Opportunity>> {
        let overflow = || DetectionError::ArithmeticOverflow {
            listing_ref: listing.external_id.clone(),
        };

        let listing_total = listing.total_cost().ok_or_else(overflow)?;

        if !self.is_profitable(listing_total, floor.value).ok_or_else(overflow)? {
            debug!(
                listing_ref = %listing.external_id,
                total = %listing_total,
                floor = %floor.value,
                threshold = %self.config.threshold,
                "Listing above arbitrage threshold"
            );
            return Ok(None);
        }

        let economics = self.economics(listing_total, floor.value).ok_or_else(overflow)?;

        debug!(
            listing_ref = %listing.external_id,
            total = %listing_total,
            floor = %floor.value,
            discount = %format!("{:.1}%", economics.discount_pct),
            net = %format!("${:.2}", economics.net_profit),
            "Listing below floor"
        );

        Ok(Some(Opportunity {
            id: None,
            identity: listing.identity(),
            listing_ref: listing.external_id.clone(),
            listing_url: listing.url.clone(),
            listing_total_cost: listing_total,
            floor_price: floor.value,
            sample_size: floor.sample_size,
            discount_pct: economics.discount_pct,
            gross_profit: economics.gross_profit,
            marketplace_fees: economics.marketplace_fees,
            net_profit: economics.net_profit,
            margin_pct: economics.margin_pct,
            is_active: true,
            alerted: false,
            created_at: now,
            updated_at: now,
        }))
    }

    /// Checked arithmetic throughout; `None` on overflow.
    fn economics(&self, listing_total: Decimal, floor: Decimal) -> Option<Economics> {
        let hundred = dec!(100);
        let gross_profit = floor.checked_sub(listing_total)?;
        let marketplace_fees = floor.checked_mul(self.config.fee_rate)?;
        let net_profit = gross_profit
            .checked_sub(marketplace_fees)?
            .checked_sub(self.config.resale_shipping_cost)?;

        let margin_pct = if listing_total.is_zero() {
            Decimal::ZERO
        } else {
            net_profit.checked_div(listing_total)?.checked_mul(hundred)?
        };

        let discount_pct = if floor.is_zero() {
            Decimal::ZERO
        } else {
            gross_profit.checked_div(floor)?.checked_mul(hundred)?
        };

        Some(Economics {
            gross_profit,
            marketplace_fees,
            net_profit,
            margin_pct,
            discount_pct,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
