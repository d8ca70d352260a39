use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::customer::LoyaltyTier;

use super::cart::Cart;

pub const BULK_THRESHOLD: Decimal = Decimal::from_parts(1000, 0, 0, false, 0);
pub const BULK_RATE: Decimal = Decimal::from_parts(10, 0, 0, false, 2);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountKind {
    LoyaltyTier,
    Bulk,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedDiscount {
    #[serde(rename = "type")]
    pub kind: DiscountKind,
    pub description: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub percentage: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferSummary {
    pub loyalty_tier: LoyaltyTier,
    pub discounts: Vec<AppliedDiscount>,
    #[serde(with = "rust_decimal::serde::float")]
    pub discount_percentage: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub subtotal: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_discount: Decimal,
}

/// Tier discount on the subtotal, plus a flat bulk discount once the subtotal
/// exceeds the bulk threshold. Both are computed on the undiscounted subtotal.
pub fn apply_offers(cart: &Cart, tier: LoyaltyTier) -> OfferSummary {
    let subtotal = cart.subtotal();
    let rate = tier.discount_rate();
    let hundred = Decimal::ONE_HUNDRED;
    let mut discounts = Vec::new();

    let tier_amount = (subtotal * rate).round_dp(2);
    if rate > Decimal::ZERO {
        let mut label = tier.as_str().to_string();
        if let Some(first) = label.get_mut(0..1) {
            first.make_ascii_uppercase();
        }
        discounts.push(AppliedDiscount {
            kind: DiscountKind::LoyaltyTier,
            description: format!("{label} member discount"),
            percentage: rate * hundred,
            amount: tier_amount,
        });
    }

    if subtotal > BULK_THRESHOLD {
        discounts.push(AppliedDiscount {
            kind: DiscountKind::Bulk,
            description: format!("Bulk order discount ({}% off orders over {BULK_THRESHOLD})", BULK_RATE * hundred),
            percentage: BULK_RATE * hundred,
            amount: (subtotal * BULK_RATE).round_dp(2),
        });
    }

    let total_discount = discounts.iter().map(|discount| discount.amount).sum();
    OfferSummary {
        loyalty_tier: tier,
        discounts,
        discount_percentage: rate * hundred,
        subtotal,
        total_discount,
    }
}
