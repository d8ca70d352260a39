use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::cart::{decimal_from_value, Cart};

pub const TAX_RATE: Decimal = Decimal::from_parts(10, 0, 0, false, 2);
pub const CURRENCY: &str = "INR";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentSummary {
    #[serde(with = "rust_decimal::serde::float")]
    pub subtotal: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_discount: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount_after_discount: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub tax_rate: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub tax: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub final_amount: Decimal,
    pub currency: String,
}

/// Discount amount carried by an offers result, a bare number, or nothing.
pub fn discount_amount(discounts: &Value) -> Decimal {
    match discounts {
        Value::Object(map) => map.get("total_discount").and_then(decimal_from_value),
        other => decimal_from_value(other),
    }
    .unwrap_or(Decimal::ZERO)
}

/// The discount is capped at the subtotal so the payable amount never goes negative.
pub fn calculate_payment(cart: &Cart, total_discount: Decimal) -> PaymentSummary {
    let subtotal = cart.subtotal();
    let total_discount = total_discount.max(Decimal::ZERO).min(subtotal);
    let amount_after_discount = subtotal - total_discount;
    let tax = (amount_after_discount * TAX_RATE).round_dp(2);

    PaymentSummary {
        subtotal,
        total_discount,
        amount_after_discount,
        tax_rate: TAX_RATE * Decimal::ONE_HUNDRED,
        tax,
        final_amount: amount_after_discount + tax,
        currency: CURRENCY.to_string(),
    }
}
