//! Pure retail math behind the offers, payment and fulfillment tools.
//! Money is `Decimal` throughout and serialized as JSON numbers.

pub mod cart;
pub mod fulfillment;
pub mod offers;
pub mod payment;

pub use cart::{decimal_from_value, Cart, CartLine};
pub use fulfillment::{fulfillment_options, FulfillmentKind, FulfillmentOption};
pub use offers::{apply_offers, AppliedDiscount, DiscountKind, OfferSummary};
pub use payment::{calculate_payment, discount_amount, PaymentSummary};
