use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

const PICKUP_KEYWORDS: &[&str] = &["store", "pickup", "near"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FulfillmentKind {
    StandardDelivery,
    ExpressDelivery,
    FreeStandardDelivery,
    StorePickup,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FulfillmentOption {
    #[serde(rename = "type")]
    pub kind: FulfillmentKind,
    pub description: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub cost: Decimal,
    pub estimated_days: u32,
    #[serde(with = "rust_decimal::serde::float_option", skip_serializing_if = "Option::is_none", default)]
    pub min_order: Option<Decimal>,
}

pub fn fulfillment_options(location: &str) -> Vec<FulfillmentOption> {
    let mut options = vec![
        FulfillmentOption {
            kind: FulfillmentKind::StandardDelivery,
            description: "Standard delivery (5-7 business days)".to_string(),
            cost: Decimal::new(599, 2),
            estimated_days: 5,
            min_order: None,
        },
        FulfillmentOption {
            kind: FulfillmentKind::ExpressDelivery,
            description: "Express delivery (2-3 business days)".to_string(),
            cost: Decimal::new(1299, 2),
            estimated_days: 2,
            min_order: None,
        },
        FulfillmentOption {
            kind: FulfillmentKind::FreeStandardDelivery,
            description: "Free standard delivery (orders over 50)".to_string(),
            cost: Decimal::ZERO,
            estimated_days: 5,
            min_order: Some(Decimal::from(50)),
        },
    ];

    let location = location.to_lowercase();
    if PICKUP_KEYWORDS.iter().any(|keyword| location.contains(keyword)) {
        options.push(FulfillmentOption {
            kind: FulfillmentKind::StorePickup,
            description: "Store pickup (available next day)".to_string(),
            cost: Decimal::ZERO,
            estimated_days: 1,
            min_order: None,
        });
    }

    options
}
