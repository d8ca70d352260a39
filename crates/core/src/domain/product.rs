use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(pub String);

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub product_id: ProductId,
    pub name: String,
    pub category: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub base_price: Decimal,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryItem {
    pub sku: String,
    pub product_id: ProductId,
    pub size: String,
    pub quantity: i64,
    pub location: String,
}

/// Inventory row joined with its product, as reported by stock checks.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevel {
    pub available: bool,
    pub quantity: i64,
    pub sku: String,
    pub size: String,
    pub product_id: ProductId,
    pub location: String,
    pub product_name: Option<String>,
    pub category: Option<String>,
}

impl StockLevel {
    pub fn from_item(item: InventoryItem, product: Option<&Product>) -> Self {
        Self {
            available: item.quantity > 0,
            quantity: item.quantity,
            sku: item.sku,
            size: item.size,
            product_id: item.product_id,
            location: item.location,
            product_name: product.map(|product| product.name.clone()),
            category: product.map(|product| product.category.clone()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Size {
    #[serde(rename = "XS")]
    ExtraSmall,
    #[serde(rename = "S")]
    Small,
    #[serde(rename = "M")]
    Medium,
    #[serde(rename = "L")]
    Large,
    #[serde(rename = "XL")]
    ExtraLarge,
    #[serde(rename = "XXL")]
    ExtraExtraLarge,
}

impl Size {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "xs" | "extra small" => Some(Self::ExtraSmall),
            "s" | "small" => Some(Self::Small),
            "m" | "medium" => Some(Self::Medium),
            "l" | "large" => Some(Self::Large),
            "xl" | "extra large" => Some(Self::ExtraLarge),
            "xxl" | "extra extra large" => Some(Self::ExtraExtraLarge),
            _ => None,
        }
    }

    pub fn abbreviation(&self) -> &'static str {
        match self {
            Self::ExtraSmall => "XS",
            Self::Small => "S",
            Self::Medium => "M",
            Self::Large => "L",
            Self::ExtraLarge => "XL",
            Self::ExtraExtraLarge => "XXL",
        }
    }

    pub fn full_name(&self) -> &'static str {
        match self {
            Self::ExtraSmall => "Extra Small",
            Self::Small => "Small",
            Self::Medium => "Medium",
            Self::Large => "Large",
            Self::ExtraLarge => "Extra Large",
            Self::ExtraExtraLarge => "Extra Extra Large",
        }
    }
}

/// Canonical storage form of a size: the abbreviation when recognized,
/// otherwise the trimmed input uppercased.
pub fn normalize_size(value: &str) -> String {
    Size::parse(value)
        .map(|size| size.abbreviation().to_string())
        .unwrap_or_else(|| value.trim().to_ascii_uppercase())
}

/// `"lo-hi"` price filter. `"any"`, empty, and unparseable ranges are unbounded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PriceRange {
    pub min: Option<Decimal>,
    pub max: Option<Decimal>,
}

impl PriceRange {
    pub fn parse(value: &str) -> Self {
        let trimmed = value.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("any") {
            return Self::default();
        }
        let Some((low, high)) = trimmed.split_once('-') else {
            return Self::default();
        };
        match (low.trim().parse::<Decimal>(), high.trim().parse::<Decimal>()) {
            (Ok(min), Ok(max)) => Self { min: Some(min), max: Some(max) },
            _ => Self::default(),
        }
    }

    pub fn contains(&self, price: Decimal) -> bool {
        self.min.map_or(true, |min| price >= min) && self.max.map_or(true, |max| price <= max)
    }
}
