use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::execution::ToolExecutionError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: Option<String>,
    pub name: Option<String>,
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
    pub quantity: u32,
}

impl CartLine {
    pub fn line_total(&self) -> Decimal {
        self.price * Decimal::from(self.quantity)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    pub lines: Vec<CartLine>,
}

impl Cart {
    /// Accepts a bare array of lines or an object with an `items` array. Each
    /// line needs a `price`; `quantity` defaults to 1.
    pub fn from_value(value: &Value) -> Result<Self, ToolExecutionError> {
        let items = match value {
            Value::Array(items) => items,
            Value::Object(map) => match map.get("items") {
                Some(Value::Array(items)) => items,
                _ => {
                    return Err(ToolExecutionError::InvalidInput(
                        "cart object must contain an `items` array".to_string(),
                    ))
                }
            },
            _ => {
                return Err(ToolExecutionError::InvalidInput(
                    "cart must be a list of items".to_string(),
                ))
            }
        };

        let lines = items
            .iter()
            .enumerate()
            .map(|(index, item)| line_from_value(index, item))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { lines })
    }

    pub fn subtotal(&self) -> Decimal {
        self.lines.iter().map(CartLine::line_total).sum()
    }
}

fn line_from_value(index: usize, item: &Value) -> Result<CartLine, ToolExecutionError> {
    let object = item.as_object().ok_or_else(|| {
        ToolExecutionError::InvalidInput(format!("cart item {index} must be an object"))
    })?;

    let price = object
        .get("price")
        .or_else(|| object.get("base_price"))
        .and_then(decimal_from_value)
        .ok_or_else(|| {
            ToolExecutionError::InvalidInput(format!("cart item {index} has no numeric price"))
        })?;
    if price.is_sign_negative() {
        return Err(ToolExecutionError::InvalidInput(format!(
            "cart item {index} has a negative price"
        )));
    }

    let quantity = match object.get("quantity") {
        None | Some(Value::Null) => 1,
        Some(value) => value.as_u64().and_then(|value| u32::try_from(value).ok()).ok_or_else(
            || ToolExecutionError::InvalidInput(format!("cart item {index} has an invalid quantity")),
        )?,
    };

    Ok(CartLine {
        product_id: object.get("product_id").and_then(Value::as_str).map(str::to_string),
        name: object.get("name").and_then(Value::as_str).map(str::to_string),
        price,
        quantity,
    })
}

/// Reads a JSON number or numeric string as a decimal.
pub fn decimal_from_value(value: &Value) -> Option<Decimal> {
    let text = match value {
        Value::Number(number) => number.to_string(),
        Value::String(text) => text.trim().to_string(),
        _ => return None,
    };
    Decimal::from_str(&text).ok().or_else(|| Decimal::from_scientific(&text).ok())
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use serde_json::json;

    use super::Cart;

    #[test]
    fn subtotal_multiplies_price_by_quantity() {
        let cart = Cart::from_value(&json!([
            {"product_id": "PROD-001", "price": 99.99, "quantity": 2},
            {"product_id": "PROD-003", "price": "79.99"}
        ]))
        .expect("cart parses");

        assert_eq!(cart.lines[1].quantity, 1);
        assert_eq!(cart.subtotal(), Decimal::new(27997, 2));
    }

    #[test]
    fn items_wrapper_is_accepted() {
        let cart = Cart::from_value(&json!({"items": [{"price": 10}]})).expect("cart parses");
        assert_eq!(cart.subtotal(), Decimal::from(10));
    }

    #[test]
    fn missing_price_is_invalid_input() {
        assert!(Cart::from_value(&json!([{"product_id": "PROD-001"}])).is_err());
        assert!(Cart::from_value(&json!("two shoes")).is_err());
    }
}
