use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};

use crate::plan::ActionName;

pub mod actions {
    pub const GET_SESSION_CONTEXT: &str = "get_session_context";
    pub const SAVE_SESSION_CONTEXT: &str = "save_session_context";
    pub const GET_USER_PROFILE: &str = "get_user_profile";
    pub const UPDATE_USER_NAME: &str = "update_user_name";
    pub const UPDATE_PERSONALIZATION: &str = "update_personalization";
    pub const GET_ORDERS: &str = "get_orders";
    pub const CHECK_INVENTORY: &str = "check_inventory";
    pub const RECOMMEND_PRODUCTS: &str = "recommend_products";
    pub const APPLY_OFFERS: &str = "apply_offers";
    pub const CALCULATE_PAYMENT: &str = "calculate_payment";
    pub const GET_FULFILLMENT_OPTIONS: &str = "get_fulfillment_options";
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub action: ActionName,
    pub required: BTreeSet<String>,
    pub optional: BTreeSet<String>,
}

impl ToolSpec {
    pub fn new(action: &str, required: &[&str], optional: &[&str]) -> Self {
        Self {
            action: ActionName::new(action),
            required: required.iter().map(|name| name.to_string()).collect(),
            optional: optional.iter().map(|name| name.to_string()).collect(),
        }
    }

    pub fn accepts(&self, parameter: &str) -> bool {
        self.required.contains(parameter) || self.optional.contains(parameter)
    }

    /// `name(required, [optional])`, the form used in planner prompts.
    pub fn signature(&self) -> String {
        let mut parts = self.required.iter().cloned().collect::<Vec<_>>();
        parts.extend(self.optional.iter().map(|name| format!("[{name}]")));
        format!("{}({})", self.action, parts.join(", "))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnknownAction(pub String);

/// Read-only registry of the actions a plan may name. Built once and shared by
/// reference; there is no mutation API.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolCatalog {
    specs: BTreeMap<ActionName, ToolSpec>,
}

impl ToolCatalog {
    pub fn from_specs(specs: impl IntoIterator<Item = ToolSpec>) -> Self {
        Self { specs: specs.into_iter().map(|spec| (spec.action.clone(), spec)).collect() }
    }

    pub fn retail() -> Self {
        use actions::*;

        Self::from_specs([
            ToolSpec::new(GET_SESSION_CONTEXT, &["user_id", "session_id"], &[]),
            ToolSpec::new(SAVE_SESSION_CONTEXT, &["user_id", "session_id", "context"], &[]),
            ToolSpec::new(GET_USER_PROFILE, &["user_id"], &[]),
            ToolSpec::new(UPDATE_USER_NAME, &["user_id", "name"], &[]),
            ToolSpec::new(UPDATE_PERSONALIZATION, &["user_id", "insights"], &[]),
            ToolSpec::new(GET_ORDERS, &["user_id"], &[]),
            ToolSpec::new(CHECK_INVENTORY, &["sku"], &["size"]),
            ToolSpec::new(RECOMMEND_PRODUCTS, &["category"], &["price_range", "gender"]),
            ToolSpec::new(APPLY_OFFERS, &["cart", "loyalty_tier"], &[]),
            ToolSpec::new(CALCULATE_PAYMENT, &["cart", "discounts"], &[]),
            ToolSpec::new(GET_FULFILLMENT_OPTIONS, &["location"], &[]),
        ])
    }

    /// Process-wide retail catalog, initialized on first use.
    pub fn shared() -> Arc<ToolCatalog> {
        static CATALOG: OnceLock<Arc<ToolCatalog>> = OnceLock::new();
        CATALOG.get_or_init(|| Arc::new(ToolCatalog::retail())).clone()
    }

    pub fn lookup(&self, action: &str) -> Result<&ToolSpec, UnknownAction> {
        self.specs
            .get(&ActionName::new(action))
            .ok_or_else(|| UnknownAction(action.to_string()))
    }

    pub fn contains(&self, action: &str) -> bool {
        self.lookup(action).is_ok()
    }

    pub fn action_names(&self) -> Vec<&str> {
        self.specs.keys().map(ActionName::as_str).collect()
    }

    pub fn specs(&self) -> impl Iterator<Item = &ToolSpec> {
        self.specs.values()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}
