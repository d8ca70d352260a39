use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};

use salesdesk_core::catalog::actions;
use salesdesk_core::domain::customer::{LoyaltyTier, UserId, UserProfile};
use salesdesk_core::domain::product::{normalize_size, PriceRange, Product, StockLevel};
use salesdesk_core::execution::{ToolExecutionError, ToolInvoker};
use salesdesk_core::plan::ActionName;
use salesdesk_core::retail::{
    apply_offers, calculate_payment, discount_amount, fulfillment_options, Cart,
};
use salesdesk_db::repositories::{RepositoryError, RetailRepositories, RECOMMENDATION_LIMIT};
use salesdesk_db::session::{SessionRecord, SessionStore, SessionStoreError};

/// Wider fetch used when a gender filter will discard part of the result.
const GENDER_FETCH_LIMIT: u32 = 200;

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    async fn execute(&self, params: &BTreeMap<String, Value>) -> Result<Value, ToolExecutionError>;
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    /// The eleven retail tools over one set of repositories and a session store.
    pub fn retail(repositories: RetailRepositories, sessions: Arc<dyn SessionStore>) -> Self {
        let mut registry = Self::default();
        registry.register(GetSessionContext { sessions: sessions.clone() });
        registry.register(SaveSessionContext { sessions: sessions.clone() });
        registry.register(GetUserProfile { repositories: repositories.clone() });
        registry.register(UpdateUserName { repositories: repositories.clone() });
        registry.register(UpdatePersonalization { sessions });
        registry.register(GetOrders { repositories: repositories.clone() });
        registry.register(CheckInventory { repositories: repositories.clone() });
        registry.register(RecommendProducts { repositories });
        registry.register(ApplyOffers);
        registry.register(CalculatePayment);
        registry.register(GetFulfillmentOptions);
        registry
    }

    pub fn register<T>(&mut self, tool: T)
    where
        T: Tool + 'static,
    {
        self.tools.insert(tool.name().to_string(), Box::new(tool));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[async_trait]
impl ToolInvoker for ToolRegistry {
    async fn invoke(
        &self,
        action: &ActionName,
        parameters: &BTreeMap<String, Value>,
    ) -> Result<Value, ToolExecutionError> {
        let tool = self.tools.get(action.as_str()).ok_or_else(|| {
            ToolExecutionError::NotFound(format!("no tool is registered for `{action}`"))
        })?;
        tool.execute(parameters).await
    }
}

struct GetSessionContext {
    sessions: Arc<dyn SessionStore>,
}

#[async_trait]
impl Tool for GetSessionContext {
    fn name(&self) -> &'static str {
        actions::GET_SESSION_CONTEXT
    }

    async fn execute(&self, params: &BTreeMap<String, Value>) -> Result<Value, ToolExecutionError> {
        let user_id = text_param(params, "user_id")?;
        let session_id = text_param(params, "session_id")?;
        let record = self.sessions.get(&user_id, &session_id).await.map_err(session_failure)?;
        to_output(&record)
    }
}

/// Overlays the given keys onto the stored record. Known keys must keep their
/// shape; anything else is kept as a free-form key.
struct SaveSessionContext {
    sessions: Arc<dyn SessionStore>,
}

#[async_trait]
impl Tool for SaveSessionContext {
    fn name(&self) -> &'static str {
        actions::SAVE_SESSION_CONTEXT
    }

    async fn execute(&self, params: &BTreeMap<String, Value>) -> Result<Value, ToolExecutionError> {
        let user_id = text_param(params, "user_id")?;
        let session_id = text_param(params, "session_id")?;
        let updates = object_param(params, "context")?;

        let current = self.sessions.get(&user_id, &session_id).await.map_err(session_failure)?;
        let mut merged = match serde_json::to_value(&current) {
            Ok(Value::Object(map)) => map,
            Ok(_) => Map::new(),
            Err(error) => return Err(ToolExecutionError::Backend(error.to_string())),
        };
        merged.extend(updates);

        let record: SessionRecord = serde_json::from_value(Value::Object(merged)).map_err(|error| {
            ToolExecutionError::InvalidInput(format!("context does not fit a session record: {error}"))
        })?;
        let stored =
            self.sessions.put(&user_id, &session_id, record).await.map_err(session_failure)?;
        to_output(&stored)
    }
}

struct GetUserProfile {
    repositories: RetailRepositories,
}

#[async_trait]
impl Tool for GetUserProfile {
    fn name(&self) -> &'static str {
        actions::GET_USER_PROFILE
    }

    async fn execute(&self, params: &BTreeMap<String, Value>) -> Result<Value, ToolExecutionError> {
        let user_id = text_param(params, "user_id")?;
        let profile = self
            .repositories
            .users
            .find_by_id(&UserId(user_id.clone()))
            .await
            .map_err(repository_failure)?
            .unwrap_or_else(|| UserProfile::guest(user_id));
        to_output(&profile)
    }
}

struct UpdateUserName {
    repositories: RetailRepositories,
}

#[async_trait]
impl Tool for UpdateUserName {
    fn name(&self) -> &'static str {
        actions::UPDATE_USER_NAME
    }

    async fn execute(&self, params: &BTreeMap<String, Value>) -> Result<Value, ToolExecutionError> {
        let user_id = text_param(params, "user_id")?;
        let name = text_param(params, "name")?;
        let name = name.trim();
        if name.is_empty() {
            return Err(ToolExecutionError::InvalidInput("name must not be empty".to_string()));
        }

        let users = &self.repositories.users;
        let mut profile = users
            .find_by_id(&UserId(user_id.clone()))
            .await
            .map_err(repository_failure)?
            .ok_or_else(|| ToolExecutionError::NotFound(format!("user `{user_id}`")))?;
        profile.name = name.to_string();
        users.save(profile.clone()).await.map_err(repository_failure)?;
        to_output(&profile)
    }
}

struct UpdatePersonalization {
    sessions: Arc<dyn SessionStore>,
}

#[async_trait]
impl Tool for UpdatePersonalization {
    fn name(&self) -> &'static str {
        actions::UPDATE_PERSONALIZATION
    }

    async fn execute(&self, params: &BTreeMap<String, Value>) -> Result<Value, ToolExecutionError> {
        let user_id = text_param(params, "user_id")?;
        let insights = object_param(params, "insights")?;
        let merged = self
            .sessions
            .merge_personalization(&user_id, insights)
            .await
            .map_err(session_failure)?;
        Ok(Value::Object(merged))
    }
}

struct GetOrders {
    repositories: RetailRepositories,
}

#[async_trait]
impl Tool for GetOrders {
    fn name(&self) -> &'static str {
        actions::GET_ORDERS
    }

    async fn execute(&self, params: &BTreeMap<String, Value>) -> Result<Value, ToolExecutionError> {
        let user_id = text_param(params, "user_id")?;
        let orders = self
            .repositories
            .orders
            .list_for_user(&UserId(user_id))
            .await
            .map_err(repository_failure)?;
        to_output(&orders)
    }
}

struct CheckInventory {
    repositories: RetailRepositories,
}

#[async_trait]
impl Tool for CheckInventory {
    fn name(&self) -> &'static str {
        actions::CHECK_INVENTORY
    }

    async fn execute(&self, params: &BTreeMap<String, Value>) -> Result<Value, ToolExecutionError> {
        let sku = text_param(params, "sku")?.trim().to_ascii_uppercase();
        let size = optional_text_param(params, "size")?
            .filter(|size| !size.trim().is_empty())
            .map(|size| normalize_size(&size));

        let item = self
            .repositories
            .inventory
            .find(&sku, size.as_deref())
            .await
            .map_err(repository_failure)?
            .ok_or_else(|| match &size {
                Some(size) => ToolExecutionError::NotFound(format!("no stock record for {sku} in size {size}")),
                None => ToolExecutionError::NotFound(format!("no stock record for {sku}")),
            })?;

        let product = self
            .repositories
            .products
            .find_by_id(&item.product_id)
            .await
            .map_err(repository_failure)?;
        to_output(&StockLevel::from_item(item, product.as_ref()))
    }
}

struct RecommendProducts {
    repositories: RetailRepositories,
}

#[async_trait]
impl Tool for RecommendProducts {
    fn name(&self) -> &'static str {
        actions::RECOMMEND_PRODUCTS
    }

    async fn execute(&self, params: &BTreeMap<String, Value>) -> Result<Value, ToolExecutionError> {
        let category = text_param(params, "category")?;
        let price_range = optional_text_param(params, "price_range")?
            .map(|range| PriceRange::parse(&range))
            .unwrap_or_default();
        let gender = optional_text_param(params, "gender")?.and_then(|gender| Gender::parse(&gender));

        let fetch_limit = if gender.is_some() { GENDER_FETCH_LIMIT } else { RECOMMENDATION_LIMIT };
        let products = self
            .repositories
            .products
            .find_by_category(category.trim(), &price_range, fetch_limit)
            .await
            .map_err(repository_failure)?;

        let products = products
            .into_iter()
            .filter(|product| gender.map_or(true, |gender| gender.matches(product)))
            .take(RECOMMENDATION_LIMIT as usize)
            .collect::<Vec<_>>();
        to_output(&products)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Gender {
    Female,
    Male,
}

impl Gender {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "female" | "f" | "woman" | "women" | "womens" | "women's" => Some(Self::Female),
            "male" | "m" | "man" | "men" | "mens" | "men's" => Some(Self::Male),
            _ => None,
        }
    }

    /// Categories naming neither gender match both.
    fn matches(self, product: &Product) -> bool {
        let category = product.category.to_ascii_lowercase();
        let category_gender = if category.contains("women") {
            Some(Self::Female)
        } else if category.contains("men") {
            Some(Self::Male)
        } else {
            None
        };
        category_gender.map_or(true, |category_gender| category_gender == self)
    }
}

struct ApplyOffers;

#[async_trait]
impl Tool for ApplyOffers {
    fn name(&self) -> &'static str {
        actions::APPLY_OFFERS
    }

    async fn execute(&self, params: &BTreeMap<String, Value>) -> Result<Value, ToolExecutionError> {
        let cart = Cart::from_value(required(params, "cart")?)?;
        let tier = loyalty_tier_param(required(params, "loyalty_tier")?)?;
        to_output(&apply_offers(&cart, tier))
    }
}

struct CalculatePayment;

#[async_trait]
impl Tool for CalculatePayment {
    fn name(&self) -> &'static str {
        actions::CALCULATE_PAYMENT
    }

    async fn execute(&self, params: &BTreeMap<String, Value>) -> Result<Value, ToolExecutionError> {
        let cart = Cart::from_value(required(params, "cart")?)?;
        let discount = discount_amount(required(params, "discounts")?);
        to_output(&calculate_payment(&cart, discount))
    }
}

struct GetFulfillmentOptions;

#[async_trait]
impl Tool for GetFulfillmentOptions {
    fn name(&self) -> &'static str {
        actions::GET_FULFILLMENT_OPTIONS
    }

    async fn execute(&self, params: &BTreeMap<String, Value>) -> Result<Value, ToolExecutionError> {
        let location = text_param(params, "location")?;
        to_output(&fulfillment_options(&location))
    }
}

fn required<'a>(params: &'a BTreeMap<String, Value>, name: &str) -> Result<&'a Value, ToolExecutionError> {
    params
        .get(name)
        .filter(|value| !value.is_null())
        .ok_or_else(|| ToolExecutionError::InvalidInput(format!("missing parameter `{name}`")))
}

/// Strings are taken as-is and numbers by their decimal form.
fn text_param(params: &BTreeMap<String, Value>, name: &str) -> Result<String, ToolExecutionError> {
    match required(params, name)? {
        Value::String(text) => Ok(text.clone()),
        Value::Number(number) => Ok(number.to_string()),
        _ => Err(ToolExecutionError::InvalidInput(format!("parameter `{name}` must be text"))),
    }
}

fn optional_text_param(
    params: &BTreeMap<String, Value>,
    name: &str,
) -> Result<Option<String>, ToolExecutionError> {
    match params.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(_) => text_param(params, name).map(Some),
    }
}

fn object_param(
    params: &BTreeMap<String, Value>,
    name: &str,
) -> Result<Map<String, Value>, ToolExecutionError> {
    match required(params, name)? {
        Value::Object(map) => Ok(map.clone()),
        _ => Err(ToolExecutionError::InvalidInput(format!("parameter `{name}` must be an object"))),
    }
}

/// A tier name, or a profile object carrying `loyalty_tier`.
fn loyalty_tier_param(value: &Value) -> Result<LoyaltyTier, ToolExecutionError> {
    match value {
        Value::String(tier) => Ok(LoyaltyTier::parse_lenient(tier)),
        Value::Object(profile) => match profile.get("loyalty_tier") {
            Some(Value::String(tier)) => Ok(LoyaltyTier::parse_lenient(tier)),
            _ => Err(ToolExecutionError::InvalidInput(
                "profile object has no `loyalty_tier`".to_string(),
            )),
        },
        _ => Err(ToolExecutionError::InvalidInput(
            "`loyalty_tier` must be a tier name or a user profile".to_string(),
        )),
    }
}

fn to_output<T: Serialize>(value: &T) -> Result<Value, ToolExecutionError> {
    serde_json::to_value(value).map_err(|error| ToolExecutionError::Backend(error.to_string()))
}

fn repository_failure(error: RepositoryError) -> ToolExecutionError {
    ToolExecutionError::Backend(error.to_string())
}

fn session_failure(error: SessionStoreError) -> ToolExecutionError {
    match error {
        SessionStoreError::InvalidKey(key) => {
            ToolExecutionError::InvalidInput(format!("`{key}` is not a valid identifier"))
        }
        other => ToolExecutionError::Backend(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use serde_json::{json, Value};

    use salesdesk_core::catalog::ToolCatalog;
    use salesdesk_core::execution::{ToolExecutionError, ToolInvoker};
    use salesdesk_core::plan::ActionName;
    use salesdesk_db::fixtures::DemoDataset;
    use salesdesk_db::repositories::RetailRepositories;
    use salesdesk_db::session::InMemorySessionStore;

    use super::ToolRegistry;

    async fn seeded_registry() -> ToolRegistry {
        let repositories = RetailRepositories::in_memory();
        DemoDataset::load(&repositories).await.expect("seed");
        ToolRegistry::retail(repositories, Arc::new(InMemorySessionStore::default()))
    }

    async fn call(registry: &ToolRegistry, action: &str, params: Value) -> Result<Value, ToolExecutionError> {
        let params: BTreeMap<String, Value> =
            serde_json::from_value(params).expect("params object");
        registry.invoke(&ActionName::new(action), &params).await
    }

    #[tokio::test]
    async fn registry_covers_the_whole_catalog() {
        let registry = seeded_registry().await;
        let catalog = ToolCatalog::retail();
        assert_eq!(registry.len(), catalog.len());
        for action in catalog.action_names() {
            assert!(registry.contains(action), "no tool for {action}");
        }
    }

    #[tokio::test]
    async fn unregistered_action_is_not_found() {
        let registry = seeded_registry().await;
        let error = call(&registry, "teleport_item", json!({})).await.expect_err("unknown");
        assert!(matches!(error, ToolExecutionError::NotFound(_)));
    }

    #[tokio::test]
    async fn inventory_normalizes_size_and_joins_product() {
        let registry = seeded_registry().await;
        let stock = call(&registry, "check_inventory", json!({"sku": "SKU-001", "size": "medium"}))
            .await
            .expect("stock");
        assert_eq!(stock["available"], true);
        assert_eq!(stock["quantity"], 15);
        assert_eq!(stock["size"], "M");
        assert_eq!(stock["product_name"], "Female Branded Top");
    }

    #[tokio::test]
    async fn zero_stock_is_unavailable_and_unknown_size_is_not_found() {
        let registry = seeded_registry().await;
        let stock = call(&registry, "check_inventory", json!({"sku": "SKU-003", "size": "L"}))
            .await
            .expect("stock row");
        assert_eq!(stock["available"], false);

        let error = call(&registry, "check_inventory", json!({"sku": "SKU-003", "size": "XXL"}))
            .await
            .expect_err("no such size");
        assert!(matches!(error, ToolExecutionError::NotFound(_)));
    }

    #[tokio::test]
    async fn recommendations_filter_by_gender_and_price() {
        let registry = seeded_registry().await;
        let products = call(
            &registry,
            "recommend_products",
            json!({"category": "fashion", "price_range": "500-1500", "gender": "female"}),
        )
        .await
        .expect("products");
        let products = products.as_array().expect("array");
        assert!(!products.is_empty());
        assert!(products.len() <= 10);
        for product in products {
            assert_eq!(product["category"], "Women's Fashion");
            let price = product["base_price"].as_f64().expect("price");
            assert!((500.0..=1500.0).contains(&price));
        }
        assert_eq!(products[0]["product_id"], "PROD-001");
    }

    #[tokio::test]
    async fn unknown_user_profile_defaults_to_guest() {
        let registry = seeded_registry().await;
        let profile =
            call(&registry, "get_user_profile", json!({"user_id": "user_999"})).await.expect("profile");
        assert_eq!(profile["name"], "Guest");
        assert_eq!(profile["loyalty_tier"], "bronze");
    }

    #[tokio::test]
    async fn renaming_requires_a_known_user_and_a_name() {
        let registry = seeded_registry().await;
        let renamed = call(&registry, "update_user_name", json!({"user_id": "user_002", "name": "Pri"}))
            .await
            .expect("renamed");
        assert_eq!(renamed["name"], "Pri");

        let empty = call(&registry, "update_user_name", json!({"user_id": "user_002", "name": "  "}))
            .await
            .expect_err("empty name");
        assert!(matches!(empty, ToolExecutionError::InvalidInput(_)));

        let unknown = call(&registry, "update_user_name", json!({"user_id": "user_999", "name": "X"}))
            .await
            .expect_err("unknown user");
        assert!(matches!(unknown, ToolExecutionError::NotFound(_)));
    }

    #[tokio::test]
    async fn orders_are_newest_first() {
        let registry = seeded_registry().await;
        let orders = call(&registry, "get_orders", json!({"user_id": "user_001"})).await.expect("orders");
        let ids = orders
            .as_array()
            .expect("array")
            .iter()
            .map(|order| order["order_id"].as_str().unwrap_or_default().to_string())
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["ORD-005", "ORD-002", "ORD-001"]);
    }

    #[tokio::test]
    async fn offers_accept_a_profile_object_and_feed_payment() {
        let registry = seeded_registry().await;
        let cart = json!([{"product_id": "PROD-004", "price": 1299, "quantity": 1}]);
        let offers = call(
            &registry,
            "apply_offers",
            json!({"cart": cart, "loyalty_tier": {"user_id": "user_003", "loyalty_tier": "gold"}}),
        )
        .await
        .expect("offers");
        // gold 10% plus bulk 10% on 1299
        assert_eq!(offers["total_discount"].as_f64(), Some(259.8));

        let payment = call(&registry, "calculate_payment", json!({"cart": cart, "discounts": offers}))
            .await
            .expect("payment");
        assert_eq!(payment["currency"], "INR");
        assert_eq!(payment["amount_after_discount"].as_f64(), Some(1039.2));
    }

    #[tokio::test]
    async fn session_context_round_trips_free_form_keys() {
        let registry = seeded_registry().await;
        call(
            &registry,
            "save_session_context",
            json!({"user_id": "user_001", "session_id": "web", "context": {"last_viewed_sku": "SKU-002"}}),
        )
        .await
        .expect("saved");

        let record = call(&registry, "get_session_context", json!({"user_id": "user_001", "session_id": "web"}))
            .await
            .expect("record");
        assert_eq!(record["last_viewed_sku"], "SKU-002");
    }

    #[tokio::test]
    async fn personalization_merges_insights() {
        let registry = seeded_registry().await;
        call(&registry, "update_personalization", json!({"user_id": "user_002", "insights": {"gender": "female"}}))
            .await
            .expect("first");
        let merged = call(
            &registry,
            "update_personalization",
            json!({"user_id": "user_002", "insights": {"preferred_size": "M"}}),
        )
        .await
        .expect("second");
        assert_eq!(merged["gender"], "female");
        assert_eq!(merged["preferred_size"], "M");

        let rejected = call(&registry, "update_personalization", json!({"user_id": "user_002", "insights": "female"}))
            .await
            .expect_err("not an object");
        assert!(matches!(rejected, ToolExecutionError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn pickup_locations_offer_store_pickup() {
        let registry = seeded_registry().await;
        let options = call(&registry, "get_fulfillment_options", json!({"location": "store near me"}))
            .await
            .expect("options");
        assert!(options.as_array().expect("array").len() >= 4);
    }
}
