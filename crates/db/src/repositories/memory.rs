use std::collections::HashMap;

use tokio::sync::RwLock;

use salesdesk_core::domain::customer::{UserId, UserProfile};
use salesdesk_core::domain::order::Order;
use salesdesk_core::domain::product::{InventoryItem, PriceRange, Product, ProductId};

use super::{
    InventoryRepository, OrderRepository, ProductRepository, RepositoryError, UserRepository,
};

#[derive(Default)]
pub struct InMemoryUserRepository {
    users: RwLock<HashMap<String, UserProfile>>,
}

#[async_trait::async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn find_by_id(&self, id: &UserId) -> Result<Option<UserProfile>, RepositoryError> {
        let users = self.users.read().await;
        Ok(users.get(&id.0).cloned())
    }

    async fn save(&self, user: UserProfile) -> Result<(), RepositoryError> {
        let mut users = self.users.write().await;
        users.insert(user.user_id.0.clone(), user);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryProductRepository {
    products: RwLock<HashMap<String, Product>>,
}

#[async_trait::async_trait]
impl ProductRepository for InMemoryProductRepository {
    async fn find_by_id(&self, id: &ProductId) -> Result<Option<Product>, RepositoryError> {
        let products = self.products.read().await;
        Ok(products.get(&id.0).cloned())
    }

    async fn save(&self, product: Product) -> Result<(), RepositoryError> {
        let mut products = self.products.write().await;
        products.insert(product.product_id.0.clone(), product);
        Ok(())
    }

    async fn find_by_category(
        &self,
        category: &str,
        price_range: &PriceRange,
        limit: u32,
    ) -> Result<Vec<Product>, RepositoryError> {
        let needle = category.trim().to_lowercase();
        let products = self.products.read().await;
        let mut matches: Vec<Product> = products
            .values()
            .filter(|product| product.category.to_lowercase().contains(&needle))
            .filter(|product| price_range.contains(product.base_price))
            .cloned()
            .collect();
        matches.sort_by(|left, right| {
            left.base_price
                .cmp(&right.base_price)
                .then_with(|| left.product_id.cmp(&right.product_id))
        });
        matches.truncate(limit as usize);
        Ok(matches)
    }
}

/// Keyed by `(sku, size)` like the SQL table.
#[derive(Default)]
pub struct InMemoryInventoryRepository {
    items: RwLock<HashMap<(String, String), InventoryItem>>,
}

#[async_trait::async_trait]
impl InventoryRepository for InMemoryInventoryRepository {
    async fn find(
        &self,
        sku: &str,
        size: Option<&str>,
    ) -> Result<Option<InventoryItem>, RepositoryError> {
        let items = self.items.read().await;
        let found = match size {
            Some(size) => items.get(&(sku.to_string(), size.to_string())).cloned(),
            None => items
                .values()
                .filter(|item| item.sku == sku)
                .max_by(|left, right| {
                    left.quantity.cmp(&right.quantity).then_with(|| right.size.cmp(&left.size))
                })
                .cloned(),
        };
        Ok(found)
    }

    async fn save(&self, item: InventoryItem) -> Result<(), RepositoryError> {
        let mut items = self.items.write().await;
        items.insert((item.sku.clone(), item.size.clone()), item);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryOrderRepository {
    orders: RwLock<HashMap<String, Order>>,
}

#[async_trait::async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<Order>, RepositoryError> {
        let orders = self.orders.read().await;
        let mut listed: Vec<Order> =
            orders.values().filter(|order| &order.user_id == user_id).cloned().collect();
        listed.sort_by(|left, right| {
            right.created_at.cmp(&left.created_at).then_with(|| right.order_id.0.cmp(&left.order_id.0))
        });
        Ok(listed)
    }

    async fn save(&self, order: Order) -> Result<(), RepositoryError> {
        let mut orders = self.orders.write().await;
        orders.insert(order.order_id.0.clone(), order);
        Ok(())
    }
}
