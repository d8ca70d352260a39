use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use salesdesk_core::domain::customer::{UserId, UserProfile};
use salesdesk_core::domain::order::Order;
use salesdesk_core::domain::product::{InventoryItem, PriceRange, Product, ProductId};

use crate::DbPool;

pub mod inventory;
pub mod memory;
pub mod orders;
pub mod products;
pub mod users;

pub use inventory::SqlInventoryRepository;
pub use memory::{
    InMemoryInventoryRepository, InMemoryOrderRepository, InMemoryProductRepository,
    InMemoryUserRepository,
};
pub use orders::SqlOrderRepository;
pub use products::SqlProductRepository;
pub use users::SqlUserRepository;

/// Upper bound on how many products a single recommendation query returns.
pub const RECOMMENDATION_LIMIT: u32 = 10;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_id(&self, id: &UserId) -> Result<Option<UserProfile>, RepositoryError>;
    async fn save(&self, user: UserProfile) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ProductRepository: Send + Sync {
    async fn find_by_id(&self, id: &ProductId) -> Result<Option<Product>, RepositoryError>;
    async fn save(&self, product: Product) -> Result<(), RepositoryError>;

    /// Case-insensitive containment match on category, cheapest first.
    async fn find_by_category(
        &self,
        category: &str,
        price_range: &PriceRange,
        limit: u32,
    ) -> Result<Vec<Product>, RepositoryError>;
}

#[async_trait]
pub trait InventoryRepository: Send + Sync {
    /// Without a size the best-stocked row for the SKU is returned.
    async fn find(
        &self,
        sku: &str,
        size: Option<&str>,
    ) -> Result<Option<InventoryItem>, RepositoryError>;
    async fn save(&self, item: InventoryItem) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Newest first.
    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<Order>, RepositoryError>;
    async fn save(&self, order: Order) -> Result<(), RepositoryError>;
}

/// The four retail repositories behind the tool registry, bound to one backend.
#[derive(Clone)]
pub struct RetailRepositories {
    pub users: Arc<dyn UserRepository>,
    pub products: Arc<dyn ProductRepository>,
    pub inventory: Arc<dyn InventoryRepository>,
    pub orders: Arc<dyn OrderRepository>,
}

impl RetailRepositories {
    pub fn sql(pool: DbPool) -> Self {
        Self {
            users: Arc::new(SqlUserRepository::new(pool.clone())),
            products: Arc::new(SqlProductRepository::new(pool.clone())),
            inventory: Arc::new(SqlInventoryRepository::new(pool.clone())),
            orders: Arc::new(SqlOrderRepository::new(pool)),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            users: Arc::new(InMemoryUserRepository::default()),
            products: Arc::new(InMemoryProductRepository::default()),
            inventory: Arc::new(InMemoryInventoryRepository::default()),
            orders: Arc::new(InMemoryOrderRepository::default()),
        }
    }
}

pub(crate) fn decode_err(error: impl std::fmt::Display) -> RepositoryError {
    RepositoryError::Decode(error.to_string())
}

pub(crate) fn parse_money(column: &str, raw: &str) -> Result<rust_decimal::Decimal, RepositoryError> {
    raw.trim()
        .parse::<rust_decimal::Decimal>()
        .map_err(|error| RepositoryError::Decode(format!("{column} `{raw}` is not a decimal: {error}")))
}
