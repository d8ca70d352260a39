use chrono::{NaiveDateTime, TimeZone, Utc};
use rust_decimal::Decimal;

use salesdesk_core::domain::customer::{LoyaltyTier, UserId, UserProfile};
use salesdesk_core::domain::order::{Order, OrderId};
use salesdesk_core::domain::product::{InventoryItem, Product, ProductId};

use crate::repositories::{RepositoryError, RetailRepositories};

const SEED_USERS: &[(&str, &str, LoyaltyTier)] = &[
    ("user_001", "EY", LoyaltyTier::Bronze),
    ("user_002", "Priya", LoyaltyTier::Silver),
    ("user_003", "Raj", LoyaltyTier::Gold),
    ("user_004", "Anita", LoyaltyTier::Platinum),
    ("user_005", "John", LoyaltyTier::Bronze),
];

/// `(product_id, name, category, price in whole rupees)`
const SEED_PRODUCTS: &[(&str, &str, &str, i64)] = &[
    ("PROD-001", "Female Branded Top", "Women's Fashion", 559),
    ("PROD-002", "Men's Shirt", "Men's Fashion", 339),
    ("PROD-003", "Women's Casual Dress", "Women's Fashion", 899),
    ("PROD-004", "Men's Formal Shirt", "Men's Fashion", 1299),
    ("PROD-005", "Women's Designer Blouse", "Women's Fashion", 1499),
    ("PROD-006", "Men's T-Shirt", "Men's Fashion", 499),
    ("PROD-007", "Women's Jeans", "Women's Fashion", 1199),
    ("PROD-008", "Men's Jeans", "Men's Fashion", 1299),
    ("PROD-009", "Women's Skirt", "Women's Fashion", 699),
    ("PROD-010", "Men's Shorts", "Men's Fashion", 599),
    ("PROD-011", "Women's Jacket", "Women's Fashion", 2499),
    ("PROD-012", "Men's Jacket", "Men's Fashion", 2599),
    ("PROD-013", "Women's Sweater", "Women's Fashion", 1599),
    ("PROD-014", "Men's Sweater", "Men's Fashion", 1699),
    ("PROD-015", "Women's Leggings", "Women's Fashion", 499),
    ("PROD-016", "Men's Track Pants", "Men's Fashion", 799),
    ("PROD-017", "Women's Formal Blazer", "Women's Fashion", 2999),
    ("PROD-018", "Men's Formal Blazer", "Men's Fashion", 3499),
    ("PROD-019", "Women's Saree", "Women's Fashion", 1999),
    ("PROD-020", "Men's Kurta", "Men's Fashion", 1299),
];

/// `(sku, product_id, size, quantity, location)`
const SEED_INVENTORY: &[(&str, &str, &str, i64, &str)] = &[
    ("SKU-001", "PROD-001", "XS", 5, "warehouse"),
    ("SKU-001", "PROD-001", "S", 10, "warehouse"),
    ("SKU-001", "PROD-001", "M", 15, "warehouse"),
    ("SKU-001", "PROD-001", "L", 12, "warehouse"),
    ("SKU-001", "PROD-001", "XL", 8, "warehouse"),
    ("SKU-002", "PROD-002", "S", 20, "warehouse"),
    ("SKU-002", "PROD-002", "M", 25, "warehouse"),
    ("SKU-002", "PROD-002", "L", 22, "warehouse"),
    ("SKU-002", "PROD-002", "XL", 18, "warehouse"),
    ("SKU-002", "PROD-002", "XXL", 10, "warehouse"),
    ("SKU-003", "PROD-003", "S", 7, "store-001"),
    ("SKU-003", "PROD-003", "M", 9, "store-001"),
    ("SKU-003", "PROD-003", "L", 0, "store-001"),
    ("SKU-004", "PROD-004", "M", 14, "warehouse"),
    ("SKU-004", "PROD-004", "L", 11, "warehouse"),
    ("SKU-006", "PROD-006", "M", 30, "warehouse"),
    ("SKU-006", "PROD-006", "L", 26, "warehouse"),
];

/// `(order_id, user_id, total, status, created_at)`
const SEED_ORDERS: &[(&str, &str, i64, &str, &str)] = &[
    ("ORD-001", "user_001", 559, "completed", "2024-01-15T10:30:00"),
    ("ORD-002", "user_001", 1299, "pending", "2024-01-20T14:15:00"),
    ("ORD-003", "user_002", 899, "completed", "2024-01-18T09:00:00"),
    ("ORD-004", "user_003", 2599, "shipped", "2024-01-22T16:45:00"),
    ("ORD-005", "user_001", 1999, "processing", "2024-01-25T11:20:00"),
];

/// Demo retail catalog used by `salesdesk seed` and the integration tests.
/// Loading is idempotent: every row is an upsert.
pub struct DemoDataset;

impl DemoDataset {
    pub async fn load(repositories: &RetailRepositories) -> Result<SeedResult, RepositoryError> {
        for (user_id, name, tier) in SEED_USERS {
            repositories
                .users
                .save(UserProfile {
                    user_id: UserId((*user_id).to_string()),
                    name: (*name).to_string(),
                    loyalty_tier: *tier,
                })
                .await?;
        }

        for (product_id, name, category, price) in SEED_PRODUCTS {
            repositories
                .products
                .save(Product {
                    product_id: ProductId((*product_id).to_string()),
                    name: (*name).to_string(),
                    category: (*category).to_string(),
                    base_price: Decimal::from(*price),
                })
                .await?;
        }

        for (sku, product_id, size, quantity, location) in SEED_INVENTORY {
            repositories
                .inventory
                .save(InventoryItem {
                    sku: (*sku).to_string(),
                    product_id: ProductId((*product_id).to_string()),
                    size: (*size).to_string(),
                    quantity: *quantity,
                    location: (*location).to_string(),
                })
                .await?;
        }

        for (order_id, user_id, total, status, created_at) in SEED_ORDERS {
            let created_at = NaiveDateTime::parse_from_str(created_at, "%Y-%m-%dT%H:%M:%S")
                .map_err(|error| RepositoryError::Decode(format!("seed order {order_id}: {error}")))?;
            repositories
                .orders
                .save(Order {
                    order_id: OrderId((*order_id).to_string()),
                    user_id: UserId((*user_id).to_string()),
                    total_amount: Decimal::from(*total),
                    status: (*status).to_string(),
                    created_at: Utc.from_utc_datetime(&created_at),
                })
                .await?;
        }

        tracing::info!(
            event_name = "system.seed.loaded",
            users = SEED_USERS.len(),
            products = SEED_PRODUCTS.len(),
            inventory_rows = SEED_INVENTORY.len(),
            orders = SEED_ORDERS.len(),
            "demo dataset loaded"
        );

        Ok(SeedResult {
            users: SEED_USERS.len(),
            products: SEED_PRODUCTS.len(),
            inventory_rows: SEED_INVENTORY.len(),
            orders: SEED_ORDERS.len(),
        })
    }

    /// Spot-checks one row per table against the seed contract.
    pub async fn verify(
        repositories: &RetailRepositories,
    ) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();

        let gold_user = repositories.users.find_by_id(&UserId("user_003".to_string())).await?;
        checks.push((
            "users",
            gold_user.map(|user| user.loyalty_tier) == Some(LoyaltyTier::Gold),
        ));

        let top = repositories.products.find_by_id(&ProductId("PROD-001".to_string())).await?;
        checks.push(("products", top.map(|product| product.base_price) == Some(Decimal::from(559))));

        let stock = repositories.inventory.find("SKU-001", Some("M")).await?;
        checks.push(("inventory", stock.map(|item| item.quantity) == Some(15)));

        let orders = repositories.orders.list_for_user(&UserId("user_001".to_string())).await?;
        checks.push((
            "orders",
            orders.first().map(|order| order.order_id.0.as_str()) == Some("ORD-005"),
        ));

        let all_present = checks.iter().all(|(_, ok)| *ok);
        Ok(VerificationResult { all_present, checks })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedResult {
    pub users: usize,
    pub products: usize,
    pub inventory_rows: usize,
    pub orders: usize,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{connect_with_settings, migrations};

    #[test]
    fn inventory_rows_reference_seeded_products() {
        for (sku, product_id, ..) in SEED_INVENTORY {
            assert!(
                SEED_PRODUCTS.iter().any(|(id, ..)| id == product_id),
                "{sku} points at unknown product {product_id}"
            );
        }
    }

    #[tokio::test]
    async fn load_is_idempotent_against_sqlite() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let repositories = RetailRepositories::sql(pool.clone());

        let first = DemoDataset::load(&repositories).await.expect("first load");
        let second = DemoDataset::load(&repositories).await.expect("second load");
        assert_eq!(first, second);

        let product_rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products")
            .fetch_one(&pool)
            .await
            .expect("count products");
        assert_eq!(product_rows as usize, SEED_PRODUCTS.len());

        let verification = DemoDataset::verify(&repositories).await.expect("verify");
        assert!(verification.all_present, "checks: {:?}", verification.checks);
    }

    #[tokio::test]
    async fn verify_reports_missing_rows_on_empty_store() {
        let verification =
            DemoDataset::verify(&RetailRepositories::in_memory()).await.expect("verify");
        assert!(!verification.all_present);
        assert_eq!(verification.checks.len(), 4);
    }
}
