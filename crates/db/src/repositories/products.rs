use sqlx::Row;

use salesdesk_core::domain::product::{PriceRange, Product, ProductId};

use super::{decode_err, parse_money, ProductRepository, RepositoryError};
use crate::DbPool;

pub struct SqlProductRepository {
    pool: DbPool,
}

impl SqlProductRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_product(row: &sqlx::sqlite::SqliteRow) -> Result<Product, RepositoryError> {
    let product_id: String = row.try_get("product_id").map_err(decode_err)?;
    let name: String = row.try_get("name").map_err(decode_err)?;
    let category: String = row.try_get("category").map_err(decode_err)?;
    let base_price: String = row.try_get("base_price").map_err(decode_err)?;

    Ok(Product {
        product_id: ProductId(product_id),
        name,
        category,
        base_price: parse_money("base_price", &base_price)?,
    })
}

#[async_trait::async_trait]
impl ProductRepository for SqlProductRepository {
    async fn find_by_id(&self, id: &ProductId) -> Result<Option<Product>, RepositoryError> {
        let row = sqlx::query(
            "SELECT product_id, name, category, base_price FROM products WHERE product_id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_product).transpose()
    }

    async fn save(&self, product: Product) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO products (product_id, name, category, base_price)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(product_id) DO UPDATE SET
                 name = excluded.name,
                 category = excluded.category,
                 base_price = excluded.base_price",
        )
        .bind(&product.product_id.0)
        .bind(&product.name)
        .bind(&product.category)
        .bind(product.base_price.normalize().to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_category(
        &self,
        category: &str,
        price_range: &PriceRange,
        limit: u32,
    ) -> Result<Vec<Product>, RepositoryError> {
        // Prices are TEXT, so the range filter runs on decoded decimals.
        let rows: Vec<sqlx::sqlite::SqliteRow> = sqlx::query(
            "SELECT product_id, name, category, base_price
             FROM products
             WHERE instr(lower(category), lower(?)) > 0
             ORDER BY CAST(base_price AS REAL) ASC, product_id ASC",
        )
        .bind(category.trim())
        .fetch_all(&self.pool)
        .await?;

        let mut products = Vec::new();
        for row in &rows {
            let product = row_to_product(row)?;
            if price_range.contains(product.base_price) {
                products.push(product);
                if products.len() >= limit as usize {
                    break;
                }
            }
        }
        Ok(products)
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use salesdesk_core::domain::product::{PriceRange, Product, ProductId};

    use super::SqlProductRepository;
    use crate::repositories::ProductRepository;
    use crate::{connect_with_settings, migrations};

    fn product(id: &str, category: &str, price: i64) -> Product {
        Product {
            product_id: ProductId(id.to_string()),
            name: format!("Product {id}"),
            category: category.to_string(),
            base_price: Decimal::from(price),
        }
    }

    async fn seeded() -> SqlProductRepository {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let repo = SqlProductRepository::new(pool);
        for item in [
            product("PROD-A", "Women's Fashion", 899),
            product("PROD-B", "Women's Fashion", 559),
            product("PROD-C", "Men's Fashion", 1299),
            product("PROD-D", "Footwear", 2499),
        ] {
            repo.save(item).await.expect("save product");
        }
        repo
    }

    #[tokio::test]
    async fn category_match_is_case_insensitive_and_cheapest_first() {
        let repo = seeded().await;
        let found = repo
            .find_by_category("women", &PriceRange::default(), 10)
            .await
            .expect("query");

        let ids: Vec<_> = found.iter().map(|product| product.product_id.0.as_str()).collect();
        assert_eq!(ids, vec!["PROD-B", "PROD-A"]);
    }

    #[tokio::test]
    async fn price_range_and_limit_apply() {
        let repo = seeded().await;
        let found = repo
            .find_by_category("fashion", &PriceRange::parse("500-1000"), 1)
            .await
            .expect("query");

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].base_price, Decimal::from(559));
    }

    #[tokio::test]
    async fn decimal_prices_survive_storage() {
        let repo = seeded().await;
        let mut item = product("PROD-E", "Accessories", 0);
        item.base_price = Decimal::new(7999, 2);
        repo.save(item).await.expect("save");

        let found = repo.find_by_id(&ProductId("PROD-E".to_string())).await.expect("find");
        assert_eq!(found.map(|product| product.base_price), Some(Decimal::new(7999, 2)));
    }
}
