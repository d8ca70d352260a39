use sqlx::Row;

use salesdesk_core::domain::product::{InventoryItem, ProductId};

use super::{decode_err, InventoryRepository, RepositoryError};
use crate::DbPool;

pub struct SqlInventoryRepository {
    pool: DbPool,
}

impl SqlInventoryRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_item(row: &sqlx::sqlite::SqliteRow) -> Result<InventoryItem, RepositoryError> {
    Ok(InventoryItem {
        sku: row.try_get("sku").map_err(decode_err)?,
        product_id: ProductId(row.try_get("product_id").map_err(decode_err)?),
        size: row.try_get("size").map_err(decode_err)?,
        quantity: row.try_get("quantity").map_err(decode_err)?,
        location: row.try_get("location").map_err(decode_err)?,
    })
}

#[async_trait::async_trait]
impl InventoryRepository for SqlInventoryRepository {
    async fn find(
        &self,
        sku: &str,
        size: Option<&str>,
    ) -> Result<Option<InventoryItem>, RepositoryError> {
        let row = match size {
            Some(size) => {
                sqlx::query(
                    "SELECT sku, product_id, size, quantity, location
                     FROM inventory WHERE sku = ? AND size = ?",
                )
                .bind(sku)
                .bind(size)
                .fetch_optional(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT sku, product_id, size, quantity, location
                     FROM inventory WHERE sku = ?
                     ORDER BY quantity DESC, size ASC
                     LIMIT 1",
                )
                .bind(sku)
                .fetch_optional(&self.pool)
                .await?
            }
        };

        row.as_ref().map(row_to_item).transpose()
    }

    async fn save(&self, item: InventoryItem) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO inventory (sku, product_id, size, quantity, location)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(sku, size) DO UPDATE SET
                 product_id = excluded.product_id,
                 quantity = excluded.quantity,
                 location = excluded.location",
        )
        .bind(&item.sku)
        .bind(&item.product_id.0)
        .bind(&item.size)
        .bind(item.quantity)
        .bind(&item.location)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
