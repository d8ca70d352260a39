use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::Row;

use salesdesk_core::domain::customer::UserId;
use salesdesk_core::domain::order::{Order, OrderId};

use super::{decode_err, parse_money, OrderRepository, RepositoryError};
use crate::DbPool;

pub struct SqlOrderRepository {
    pool: DbPool,
}

impl SqlOrderRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

/// Accepts RFC 3339 and, for rows imported without an offset, naive UTC timestamps.
fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
        .map(|naive| naive.and_utc())
        .map_err(|error| RepositoryError::Decode(format!("created_at `{raw}`: {error}")))
}

fn row_to_order(row: &sqlx::sqlite::SqliteRow) -> Result<Order, RepositoryError> {
    let order_id: String = row.try_get("order_id").map_err(decode_err)?;
    let user_id: String = row.try_get("user_id").map_err(decode_err)?;
    let total_amount: String = row.try_get("total_amount").map_err(decode_err)?;
    let status: String = row.try_get("status").map_err(decode_err)?;
    let created_at: String = row.try_get("created_at").map_err(decode_err)?;

    Ok(Order {
        order_id: OrderId(order_id),
        user_id: UserId(user_id),
        total_amount: parse_money("total_amount", &total_amount)?,
        status,
        created_at: parse_timestamp(&created_at)?,
    })
}

#[async_trait::async_trait]
impl OrderRepository for SqlOrderRepository {
    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<Order>, RepositoryError> {
        let rows: Vec<sqlx::sqlite::SqliteRow> = sqlx::query(
            "SELECT order_id, user_id, total_amount, status, created_at
             FROM orders WHERE user_id = ?
             ORDER BY created_at DESC, order_id DESC",
        )
        .bind(&user_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_order).collect::<Result<Vec<_>, _>>()
    }

    async fn save(&self, order: Order) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO orders (order_id, user_id, total_amount, status, created_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(order_id) DO UPDATE SET
                 total_amount = excluded.total_amount,
                 status = excluded.status",
        )
        .bind(&order.order_id.0)
        .bind(&order.user_id.0)
        .bind(order.total_amount.normalize().to_string())
        .bind(&order.status)
        .bind(order.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;

    use salesdesk_core::domain::customer::{LoyaltyTier, UserId, UserProfile};
    use salesdesk_core::domain::order::{Order, OrderId};

    use super::{parse_timestamp, SqlOrderRepository};
    use crate::repositories::{OrderRepository, SqlUserRepository, UserRepository};
    use crate::{connect_with_settings, migrations};

    fn order(id: &str, day: u32, amount: i64) -> Order {
        Order {
            order_id: OrderId(id.to_string()),
            user_id: UserId("user_001".to_string()),
            total_amount: Decimal::from(amount),
            status: "completed".to_string(),
            created_at: Utc.with_ymd_and_hms(2024, 1, day, 10, 30, 0).single().expect("valid date"),
        }
    }

    #[tokio::test]
    async fn orders_are_listed_newest_first() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        SqlUserRepository::new(pool.clone())
            .save(UserProfile {
                user_id: UserId("user_001".to_string()),
                name: "EY".to_string(),
                loyalty_tier: LoyaltyTier::Bronze,
            })
            .await
            .expect("save user");

        let repo = SqlOrderRepository::new(pool);
        repo.save(order("ORD-001", 15, 559)).await.expect("save");
        repo.save(order("ORD-005", 25, 1999)).await.expect("save");
        repo.save(order("ORD-002", 20, 1299)).await.expect("save");

        let listed = repo.list_for_user(&UserId("user_001".to_string())).await.expect("list");
        let ids: Vec<_> = listed.iter().map(|order| order.order_id.0.as_str()).collect();
        assert_eq!(ids, vec!["ORD-005", "ORD-002", "ORD-001"]);
        assert_eq!(listed[0].total_amount, Decimal::from(1999));
    }

    #[test]
    fn naive_timestamps_are_read_as_utc() {
        let parsed = parse_timestamp("2024-01-15T10:30:00").expect("parse");
        assert_eq!(parsed.to_rfc3339(), "2024-01-15T10:30:00+00:00");
        assert!(parse_timestamp("yesterday").is_err());
    }
}
