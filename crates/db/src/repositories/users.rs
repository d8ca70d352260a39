use sqlx::Row;

use salesdesk_core::domain::customer::{LoyaltyTier, UserId, UserProfile};

use super::{decode_err, RepositoryError, UserRepository};
use crate::DbPool;

pub struct SqlUserRepository {
    pool: DbPool,
}

impl SqlUserRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_user(row: &sqlx::sqlite::SqliteRow) -> Result<UserProfile, RepositoryError> {
    let user_id: String = row.try_get("user_id").map_err(decode_err)?;
    let name: String = row.try_get("name").map_err(decode_err)?;
    let tier: String = row.try_get("loyalty_tier").map_err(decode_err)?;

    Ok(UserProfile { user_id: UserId(user_id), name, loyalty_tier: LoyaltyTier::parse_lenient(&tier) })
}

#[async_trait::async_trait]
impl UserRepository for SqlUserRepository {
    async fn find_by_id(&self, id: &UserId) -> Result<Option<UserProfile>, RepositoryError> {
        let row = sqlx::query("SELECT user_id, name, loyalty_tier FROM users WHERE user_id = ?")
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_user).transpose()
    }

    async fn save(&self, user: UserProfile) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO users (user_id, name, loyalty_tier)
             VALUES (?, ?, ?)
             ON CONFLICT(user_id) DO UPDATE SET
                 name = excluded.name,
                 loyalty_tier = excluded.loyalty_tier",
        )
        .bind(&user.user_id.0)
        .bind(&user.name)
        .bind(user.loyalty_tier.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
