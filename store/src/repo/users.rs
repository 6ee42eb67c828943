use async_trait::async_trait;
use sqlx::{AnyPool, Row};

use corelib::{MarketplaceConnection, MarketplaceConnectionId, PlanLimits, User, UserId};

use crate::error::{StoreError, StoreResult};

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn fetch_user(&self, id: &UserId) -> StoreResult<User>;

    async fn fetch_connection(
        &self,
        user_id: &UserId,
        marketplace: &str,
    ) -> StoreResult<Option<MarketplaceConnection>>;

    async fn upsert_connection(&self, conn: &MarketplaceConnection) -> StoreResult<()>;
}

pub struct SqlxUserRepository {
    pool: AnyPool,
}

impl SqlxUserRepository {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for SqlxUserRepository {
    async fn fetch_user(&self, id: &UserId) -> StoreResult<User> {
        let row = sqlx::query(
            "SELECT id, time_zone, max_active_rules, max_actions_per_day FROM users WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        let row = row.ok_or_else(|| StoreError::NotFound(format!("user {id}")))?;

        Ok(User {
            id: row.get::<String, _>(0).parse().map_err(|_| {
                StoreError::NotFound(format!("user {id} had a malformed id column"))
            })?,
            time_zone: row.get(1),
            plan_limits: PlanLimits {
                max_active_rules: row.get::<i64, _>(2) as u32,
                max_actions_per_day: row.get::<i64, _>(3) as u32,
            },
        })
    }

    async fn fetch_connection(
        &self,
        user_id: &UserId,
        marketplace: &str,
    ) -> StoreResult<Option<MarketplaceConnection>> {
        let row = sqlx::query(
            r#"
SELECT id, user_id, marketplace, is_connected, access_credential, credential_expires_at, last_sync_at
FROM marketplace_connections
WHERE user_id = ? AND marketplace = ?;
"#,
        )
        .bind(user_id.to_string())
        .bind(marketplace)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(None) };
        Ok(Some(row_to_connection(&row)?))
    }

    async fn upsert_connection(&self, conn: &MarketplaceConnection) -> StoreResult<()> {
        sqlx::query(
            r#"
DELETE FROM marketplace_connections WHERE user_id = ? AND marketplace = ?;
"#,
        )
        .bind(conn.user_id.to_string())
        .bind(&conn.marketplace)
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
INSERT INTO marketplace_connections
  (id, user_id, marketplace, is_connected, access_credential, credential_expires_at, last_sync_at)
VALUES (?, ?, ?, ?, ?, ?, ?);
"#,
        )
        .bind(conn.id.to_string())
        .bind(conn.user_id.to_string())
        .bind(&conn.marketplace)
        .bind(conn.is_connected)
        .bind(&conn.access_credential)
        .bind(conn.credential_expires_at.map(|t| t.to_rfc3339()))
        .bind(conn.last_sync_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn row_to_connection(row: &sqlx::any::AnyRow) -> StoreResult<MarketplaceConnection> {
    use std::str::FromStr;

    let id: MarketplaceConnectionId = MarketplaceConnectionId::from_str(&row.get::<String, _>(0))
        .map_err(|_| StoreError::NotFound("connection had a malformed id column".into()))?;

    Ok(MarketplaceConnection {
        id,
        user_id: row
            .get::<String, _>(1)
            .parse()
            .map_err(|_| StoreError::NotFound("connection had a malformed user_id column".into()))?,
        marketplace: row.get(2),
        is_connected: row.get(3),
        access_credential: row.get(4),
        credential_expires_at: row
            .get::<Option<String>, _>(5)
            .map(|s| chrono::DateTime::parse_from_rfc3339(&s))
            .transpose()
            .map_err(|e| StoreError::NotFound(e.to_string()))?
            .map(|t| t.with_timezone(&chrono::Utc)),
        last_sync_at: row
            .get::<Option<String>, _>(6)
            .map(|s| chrono::DateTime::parse_from_rfc3339(&s))
            .transpose()
            .map_err(|e| StoreError::NotFound(e.to_string()))?
            .map(|t| t.with_timezone(&chrono::Utc)),
    })
}
