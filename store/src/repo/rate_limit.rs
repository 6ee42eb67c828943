use async_trait::async_trait;
use sqlx::{AnyPool, Row};

use corelib::{RateLimitCounter, UserId};

use crate::error::StoreResult;

#[async_trait]
pub trait RateLimitRepository: Send + Sync {
    async fn fetch_counter(
        &self,
        user_id: &UserId,
        marketplace: &str,
        bucket: &str,
    ) -> StoreResult<Option<RateLimitCounter>>;

    /// Atomically rolls the window if expired, then attempts to admit one
    /// unit of usage. Returns `true` if admitted (and persists the
    /// increment), `false` if the window is saturated.
    async fn try_admit(
        &self,
        user_id: &UserId,
        marketplace: &str,
        bucket: &str,
        window_seconds: u32,
        limit: u32,
        now: chrono::DateTime<chrono::Utc>,
    ) -> StoreResult<bool>;

    /// Forces a marketplace-wide hold until `until` (§4.3 `block`), e.g. in
    /// response to a server-issued `Retry-After` that applies account-wide.
    async fn block_marketplace(
        &self,
        marketplace: &str,
        reason: &str,
        until: chrono::DateTime<chrono::Utc>,
    ) -> StoreResult<()>;

    async fn marketplace_block(
        &self,
        marketplace: &str,
    ) -> StoreResult<Option<chrono::DateTime<chrono::Utc>>>;
}

pub struct SqlxRateLimitRepository {
    pool: AnyPool,
}

impl SqlxRateLimitRepository {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }
}

fn row_to_counter(row: &sqlx::any::AnyRow) -> RateLimitCounter {
    RateLimitCounter {
        marketplace: row.get("marketplace"),
        bucket: row.get("bucket"),
        window_start: chrono::DateTime::parse_from_rfc3339(&row.get::<String, _>("window_start"))
            .map(|t| t.with_timezone(&chrono::Utc))
            .unwrap_or_else(|_| chrono::Utc::now()),
        window_seconds: row.get::<i64, _>("window_seconds") as u32,
        count: row.get::<i64, _>("count_value") as u32,
        limit: row.get::<i64, _>("limit_value") as u32,
    }
}

#[async_trait]
impl RateLimitRepository for SqlxRateLimitRepository {
    async fn fetch_counter(
        &self,
        user_id: &UserId,
        marketplace: &str,
        bucket: &str,
    ) -> StoreResult<Option<RateLimitCounter>> {
        let row = sqlx::query(
            r#"
SELECT marketplace, bucket, window_start, window_seconds, count_value, limit_value
FROM rate_limit_counters WHERE user_id = ? AND marketplace = ? AND bucket = ?;
"#,
        )
        .bind(user_id.to_string())
        .bind(marketplace)
        .bind(bucket)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| row_to_counter(&r)))
    }

    async fn try_admit(
        &self,
        user_id: &UserId,
        marketplace: &str,
        bucket: &str,
        window_seconds: u32,
        limit: u32,
        now: chrono::DateTime<chrono::Utc>,
    ) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query(
            r#"
SELECT window_start, count_value FROM rate_limit_counters
WHERE user_id = ? AND marketplace = ? AND bucket = ?;
"#,
        )
        .bind(user_id.to_string())
        .bind(marketplace)
        .bind(bucket)
        .fetch_optional(&mut *tx)
        .await?;

        let window_expired = existing.as_ref().is_none_or(|r| {
            let start = chrono::DateTime::parse_from_rfc3339(&r.get::<String, _>(0))
                .map(|t| t.with_timezone(&chrono::Utc))
                .unwrap_or(now);
            now >= start + chrono::Duration::seconds(window_seconds as i64)
        });

        if existing.is_none() || window_expired {
            sqlx::query(
                r#"
INSERT INTO rate_limit_counters
  (user_id, marketplace, bucket, window_start, window_seconds, count_value, limit_value)
VALUES (?, ?, ?, ?, ?, 1, ?)
ON CONFLICT (user_id, marketplace, bucket) DO UPDATE SET
  window_start = excluded.window_start,
  window_seconds = excluded.window_seconds,
  count_value = 1,
  limit_value = excluded.limit_value;
"#,
            )
            .bind(user_id.to_string())
            .bind(marketplace)
            .bind(bucket)
            .bind(now.to_rfc3339())
            .bind(window_seconds as i64)
            .bind(limit as i64)
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
            return Ok(true);
        }

        let count: i64 = existing.unwrap().get(1);
        if count >= limit as i64 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            r#"
UPDATE rate_limit_counters SET count_value = count_value + 1
WHERE user_id = ? AND marketplace = ? AND bucket = ? AND count_value < limit_value;
"#,
        )
        .bind(user_id.to_string())
        .bind(marketplace)
        .bind(bucket)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn block_marketplace(
        &self,
        marketplace: &str,
        reason: &str,
        until: chrono::DateTime<chrono::Utc>,
    ) -> StoreResult<()> {
        sqlx::query("DELETE FROM rate_limit_blocks WHERE marketplace = ?;")
            .bind(marketplace)
            .execute(&self.pool)
            .await?;

        sqlx::query("INSERT INTO rate_limit_blocks (marketplace, reason, until) VALUES (?, ?, ?);")
            .bind(marketplace)
            .bind(reason)
            .bind(until.to_rfc3339())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn marketplace_block(
        &self,
        marketplace: &str,
    ) -> StoreResult<Option<chrono::DateTime<chrono::Utc>>> {
        let row = sqlx::query("SELECT until FROM rate_limit_blocks WHERE marketplace = ?;")
            .bind(marketplace)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.and_then(|r| {
            chrono::DateTime::parse_from_rfc3339(&r.get::<String, _>(0))
                .ok()
                .map(|t| t.with_timezone(&chrono::Utc))
        }))
    }
}
