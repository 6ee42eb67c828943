use async_trait::async_trait;
use sqlx::{AnyPool, Row};

use corelib::{PollingSchedule, UserId};

use crate::error::StoreResult;

#[async_trait]
pub trait PollingRepository: Send + Sync {
    async fn fetch(&self, user_id: &UserId, marketplace: &str) -> StoreResult<Option<PollingSchedule>>;

    async fn upsert(&self, schedule: &PollingSchedule) -> StoreResult<()>;

    /// All enabled schedules due for a poll at `now` (`last_poll_at` is
    /// `NULL` or more than `current_interval_secs` in the past).
    async fn fetch_due(&self, now: chrono::DateTime<chrono::Utc>) -> StoreResult<Vec<PollingSchedule>>;
}

pub struct SqlxPollingRepository {
    pool: AnyPool,
}

impl SqlxPollingRepository {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }
}

fn row_to_schedule(row: &sqlx::any::AnyRow) -> PollingSchedule {
    PollingSchedule {
        user_id: row.get::<String, _>("user_id").parse().unwrap_or_default(),
        marketplace: row.get("marketplace"),
        min_interval_secs: row.get::<i64, _>("min_interval_secs") as u32,
        max_interval_secs: row.get::<i64, _>("max_interval_secs") as u32,
        current_interval_secs: row.get::<i64, _>("current_interval_secs") as u32,
        consecutive_failures: row.get::<i64, _>("consecutive_failures") as u32,
        max_failures: row.get::<i64, _>("max_failures") as u32,
        disabled: row.get("disabled"),
        last_poll_at: row
            .get::<Option<String>, _>("last_poll_at")
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(&s).ok())
            .map(|t| t.with_timezone(&chrono::Utc)),
    }
}

#[async_trait]
impl PollingRepository for SqlxPollingRepository {
    async fn fetch(&self, user_id: &UserId, marketplace: &str) -> StoreResult<Option<PollingSchedule>> {
        let row = sqlx::query(
            r#"
SELECT user_id, marketplace, min_interval_secs, max_interval_secs, current_interval_secs,
       consecutive_failures, max_failures, disabled, last_poll_at
FROM polling_schedules WHERE user_id = ? AND marketplace = ?;
"#,
        )
        .bind(user_id.to_string())
        .bind(marketplace)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| row_to_schedule(&r)))
    }

    async fn upsert(&self, schedule: &PollingSchedule) -> StoreResult<()> {
        sqlx::query("DELETE FROM polling_schedules WHERE user_id = ? AND marketplace = ?;")
            .bind(schedule.user_id.to_string())
            .bind(&schedule.marketplace)
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
INSERT INTO polling_schedules
  (user_id, marketplace, min_interval_secs, max_interval_secs, current_interval_secs,
   consecutive_failures, max_failures, disabled, last_poll_at)
VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?);
"#,
        )
        .bind(schedule.user_id.to_string())
        .bind(&schedule.marketplace)
        .bind(schedule.min_interval_secs as i64)
        .bind(schedule.max_interval_secs as i64)
        .bind(schedule.current_interval_secs as i64)
        .bind(schedule.consecutive_failures as i64)
        .bind(schedule.max_failures as i64)
        .bind(schedule.disabled)
        .bind(schedule.last_poll_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn fetch_due(&self, now: chrono::DateTime<chrono::Utc>) -> StoreResult<Vec<PollingSchedule>> {
        let rows = sqlx::query(
            r#"
SELECT user_id, marketplace, min_interval_secs, max_interval_secs, current_interval_secs,
       consecutive_failures, max_failures, disabled, last_poll_at
FROM polling_schedules
WHERE disabled = ? AND (last_poll_at IS NULL OR last_poll_at <= ?);
"#,
        )
        .bind(false)
        .bind(now.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(row_to_schedule)
            .filter(|s| {
                s.last_poll_at
                    .map(|t| now.signed_duration_since(t).num_seconds() >= s.current_interval_secs as i64)
                    .unwrap_or(true)
            })
            .collect())
    }
}
