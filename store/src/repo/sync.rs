use async_trait::async_trait;
use sqlx::{AnyPool, Row};

use corelib::{CrossPlatformSyncJob, SyncJobId, SyncJobStatus};

use crate::error::{StoreError, StoreResult};

#[async_trait]
pub trait SyncRepository: Send + Sync {
    /// Creates the job only if no job for `(listing_id, triggering_event_id)`
    /// is currently `pending`/`processing` — enforces the at-most-one-active
    /// invariant (§3) at the storage layer via a uniqueness check inside a
    /// transaction.
    async fn create_if_absent(
        &self,
        job: &CrossPlatformSyncJob,
    ) -> StoreResult<Option<CrossPlatformSyncJob>>;

    async fn save(&self, job: &CrossPlatformSyncJob) -> StoreResult<()>;

    async fn fetch(&self, id: &SyncJobId) -> StoreResult<Option<CrossPlatformSyncJob>>;
}

pub struct SqlxSyncRepository {
    pool: AnyPool,
}

impl SqlxSyncRepository {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }
}

fn status_to_str(s: SyncJobStatus) -> &'static str {
    match s {
        SyncJobStatus::Pending => "pending",
        SyncJobStatus::Processing => "processing",
        SyncJobStatus::Completed => "completed",
        SyncJobStatus::Failed => "failed",
        SyncJobStatus::Partial => "partial",
    }
}

fn status_from_str(s: &str) -> SyncJobStatus {
    match s {
        "pending" => SyncJobStatus::Pending,
        "completed" => SyncJobStatus::Completed,
        "failed" => SyncJobStatus::Failed,
        "partial" => SyncJobStatus::Partial,
        _ => SyncJobStatus::Processing,
    }
}

fn row_to_job(row: &sqlx::any::AnyRow) -> StoreResult<CrossPlatformSyncJob> {
    let targets: Vec<String> = serde_json::from_str(&row.get::<String, _>("targets_json"))?;
    Ok(CrossPlatformSyncJob {
        id: parse_uuid(row.get("id"))?,
        listing_id: parse_uuid(row.get("listing_id"))?,
        triggering_event_id: parse_uuid(row.get("triggering_event_id"))?,
        source_marketplace: row.get("source_marketplace"),
        targets,
        total: row.get::<i64, _>("total_count") as u32,
        done: row.get::<i64, _>("done_count") as u32,
        failed: row.get::<i64, _>("failed_count") as u32,
        status: status_from_str(&row.get::<String, _>("status")),
        started_at: chrono::DateTime::parse_from_rfc3339(&row.get::<String, _>("started_at"))
            .map(|t| t.with_timezone(&chrono::Utc))
            .unwrap_or_else(|_| chrono::Utc::now()),
        finished_at: row
            .get::<Option<String>, _>("finished_at")
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(&s).ok())
            .map(|t| t.with_timezone(&chrono::Utc)),
    })
}

fn parse_uuid(s: String) -> StoreResult<uuid::Uuid> {
    s.parse().map_err(|_| StoreError::NotFound(format!("malformed id {s}")))
}

#[async_trait]
impl SyncRepository for SqlxSyncRepository {
    async fn create_if_absent(
        &self,
        job: &CrossPlatformSyncJob,
    ) -> StoreResult<Option<CrossPlatformSyncJob>> {
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query(
            r#"
SELECT id FROM sync_jobs
WHERE listing_id = ? AND triggering_event_id = ? AND status IN ('pending', 'processing');
"#,
        )
        .bind(job.listing_id.to_string())
        .bind(job.triggering_event_id.to_string())
        .fetch_optional(&mut *tx)
        .await?;

        if existing.is_some() {
            tx.rollback().await?;
            return Ok(None);
        }

        let targets_json = serde_json::to_string(&job.targets)?;
        sqlx::query(
            r#"
INSERT INTO sync_jobs
  (id, listing_id, triggering_event_id, source_marketplace, targets_json,
   total_count, done_count, failed_count, status, started_at, finished_at)
VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?);
"#,
        )
        .bind(job.id.to_string())
        .bind(job.listing_id.to_string())
        .bind(job.triggering_event_id.to_string())
        .bind(&job.source_marketplace)
        .bind(targets_json)
        .bind(job.total as i64)
        .bind(job.done as i64)
        .bind(job.failed as i64)
        .bind(status_to_str(job.status))
        .bind(job.started_at.to_rfc3339())
        .bind(job.finished_at.map(|t| t.to_rfc3339()))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(job.clone()))
    }

    async fn save(&self, job: &CrossPlatformSyncJob) -> StoreResult<()> {
        sqlx::query(
            r#"
UPDATE sync_jobs
SET done_count = ?, failed_count = ?, status = ?, finished_at = ?
WHERE id = ?;
"#,
        )
        .bind(job.done as i64)
        .bind(job.failed as i64)
        .bind(status_to_str(job.status))
        .bind(job.finished_at.map(|t| t.to_rfc3339()))
        .bind(job.id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fetch(&self, id: &SyncJobId) -> StoreResult<Option<CrossPlatformSyncJob>> {
        let row = sqlx::query(
            r#"
SELECT id, listing_id, triggering_event_id, source_marketplace, targets_json,
       total_count, done_count, failed_count, status, started_at, finished_at
FROM sync_jobs WHERE id = ?;
"#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| row_to_job(&r)).transpose()
    }
}
