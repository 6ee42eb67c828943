use async_trait::async_trait;
use sqlx::{AnyPool, Row};

use corelib::{DeadLetterEntry, DlqId, DlqResolutionStatus};

use crate::error::{StoreError, StoreResult};

#[async_trait]
pub trait DlqRepository: Send + Sync {
    async fn insert(&self, entry: &DeadLetterEntry) -> StoreResult<()>;

    async fn fetch_pending_review(&self, limit: i64) -> StoreResult<Vec<DeadLetterEntry>>;

    async fn set_resolution(&self, id: &DlqId, resolution: DlqResolutionStatus) -> StoreResult<()>;
}

pub struct SqlxDlqRepository {
    pool: AnyPool,
}

impl SqlxDlqRepository {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }
}

fn resolution_to_str(r: DlqResolutionStatus) -> &'static str {
    match r {
        DlqResolutionStatus::PendingReview => "pending_review",
        DlqResolutionStatus::Resolved => "resolved",
        DlqResolutionStatus::Discarded => "discarded",
    }
}

fn resolution_from_str(s: &str) -> DlqResolutionStatus {
    match s {
        "resolved" => DlqResolutionStatus::Resolved,
        "discarded" => DlqResolutionStatus::Discarded,
        _ => DlqResolutionStatus::PendingReview,
    }
}

fn row_to_entry(row: &sqlx::any::AnyRow) -> StoreResult<DeadLetterEntry> {
    let history = serde_json::from_str(&row.get::<String, _>("history_json"))?;
    let final_category = serde_json::from_str(&format!(
        "\"{}\"",
        row.get::<String, _>("final_category")
    ))?;

    Ok(DeadLetterEntry {
        id: row
            .get::<String, _>("id")
            .parse()
            .map_err(|_| StoreError::NotFound("dlq entry had a malformed id".into()))?,
        job_id: row
            .get::<String, _>("job_id")
            .parse()
            .map_err(|_| StoreError::NotFound("dlq entry had a malformed job_id".into()))?,
        total_attempts: row.get::<i64, _>("total_attempts") as u32,
        final_category,
        history,
        resolution: resolution_from_str(&row.get::<String, _>("resolution")),
        created_at: chrono::DateTime::parse_from_rfc3339(&row.get::<String, _>("created_at"))
            .map(|t| t.with_timezone(&chrono::Utc))
            .unwrap_or_else(|_| chrono::Utc::now()),
    })
}

#[async_trait]
impl DlqRepository for SqlxDlqRepository {
    async fn insert(&self, entry: &DeadLetterEntry) -> StoreResult<()> {
        let history_json = serde_json::to_string(&entry.history)?;
        let category_json = serde_json::to_string(&entry.final_category)?;
        let final_category = category_json.trim_matches('"').to_string();

        sqlx::query(
            r#"
INSERT INTO dlq_entries (id, job_id, total_attempts, final_category, history_json, resolution, created_at)
VALUES (?, ?, ?, ?, ?, ?, ?);
"#,
        )
        .bind(entry.id.to_string())
        .bind(entry.job_id.to_string())
        .bind(entry.total_attempts as i64)
        .bind(final_category)
        .bind(history_json)
        .bind(resolution_to_str(entry.resolution))
        .bind(entry.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn fetch_pending_review(&self, limit: i64) -> StoreResult<Vec<DeadLetterEntry>> {
        let rows = sqlx::query(
            r#"
SELECT id, job_id, total_attempts, final_category, history_json, resolution, created_at
FROM dlq_entries WHERE resolution = 'pending_review'
ORDER BY created_at ASC
LIMIT ?;
"#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_entry).collect()
    }

    async fn set_resolution(&self, id: &DlqId, resolution: DlqResolutionStatus) -> StoreResult<()> {
        sqlx::query("UPDATE dlq_entries SET resolution = ? WHERE id = ?;")
            .bind(resolution_to_str(resolution))
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
