use async_trait::async_trait;
use sqlx::{AnyPool, Row};

use corelib::{
    NormalizedEventKind, UserId, WebhookConfiguration, WebhookEvent, WebhookEventId,
    WebhookProcessingStatus,
};

use crate::error::StoreResult;

#[async_trait]
pub trait WebhookRepository: Send + Sync {
    async fn fetch_config(
        &self,
        user_id: &UserId,
        marketplace: &str,
    ) -> StoreResult<Option<WebhookConfiguration>>;

    async fn upsert_config(&self, config: &WebhookConfiguration) -> StoreResult<()>;

    /// Inserts the event. If `(marketplace, external_event_id)` already
    /// exists, returns the id of the original event instead of inserting a
    /// duplicate row — callers link the new arrival to that id and mark it
    /// `ignored` rather than processing it (§4.7 `deduplicate`).
    async fn insert_or_find_duplicate(
        &self,
        event: &WebhookEvent,
    ) -> StoreResult<Result<(), WebhookEventId>>;

    async fn mark_ignored(&self, event_id: &WebhookEventId, duplicate_of: &WebhookEventId) -> StoreResult<()>;

    async fn set_status(&self, event_id: &WebhookEventId, status: WebhookProcessingStatus) -> StoreResult<()>;

    /// Records a delivery that failed signature verification, outside the
    /// `webhook_events` dedup keyspace — its `external_event_id` is
    /// attacker-controlled and must never occupy the unique dedup key a
    /// later genuine event for the same id would need (§4.7 `verify`).
    async fn record_rejected_delivery(
        &self,
        marketplace: &str,
        external_event_id: &str,
        raw_payload: &serde_json::Value,
        headers: &std::collections::HashMap<String, String>,
        received_at: chrono::DateTime<chrono::Utc>,
    ) -> StoreResult<()>;
}

pub struct SqlxWebhookRepository {
    pool: AnyPool,
}

impl SqlxWebhookRepository {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }
}

fn status_to_str(s: WebhookProcessingStatus) -> &'static str {
    match s {
        WebhookProcessingStatus::Pending => "pending",
        WebhookProcessingStatus::Processing => "processing",
        WebhookProcessingStatus::Completed => "completed",
        WebhookProcessingStatus::Failed => "failed",
        WebhookProcessingStatus::Ignored => "ignored",
    }
}

fn kind_to_str(k: NormalizedEventKind) -> &'static str {
    match k {
        NormalizedEventKind::SaleCompleted => "sale_completed",
        NormalizedEventKind::ListingEnded => "listing_ended",
        NormalizedEventKind::InventoryUpdated => "inventory_updated",
    }
}

#[async_trait]
impl WebhookRepository for SqlxWebhookRepository {
    async fn fetch_config(
        &self,
        user_id: &UserId,
        marketplace: &str,
    ) -> StoreResult<Option<WebhookConfiguration>> {
        let row = sqlx::query(
            r#"
SELECT endpoint, secret, subscribed_events_json, verified, consecutive_errors
FROM webhook_configurations WHERE user_id = ? AND marketplace = ?;
"#,
        )
        .bind(user_id.to_string())
        .bind(marketplace)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(None) };
        let subscribed_events: Vec<String> =
            serde_json::from_str(&row.get::<String, _>("subscribed_events_json"))?;

        Ok(Some(WebhookConfiguration {
            user_id: *user_id,
            marketplace: marketplace.to_string(),
            endpoint: row.get("endpoint"),
            secret: row.get("secret"),
            subscribed_events,
            verified: row.get("verified"),
            consecutive_errors: row.get::<i64, _>("consecutive_errors") as u32,
        }))
    }

    async fn upsert_config(&self, config: &WebhookConfiguration) -> StoreResult<()> {
        let subscribed_events_json = serde_json::to_string(&config.subscribed_events)?;

        sqlx::query("DELETE FROM webhook_configurations WHERE user_id = ? AND marketplace = ?;")
            .bind(config.user_id.to_string())
            .bind(&config.marketplace)
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
INSERT INTO webhook_configurations
  (user_id, marketplace, endpoint, secret, subscribed_events_json, verified, consecutive_errors)
VALUES (?, ?, ?, ?, ?, ?, ?);
"#,
        )
        .bind(config.user_id.to_string())
        .bind(&config.marketplace)
        .bind(&config.endpoint)
        .bind(&config.secret)
        .bind(subscribed_events_json)
        .bind(config.verified)
        .bind(config.consecutive_errors as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn insert_or_find_duplicate(
        &self,
        event: &WebhookEvent,
    ) -> StoreResult<Result<(), WebhookEventId>> {
        // Rely on the unique index on (marketplace, external_event_id) as the
        // source of truth rather than a check-then-insert, which would race
        // under concurrent ingestion of the same event.
        let outcome = sqlx::query(
            r#"
INSERT INTO webhook_events
  (id, marketplace, external_event_id, raw_payload_json, headers_json, signature_valid,
   status, duplicate_of, kind, priority)
VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?);
"#,
        )
        .bind(event.id.to_string())
        .bind(&event.marketplace)
        .bind(&event.external_event_id)
        .bind(serde_json::to_string(&event.raw_payload)?)
        .bind(serde_json::to_string(&event.headers)?)
        .bind(event.signature_valid)
        .bind(status_to_str(event.status))
        .bind(event.duplicate_of.map(|id| id.to_string()))
        .bind(event.kind.map(kind_to_str))
        .bind(event.priority as i64)
        .execute(&self.pool)
        .await;

        match outcome {
            Ok(_) => Ok(Ok(())),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                let row = sqlx::query(
                    "SELECT id FROM webhook_events WHERE marketplace = ? AND external_event_id = ?;",
                )
                .bind(&event.marketplace)
                .bind(&event.external_event_id)
                .fetch_one(&self.pool)
                .await?;
                let id: String = row.get(0);
                Ok(Err(id.parse().unwrap_or(event.id)))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn mark_ignored(&self, event_id: &WebhookEventId, duplicate_of: &WebhookEventId) -> StoreResult<()> {
        sqlx::query("UPDATE webhook_events SET status = 'ignored', duplicate_of = ? WHERE id = ?;")
            .bind(duplicate_of.to_string())
            .bind(event_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_status(&self, event_id: &WebhookEventId, status: WebhookProcessingStatus) -> StoreResult<()> {
        sqlx::query("UPDATE webhook_events SET status = ? WHERE id = ?;")
            .bind(status_to_str(status))
            .bind(event_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn record_rejected_delivery(
        &self,
        marketplace: &str,
        external_event_id: &str,
        raw_payload: &serde_json::Value,
        headers: &std::collections::HashMap<String, String>,
        received_at: chrono::DateTime<chrono::Utc>,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
INSERT INTO rejected_webhook_deliveries
  (id, marketplace, external_event_id, raw_payload_json, headers_json, received_at)
VALUES (?, ?, ?, ?, ?, ?);
"#,
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(marketplace)
        .bind(external_event_id)
        .bind(serde_json::to_string(raw_payload)?)
        .bind(serde_json::to_string(headers)?)
        .bind(received_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
