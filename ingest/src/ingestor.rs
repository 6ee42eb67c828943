use std::collections::HashMap;
use std::sync::Arc;

use corelib::{NormalizedEventKind, UserId, WebhookEvent, WebhookProcessingStatus};
use store::{ListingRepository, WebhookRepository};
use sync::{SaleEvent, SyncTrigger};

use crate::normalize::{self, EventKindTable};
use crate::verify::verify_signature;

/// Drives §4.7's four operations end to end for one inbound webhook
/// delivery: `verify` → `deduplicate` → `normalize` → `enqueue`.
pub struct WebhookIngestor {
    webhook_repo: Arc<dyn WebhookRepository>,
    listing_repo: Arc<dyn ListingRepository>,
    sync_trigger: Arc<SyncTrigger>,
    event_kinds: EventKindTable,
}

/// What the caller (an HTTP handler) should do with the delivery. Both
/// variants return a success status to the caller — §4.7 deliberately
/// doesn't leak verification failures back to the sender.
pub enum IngestOutcome {
    Accepted,
    InvalidSignature,
}

impl WebhookIngestor {
    pub fn new(
        webhook_repo: Arc<dyn WebhookRepository>,
        listing_repo: Arc<dyn ListingRepository>,
        sync_trigger: Arc<SyncTrigger>,
        event_kinds: EventKindTable,
    ) -> Self {
        Self { webhook_repo, listing_repo, sync_trigger, event_kinds }
    }

    #[tracing::instrument(skip(self, raw_body), fields(%marketplace, %user_id))]
    pub async fn ingest(
        &self,
        user_id: UserId,
        marketplace: &str,
        raw_body: &[u8],
        signature_hex: &str,
        headers: HashMap<String, String>,
    ) -> anyhow::Result<IngestOutcome> {
        let raw_payload: serde_json::Value = serde_json::from_slice(raw_body).unwrap_or(serde_json::Value::Null);

        let config = self.webhook_repo.fetch_config(&user_id, marketplace).await?;
        let signature_valid = match &config {
            Some(cfg) => verify_signature(cfg, raw_body, signature_hex),
            None => false,
        };

        let normalized = normalize::normalize(marketplace, &self.event_kinds, &raw_payload);

        if !signature_valid {
            tracing::warn!("rejecting webhook with invalid signature; recorded, not processed");
            // Recorded for audit in a table outside webhook_events' dedup
            // keyspace: an attacker controls external_event_id, and writing
            // it into the (marketplace, external_event_id) unique index would
            // let a spoofed delivery pre-seed that key and poison dedup for
            // the genuinely-signed event that arrives later.
            if let Err(e) = self
                .webhook_repo
                .record_rejected_delivery(marketplace, &normalized.external_event_id, &raw_payload, &headers, chrono::Utc::now())
                .await
            {
                tracing::warn!(error = %e, "failed to record invalid-signature webhook");
            }
            return Ok(IngestOutcome::InvalidSignature);
        }

        let event = WebhookEvent {
            id: uuid::Uuid::new_v4(),
            marketplace: marketplace.to_string(),
            external_event_id: normalized.external_event_id.clone(),
            raw_payload,
            headers,
            signature_valid,
            status: WebhookProcessingStatus::Pending,
            duplicate_of: None,
            kind: normalized.kind,
            priority: normalized.kind.map(NormalizedEventKind::default_priority).unwrap_or(0),
        };

        match self.webhook_repo.insert_or_find_duplicate(&event).await? {
            Ok(()) => {
                self.enqueue(&event, normalized.listing_external_id.as_deref()).await?;
                self.webhook_repo.set_status(&event.id, WebhookProcessingStatus::Completed).await?;
            }
            Err(original_id) => {
                tracing::debug!(%original_id, "duplicate webhook delivery; linking and ignoring");
                self.webhook_repo.mark_ignored(&event.id, &original_id).await?;
            }
        }

        Ok(IngestOutcome::Accepted)
    }

    /// §4.7 `enqueue`: for a sale, resolves the listing and hands off to the
    /// Cross-Platform Sync Coordinator. Other kinds are recorded but have no
    /// further routing defined here (a future rule-trigger hook would live
    /// alongside this match).
    async fn enqueue(&self, event: &WebhookEvent, listing_external_id: Option<&str>) -> anyhow::Result<()> {
        let Some(NormalizedEventKind::SaleCompleted) = event.kind else { return Ok(()) };
        let Some(external_id) = listing_external_id else {
            tracing::warn!("sale event missing a listing identifier; cannot trigger sync");
            return Ok(());
        };

        let Some(post) = self.listing_repo.fetch_post(&event.marketplace, external_id).await? else {
            tracing::warn!(%external_id, "sale event references an unknown listing post");
            return Ok(());
        };

        self.sync_trigger
            .handle_sale(SaleEvent {
                listing_id: post.listing_id,
                triggering_event_id: event.id,
                sold_marketplace: event.marketplace.clone(),
            })
            .await?;

        Ok(())
    }
}

pub fn default_event_kinds() -> EventKindTable {
    let mut table = EventKindTable::new();
    table.register("poshmark", "order_closed", NormalizedEventKind::SaleCompleted);
    table.register("poshmark", "listing_removed", NormalizedEventKind::ListingEnded);
    table.register("mercari", "item.sold", NormalizedEventKind::SaleCompleted);
    table.register("mercari", "item.expired", NormalizedEventKind::ListingEnded);
    table.register("depop", "sale.completed", NormalizedEventKind::SaleCompleted);
    table
}
