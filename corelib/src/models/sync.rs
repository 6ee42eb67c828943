use serde::{Deserialize, Serialize};

use super::ids::{ListingId, MarketplaceTag, SyncJobId, WebhookEventId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncJobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Partial,
}

/// Fan-out delist job created when a sale on one marketplace must delist the
/// same listing everywhere else it's posted (§4.10).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CrossPlatformSyncJob {
    pub id: SyncJobId,
    pub listing_id: ListingId,
    pub triggering_event_id: WebhookEventId,
    pub source_marketplace: MarketplaceTag,
    pub targets: Vec<MarketplaceTag>,
    pub total: u32,
    pub done: u32,
    pub failed: u32,
    pub status: SyncJobStatus,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl CrossPlatformSyncJob {
    pub fn record_outcome(&mut self, succeeded: bool, now: chrono::DateTime<chrono::Utc>) {
        if succeeded {
            self.done += 1;
        } else {
            self.failed += 1;
        }
        if self.done + self.failed >= self.total {
            self.status = if self.failed == 0 {
                SyncJobStatus::Completed
            } else if self.done == 0 {
                SyncJobStatus::Failed
            } else {
                SyncJobStatus::Partial
            };
            self.finished_at = Some(now);
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.status, SyncJobStatus::Pending | SyncJobStatus::Processing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(total: u32) -> CrossPlatformSyncJob {
        CrossPlatformSyncJob {
            id: uuid::Uuid::new_v4(),
            listing_id: uuid::Uuid::new_v4(),
            triggering_event_id: uuid::Uuid::new_v4(),
            source_marketplace: "poshmark".to_string(),
            targets: vec!["mercari".to_string(), "depop".to_string()],
            total,
            done: 0,
            failed: 0,
            status: SyncJobStatus::Processing,
            started_at: chrono::Utc::now(),
            finished_at: None,
        }
    }

    #[test]
    fn all_success_is_completed() {
        let mut j = job(2);
        let now = chrono::Utc::now();
        j.record_outcome(true, now);
        j.record_outcome(true, now);
        assert_eq!(j.status, SyncJobStatus::Completed);
        assert_eq!(j.finished_at, Some(now));
    }

    #[test]
    fn mixed_outcomes_are_partial() {
        let mut j = job(2);
        let now = chrono::Utc::now();
        j.record_outcome(true, now);
        j.record_outcome(false, now);
        assert_eq!(j.status, SyncJobStatus::Partial);
        assert_eq!(j.finished_at, Some(now));
    }

    #[test]
    fn all_failed_is_failed() {
        let mut j = job(2);
        let now = chrono::Utc::now();
        j.record_outcome(false, now);
        j.record_outcome(false, now);
        assert_eq!(j.status, SyncJobStatus::Failed);
        assert_eq!(j.finished_at, Some(now));
    }

    #[test]
    fn non_terminal_outcome_leaves_finished_at_unset() {
        let mut j = job(2);
        j.record_outcome(true, chrono::Utc::now());
        assert_eq!(j.status, SyncJobStatus::Processing);
        assert_eq!(j.finished_at, None);
    }
}
