use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::ids::{MarketplaceTag, UserId, WebhookEventId};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WebhookConfiguration {
    pub user_id: UserId,
    pub marketplace: MarketplaceTag,
    pub endpoint: String,
    pub secret: String,
    pub subscribed_events: Vec<String>,
    pub verified: bool,
    pub consecutive_errors: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookProcessingStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Ignored,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizedEventKind {
    SaleCompleted,
    ListingEnded,
    InventoryUpdated,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub id: WebhookEventId,
    pub marketplace: MarketplaceTag,
    pub external_event_id: String,
    pub raw_payload: serde_json::Value,
    pub headers: HashMap<String, String>,
    pub signature_valid: bool,
    pub status: WebhookProcessingStatus,
    /// Set when `deduplicate` finds this event is a repeat; points at the
    /// event that is actually processed.
    pub duplicate_of: Option<WebhookEventId>,
    pub kind: Option<NormalizedEventKind>,
    pub priority: u8,
}

impl NormalizedEventKind {
    /// Sales outrank informational updates (§4.7 `enqueue`).
    pub fn default_priority(self) -> u8 {
        match self {
            NormalizedEventKind::SaleCompleted => 10,
            NormalizedEventKind::ListingEnded => 5,
            NormalizedEventKind::InventoryUpdated => 1,
        }
    }
}

/// Polling-only marketplace state (§4.7, last paragraph). The interval
/// adapts: halves toward `min` on new sales, grows ×1.5 toward `max` on
/// empty polls.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PollingSchedule {
    pub user_id: UserId,
    pub marketplace: MarketplaceTag,
    pub min_interval_secs: u32,
    pub max_interval_secs: u32,
    pub current_interval_secs: u32,
    pub consecutive_failures: u32,
    pub max_failures: u32,
    pub disabled: bool,
    pub last_poll_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl PollingSchedule {
    pub fn on_new_sales(&mut self) {
        self.current_interval_secs = (self.current_interval_secs / 2).max(self.min_interval_secs);
        self.consecutive_failures = 0;
    }

    pub fn on_empty_poll(&mut self) {
        let grown = (self.current_interval_secs as f64 * 1.5) as u32;
        self.current_interval_secs = grown.min(self.max_interval_secs);
    }

    pub fn on_failure(&mut self) {
        self.consecutive_failures += 1;
        if self.consecutive_failures > self.max_failures {
            self.disabled = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule() -> PollingSchedule {
        PollingSchedule {
            user_id: uuid::Uuid::new_v4(),
            marketplace: "poshmark".to_string(),
            min_interval_secs: 60,
            max_interval_secs: 3600,
            current_interval_secs: 600,
            consecutive_failures: 0,
            max_failures: 3,
            disabled: false,
            last_poll_at: None,
        }
    }

    #[test]
    fn sales_halve_interval_toward_floor() {
        let mut s = schedule();
        s.on_new_sales();
        assert_eq!(s.current_interval_secs, 300);
    }

    #[test]
    fn empty_polls_grow_interval_toward_ceiling() {
        let mut s = schedule();
        s.on_empty_poll();
        assert_eq!(s.current_interval_secs, 900);
    }

    #[test]
    fn excess_failures_disable_the_schedule() {
        let mut s = schedule();
        for _ in 0..4 {
            s.on_failure();
        }
        assert!(s.disabled);
    }
}
