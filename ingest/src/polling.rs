use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::time::{interval, MissedTickBehavior};

use corelib::PollingSchedule;
use store::PollingRepository;
use sync::{SaleEvent, SyncTrigger};

/// A single newly-observed sale surfaced by polling a marketplace that
/// offers no webhooks.
pub struct PolledSale {
    pub listing_external_id: String,
}

/// Marketplace-specific poll implementation. One impl per polling-only
/// marketplace; `PollingDriver` is otherwise marketplace-agnostic.
#[async_trait]
pub trait PollingClient: Send + Sync {
    async fn poll_new_sales(&self, user_id: &corelib::UserId) -> anyhow::Result<Vec<PolledSale>>;
}

/// Runs the adaptive interval state machine described in §4.7's last
/// paragraph: sweeps due schedules, polls each, and adjusts its interval
/// based on what the poll found.
pub struct PollingDriver {
    repo: Arc<dyn PollingRepository>,
    listing_repo: Arc<dyn store::ListingRepository>,
    clients: std::collections::HashMap<String, Arc<dyn PollingClient>>,
    sync_trigger: Arc<SyncTrigger>,
}

impl PollingDriver {
    pub fn new(
        repo: Arc<dyn PollingRepository>,
        listing_repo: Arc<dyn store::ListingRepository>,
        clients: std::collections::HashMap<String, Arc<dyn PollingClient>>,
        sync_trigger: Arc<SyncTrigger>,
    ) -> Self {
        Self { repo, listing_repo, clients, sync_trigger }
    }

    /// Sweeps every due `(user, marketplace)` schedule once. Exposed
    /// separately from `run` so tests can drive it without a timer.
    pub async fn sweep_once(&self) -> anyhow::Result<()> {
        let now = Utc::now();
        let due = self.repo.fetch_due(now).await?;
        for schedule in due {
            self.poll_one(schedule, now).await;
        }
        Ok(())
    }

    async fn poll_one(&self, mut schedule: PollingSchedule, now: chrono::DateTime<Utc>) {
        let Some(client) = self.clients.get(&schedule.marketplace).cloned() else {
            tracing::warn!(marketplace = %schedule.marketplace, "no polling client registered; skipping");
            return;
        };

        match client.poll_new_sales(&schedule.user_id).await {
            Ok(sales) if sales.is_empty() => schedule.on_empty_poll(),
            Ok(sales) => {
                schedule.on_new_sales();
                for sale in sales {
                    self.handle_sale(&schedule, sale).await;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, marketplace = %schedule.marketplace, "poll failed");
                schedule.on_failure();
                if schedule.disabled {
                    tracing::error!(
                        user_id = %schedule.user_id,
                        marketplace = %schedule.marketplace,
                        "polling schedule disabled after repeated failures"
                    );
                }
            }
        }

        schedule.last_poll_at = Some(now);
        if let Err(e) = self.repo.upsert(&schedule).await {
            tracing::error!(error = %e, "failed to persist polling schedule");
        }
    }

    async fn handle_sale(&self, schedule: &PollingSchedule, sale: PolledSale) {
        let post = match self.listing_repo.fetch_post(&schedule.marketplace, &sale.listing_external_id).await {
            Ok(Some(post)) => post,
            Ok(None) => {
                tracing::warn!(external_id = %sale.listing_external_id, "polled sale for unknown listing post");
                return;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to resolve polled sale's listing post");
                return;
            }
        };

        let event = SaleEvent {
            listing_id: post.listing_id,
            triggering_event_id: uuid::Uuid::new_v4(),
            sold_marketplace: schedule.marketplace.clone(),
        };
        if let Err(e) = self.sync_trigger.handle_sale(event).await {
            tracing::error!(error = %e, "failed to trigger cross-platform sync for polled sale");
        }
    }

    /// Runs `sweep_once` forever on a fixed tick. Individual schedules still
    /// govern their own effective cadence via `fetch_due`; this tick just
    /// bounds how promptly a newly-due schedule is noticed.
    pub async fn run(self: Arc<Self>, tick: Duration) {
        let mut ticker = interval(tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if let Err(e) = self.sweep_once().await {
                tracing::error!(error = %e, "polling sweep failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FailingClient;

    #[async_trait]
    impl PollingClient for FailingClient {
        async fn poll_new_sales(&self, _user_id: &corelib::UserId) -> anyhow::Result<Vec<PolledSale>> {
            Err(anyhow::anyhow!("marketplace unreachable"))
        }
    }

    #[derive(Default)]
    struct FakePollingRepo {
        schedules: Mutex<Vec<PollingSchedule>>,
    }

    #[async_trait]
    impl PollingRepository for FakePollingRepo {
        async fn fetch(&self, user_id: &corelib::UserId, marketplace: &str) -> store::StoreResult<Option<PollingSchedule>> {
            Ok(self.schedules.lock().unwrap().iter().find(|s| &s.user_id == user_id && s.marketplace == marketplace).cloned())
        }
        async fn upsert(&self, schedule: &PollingSchedule) -> store::StoreResult<()> {
            let mut schedules = self.schedules.lock().unwrap();
            schedules.retain(|s| !(s.user_id == schedule.user_id && s.marketplace == schedule.marketplace));
            schedules.push(schedule.clone());
            Ok(())
        }
        async fn fetch_due(&self, _now: chrono::DateTime<Utc>) -> store::StoreResult<Vec<PollingSchedule>> {
            Ok(self.schedules.lock().unwrap().clone())
        }
    }

    fn schedule() -> PollingSchedule {
        PollingSchedule {
            user_id: uuid::Uuid::new_v4(),
            marketplace: "grailed".to_string(),
            min_interval_secs: 60,
            max_interval_secs: 3600,
            current_interval_secs: 600,
            consecutive_failures: 0,
            max_failures: 3,
            disabled: false,
            last_poll_at: None,
        }
    }

    #[tokio::test]
    async fn repo_upsert_then_fetch_due_round_trips() {
        let repo = FakePollingRepo::default();
        repo.upsert(&schedule()).await.unwrap();

        let due = repo.fetch_due(Utc::now()).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].marketplace, "grailed");
    }

    #[tokio::test]
    async fn repeated_failures_disable_the_schedule() {
        let mut s = schedule();
        for _ in 0..4 {
            s.on_failure();
        }
        assert!(s.disabled);

        let client: Arc<dyn PollingClient> = Arc::new(FailingClient);
        assert!(client.poll_new_sales(&s.user_id).await.is_err());
    }
}
