//! Cross-Platform Sync Coordinator (C12): on a normalized sale event, fan out
//! a delist sub-job to every other marketplace still carrying a live post of
//! the same listing (§4.10).

use std::sync::Arc;

use chrono::Utc;

use corelib::{CrossPlatformSyncJob, ListingId, MarketplaceTag, SyncJobStatus, WebhookEventId};
use store::{ListingRepository, SyncRepository};

pub struct SyncTrigger {
    listing_repo: Arc<dyn ListingRepository>,
    sync_repo: Arc<dyn SyncRepository>,
    executor: Arc<executor::Executor>,
}

/// A normalized sale event, as produced by the webhook ingestor or a polling
/// adapter, naming the listing that just sold somewhere.
pub struct SaleEvent {
    pub listing_id: ListingId,
    pub triggering_event_id: WebhookEventId,
    pub sold_marketplace: MarketplaceTag,
}

impl SyncTrigger {
    pub fn new(
        listing_repo: Arc<dyn ListingRepository>,
        sync_repo: Arc<dyn SyncRepository>,
        executor: Arc<executor::Executor>,
    ) -> Self {
        Self { listing_repo, sync_repo, executor }
    }

    /// Runs §4.10 steps 1-3: resolves targets, creates the job (or no-ops if
    /// one is already active for this `(listing, event)`), and submits one
    /// high-priority delist sub-job per target.
    #[tracing::instrument(skip(self), fields(listing_id = %event.listing_id))]
    pub async fn handle_sale(&self, event: SaleEvent) -> anyhow::Result<Option<CrossPlatformSyncJob>> {
        let posts = self.listing_repo.fetch_posts_for_listing(&event.listing_id).await?;

        let targets: Vec<_> = posts
            .iter()
            .filter(|p| p.marketplace != event.sold_marketplace && p.is_delist_target())
            .collect();

        if targets.is_empty() {
            tracing::debug!("no other live posts to delist");
            return Ok(None);
        }

        let job = CrossPlatformSyncJob {
            id: uuid::Uuid::new_v4(),
            listing_id: event.listing_id,
            triggering_event_id: event.triggering_event_id,
            source_marketplace: event.sold_marketplace.clone(),
            targets: targets.iter().map(|p| p.marketplace.clone()).collect(),
            total: targets.len() as u32,
            done: 0,
            failed: 0,
            status: SyncJobStatus::Processing,
            started_at: Utc::now(),
            finished_at: None,
        };

        let Some(job) = self.sync_repo.create_if_absent(&job).await? else {
            tracing::debug!("a sync job for this listing/event is already active; skipping");
            return Ok(None);
        };

        for post in targets {
            self.executor.submit_sync_delist(
                job.id,
                post.id,
                post.marketplace.clone(),
                post.external_id.clone(),
            );
        }

        Ok(Some(job))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use corelib::{Listing, ListingPost, ListingPostStatus, ListingStatus, UserId};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use store::StoreResult;

    struct FakeListingRepo {
        posts: Vec<ListingPost>,
    }

    #[async_trait]
    impl ListingRepository for FakeListingRepo {
        async fn fetch_listing(&self, _id: &ListingId) -> StoreResult<Option<Listing>> {
            Ok(None)
        }
        async fn fetch_listings_for_user(&self, _user_id: &UserId) -> StoreResult<Vec<Listing>> {
            Ok(Vec::new())
        }
        async fn fetch_posts_for_listing(&self, _listing_id: &ListingId) -> StoreResult<Vec<ListingPost>> {
            Ok(self.posts.clone())
        }
        async fn fetch_post(&self, marketplace: &str, external_id: &str) -> StoreResult<Option<ListingPost>> {
            Ok(self
                .posts
                .iter()
                .find(|p| p.marketplace == marketplace && p.external_id == external_id)
                .cloned())
        }
        async fn set_post_status(
            &self,
            _post_id: &corelib::ListingPostId,
            _status: ListingPostStatus,
        ) -> StoreResult<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeSyncRepo {
        jobs: Mutex<HashMap<corelib::SyncJobId, CrossPlatformSyncJob>>,
    }

    #[async_trait]
    impl SyncRepository for FakeSyncRepo {
        async fn create_if_absent(
            &self,
            job: &CrossPlatformSyncJob,
        ) -> StoreResult<Option<CrossPlatformSyncJob>> {
            let mut jobs = self.jobs.lock().unwrap();
            let already_active = jobs.values().any(|j| {
                j.listing_id == job.listing_id
                    && j.triggering_event_id == job.triggering_event_id
                    && j.is_active()
            });
            if already_active {
                return Ok(None);
            }
            jobs.insert(job.id, job.clone());
            Ok(Some(job.clone()))
        }

        async fn save(&self, job: &CrossPlatformSyncJob) -> StoreResult<()> {
            self.jobs.lock().unwrap().insert(job.id, job.clone());
            Ok(())
        }

        async fn fetch(&self, id: &corelib::SyncJobId) -> StoreResult<Option<CrossPlatformSyncJob>> {
            Ok(self.jobs.lock().unwrap().get(id).cloned())
        }
    }

    fn post(marketplace: &str, status: ListingPostStatus) -> ListingPost {
        ListingPost {
            id: uuid::Uuid::new_v4(),
            listing_id: uuid::Uuid::new_v4(),
            marketplace: marketplace.to_string(),
            external_id: format!("ext-{marketplace}"),
            status,
        }
    }

    fn sample_event(listing_id: ListingId) -> SaleEvent {
        SaleEvent {
            listing_id,
            triggering_event_id: uuid::Uuid::new_v4(),
            sold_marketplace: "poshmark".to_string(),
        }
    }

    #[tokio::test]
    async fn fans_out_to_every_other_live_target() {
        let listing_id = uuid::Uuid::new_v4();
        let posts = vec![
            post("poshmark", ListingPostStatus::Posted),
            post("mercari", ListingPostStatus::Posted),
            post("depop", ListingPostStatus::Delisted),
        ];
        let listing_repo = Arc::new(FakeListingRepo { posts });
        let sync_repo = Arc::new(FakeSyncRepo::default());

        let targets: Vec<_> = listing_repo
            .fetch_posts_for_listing(&listing_id)
            .await
            .unwrap()
            .into_iter()
            .filter(|p| p.marketplace != "poshmark" && p.is_delist_target())
            .collect();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].marketplace, "mercari");

        let job = CrossPlatformSyncJob {
            id: uuid::Uuid::new_v4(),
            listing_id,
            triggering_event_id: sample_event(listing_id).triggering_event_id,
            source_marketplace: "poshmark".to_string(),
            targets: vec!["mercari".to_string()],
            total: 1,
            done: 0,
            failed: 0,
            status: SyncJobStatus::Processing,
            started_at: Utc::now(),
            finished_at: None,
        };
        assert!(sync_repo.create_if_absent(&job).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn second_job_for_same_listing_and_event_is_rejected() {
        let sync_repo = FakeSyncRepo::default();
        let listing_id = uuid::Uuid::new_v4();
        let event_id = uuid::Uuid::new_v4();

        let job = CrossPlatformSyncJob {
            id: uuid::Uuid::new_v4(),
            listing_id,
            triggering_event_id: event_id,
            source_marketplace: "poshmark".to_string(),
            targets: vec!["mercari".to_string()],
            total: 1,
            done: 0,
            failed: 0,
            status: SyncJobStatus::Processing,
            started_at: Utc::now(),
            finished_at: None,
        };
        assert!(sync_repo.create_if_absent(&job).await.unwrap().is_some());

        let second = CrossPlatformSyncJob { id: uuid::Uuid::new_v4(), ..job };
        assert!(sync_repo.create_if_absent(&second).await.unwrap().is_none());
    }
}
