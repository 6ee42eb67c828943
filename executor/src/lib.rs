//! Executor / Job Queue (C10): carries a firing or sync sub-job through
//! safety check → engine invocation → log → retry bookkeeping (§4.2).
//!
//! Non-responsibilities:
//! - Deciding when a rule is due (the scheduler does this).
//! - Classifying failures (the reliability crate does this; the executor
//!   only calls into it).

pub mod queue;
mod rule_firing;
mod sync_delist;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;

use corelib::{ListingPostId, SyncJobId};
use engines::MarketplaceEngine;
use queue::{Job, JobQueue};
use reliability::{CircuitBreaker, FailureCategorizer, MarketplacePatternTable};
use retry::RetryScheduler;
use store::{AuditLogRepository, DlqRepository, ListingRepository, RuleRepository, SyncRepository, UserRepository};

/// Everything a worker needs to carry a job to completion. Cloned cheaply
/// (every field is an `Arc`) so each spawned worker owns its copy.
#[derive(Clone)]
pub struct Executor {
    queue: Arc<JobQueue>,
    engines: Arc<HashMap<String, Arc<dyn MarketplaceEngine>>>,
    rule_repo: Arc<dyn RuleRepository>,
    user_repo: Arc<dyn UserRepository>,
    listing_repo: Arc<dyn ListingRepository>,
    audit_repo: Arc<dyn AuditLogRepository>,
    sync_repo: Arc<dyn SyncRepository>,
    dlq_repo: Arc<dyn DlqRepository>,
    rate_limiter: Arc<ratelimit::RateLimiter>,
    circuit_breaker: Arc<CircuitBreaker>,
    scheduler: Arc<scheduler::Scheduler>,
    categorizer: Arc<FailureCategorizer>,
    retry_scheduler: Arc<RetryScheduler>,
}

#[allow(clippy::too_many_arguments)]
impl Executor {
    pub fn new(
        engines: HashMap<String, Arc<dyn MarketplaceEngine>>,
        rule_repo: Arc<dyn RuleRepository>,
        user_repo: Arc<dyn UserRepository>,
        listing_repo: Arc<dyn ListingRepository>,
        audit_repo: Arc<dyn AuditLogRepository>,
        sync_repo: Arc<dyn SyncRepository>,
        dlq_repo: Arc<dyn DlqRepository>,
        rate_limiter: Arc<ratelimit::RateLimiter>,
        circuit_breaker: Arc<CircuitBreaker>,
        scheduler: Arc<scheduler::Scheduler>,
        marketplace_patterns: MarketplacePatternTable,
    ) -> Self {
        Self {
            queue: Arc::new(JobQueue::new()),
            engines: Arc::new(engines),
            rule_repo,
            user_repo,
            listing_repo,
            audit_repo,
            sync_repo,
            dlq_repo,
            rate_limiter,
            circuit_breaker,
            scheduler,
            categorizer: Arc::new(FailureCategorizer::new(marketplace_patterns)),
            retry_scheduler: Arc::new(RetryScheduler::new()),
        }
    }

    /// Non-blocking (§4.2 `submit`): queues the job and returns immediately.
    pub fn submit_rule_firing(&self, firing: scheduler::Firing) {
        self.queue.submit(Job::new_rule_firing(firing));
    }

    pub fn submit_sync_delist(
        &self,
        sync_job_id: SyncJobId,
        listing_post_id: ListingPostId,
        marketplace: String,
        external_id: String,
    ) {
        self.queue
            .submit(Job::new_sync_delist(sync_job_id, listing_post_id, marketplace, external_id, Utc::now()));
    }

    /// Spawns `concurrency` worker tasks. Each drains the shared queue in
    /// priority-then-scheduled order, honoring per-key serialization.
    pub fn run(self: Arc<Self>, concurrency: usize) -> Vec<tokio::task::JoinHandle<()>> {
        (0..concurrency.max(1))
            .map(|worker_id| {
                let executor = self.clone();
                tokio::spawn(async move { executor.worker_loop(worker_id).await })
            })
            .collect()
    }

    async fn worker_loop(&self, worker_id: usize) {
        tracing::info!(worker_id, "executor worker started");
        loop {
            let job = self.queue.checkout(Utc::now).await;
            let key = job.key;

            if let Err(e) = self.handle_job(job).await {
                tracing::error!(worker_id, error = %e, "unhandled error while processing job");
            }

            self.queue.release(key);
        }
    }

    async fn handle_job(&self, job: Job) -> anyhow::Result<()> {
        match &job.payload {
            queue::JobPayload::RuleFiring { .. } => rule_firing::handle(self, job).await,
            queue::JobPayload::SyncDelist { .. } => sync_delist::handle(self, job).await,
        }
    }

    /// Emergency pause (§4.2 "Cancellation"): cancels pending timers and
    /// marks drained jobs `status=skipped`. In-flight workers finish their
    /// current action and then idle until `resume`.
    pub async fn pause(&self) {
        let drained = self.queue.pause_and_drain();
        for job in drained {
            match job.payload {
                queue::JobPayload::RuleFiring { firing } => {
                    let log = corelib::AutomationLog {
                        id: uuid::Uuid::new_v4(),
                        user_id: uuid::Uuid::nil(),
                        rule_id: firing.rule_id,
                        outcome: corelib::LogOutcome::Skipped,
                        message: "cancelled by emergency pause".to_string(),
                        skip_reason: Some("emergency_pause".to_string()),
                        created_at: Utc::now(),
                    };
                    if let Err(e) = self.audit_repo.record(&log).await {
                        tracing::warn!(error = %e, "failed to record pause-skip log");
                    }
                }
                queue::JobPayload::SyncDelist { sync_job_id, .. } => {
                    tracing::warn!(%sync_job_id, "sync delist sub-job cancelled by emergency pause; needs resubmission");
                }
            }
        }
    }

    pub fn resume(&self) {
        self.queue.resume();
    }
}
