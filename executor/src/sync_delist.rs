use chrono::Utc;

use crate::queue::{Job, JobPayload};
use crate::Executor;

/// Handles one target of a Cross-Platform Sync Coordinator fan-out (§4.10
/// step 3): delist a single Listing Post through its marketplace's engine.
pub async fn handle(executor: &Executor, job: Job) -> anyhow::Result<()> {
    let JobPayload::SyncDelist {
        sync_job_id,
        listing_post_id,
        marketplace,
        external_id,
    } = &job.payload
    else {
        unreachable!("handle called with a non-sync-delist job");
    };

    let now = Utc::now();

    let Some(engine) = executor.engines.get(marketplace).cloned() else {
        tracing::error!(%marketplace, "no engine registered; cannot delist sync target");
        return finalize(executor, *sync_job_id, false, now).await;
    };

    let Some(post) = executor.listing_repo.fetch_post(marketplace, external_id).await? else {
        tracing::warn!(%marketplace, %external_id, "sync target listing post no longer exists");
        return finalize(executor, *sync_job_id, false, now).await;
    };

    let connection_owner = executor
        .listing_repo
        .fetch_listing(&post.listing_id)
        .await?
        .map(|l| l.user_id);

    let Some(user_id) = connection_owner else {
        return finalize(executor, *sync_job_id, false, now).await;
    };

    let Some(connection) = executor.user_repo.fetch_connection(&user_id, marketplace).await? else {
        return finalize(executor, *sync_job_id, false, now).await;
    };

    let ctx = engines::EngineContext {
        connection: &connection,
        rate_limiter: &executor.rate_limiter,
        circuit_breaker: &executor.circuit_breaker,
        listing_repo: executor.listing_repo.as_ref(),
        now,
    };

    match engine.delist(&connection, external_id, &ctx).await {
        Ok(()) => {
            executor
                .listing_repo
                .set_post_status(&post.id, corelib::ListingPostStatus::Delisted)
                .await?;
            finalize(executor, *sync_job_id, true, now).await
        }
        Err(failure) if failure.error_code.as_deref() == Some("circuit_open") => {
            // Same rule as rule firings: an open-circuit rejection is
            // rescheduled on the breaker's cadence, not the job's own retry
            // budget (§7).
            let retry_at = failure.circuit_retry_at.unwrap_or(now + chrono::Duration::seconds(30));
            executor.queue.requeue_at_admission_retry(job.clone(), retry_at);
            Ok(())
        }
        Err(failure) => {
            let analysis = executor.categorizer.classify(&failure);
            let outcome = executor.retry_scheduler.handle_failure(
                job.id,
                job.history.clone(),
                &analysis,
                job.attempt_number,
                failure.error_code.clone(),
                failure.message.clone(),
                None,
                now,
            );

            match outcome.action {
                retry::RetryAction::ScheduleRetry { scheduled_for, .. } => {
                    executor.queue.requeue(job.clone(), scheduled_for, outcome.history);
                    Ok(())
                }
                retry::RetryAction::DeadLetter(entry) => {
                    executor.dlq_repo.insert(&entry).await?;
                    finalize(executor, *sync_job_id, false, now).await
                }
            }
        }
    }
}

/// Pulls the job, records this target's outcome, and persists its
/// (possibly terminal) status — §4.10 step 4-5.
async fn finalize(executor: &Executor, sync_job_id: corelib::SyncJobId, succeeded: bool, now: chrono::DateTime<Utc>) -> anyhow::Result<()> {
    let Some(mut sync_job) = executor.sync_repo.fetch(&sync_job_id).await? else {
        tracing::warn!(%sync_job_id, "sync job vanished before target outcome could be recorded");
        return Ok(());
    };
    sync_job.record_outcome(succeeded, now);
    executor.sync_repo.save(&sync_job).await?;
    Ok(())
}
