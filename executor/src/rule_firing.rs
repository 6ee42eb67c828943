use chrono::Utc;

use corelib::{AutomationLog, LogOutcome};
use engines::EngineContext;
use reliability::RawFailure;

use crate::queue::{Job, JobPayload};
use crate::Executor;

pub async fn handle(executor: &Executor, job: Job) -> anyhow::Result<()> {
    let JobPayload::RuleFiring { firing } = &job.payload else {
        unreachable!("handle called with a non-rule-firing job");
    };

    let now = Utc::now();

    let Some(rule) = executor.rule_repo.fetch_rule(&firing.rule_id).await? else {
        tracing::warn!(rule_id = %firing.rule_id, "skipping firing for a rule that no longer exists");
        return Ok(());
    };

    if !rule.enabled {
        record_skip(executor, &rule, "rule_disabled").await;
        return Ok(());
    }

    let user = executor.user_repo.fetch_user(&rule.user_id).await?;

    let connection = executor.user_repo.fetch_connection(&rule.user_id, &rule.marketplace).await?;
    let Some(connection) = connection else {
        let failure = RawFailure {
            marketplace: rule.marketplace.clone(),
            http_status: Some(401),
            error_code: Some("no_connection".to_string()),
            message: format!("no marketplace connection for {}", rule.marketplace),
            ..Default::default()
        };
        return fail(executor, &job, &rule, failure, now).await;
    };

    let Some(engine) = executor.engines.get(&rule.marketplace).cloned() else {
        let failure = RawFailure {
            marketplace: rule.marketplace.clone(),
            error_code: Some("unsupported_marketplace".to_string()),
            message: format!("no engine registered for {}", rule.marketplace),
            ..Default::default()
        };
        return fail(executor, &job, &rule, failure, now).await;
    };

    let ctx = EngineContext {
        connection: &connection,
        rate_limiter: &executor.rate_limiter,
        circuit_breaker: &executor.circuit_breaker,
        listing_repo: executor.listing_repo.as_ref(),
        now,
    };

    match engine.execute(&rule, &user, &ctx).await {
        Ok(outcome) => {
            executor.rule_repo.record_execution(&rule.id, true, None, now).await?;
            executor
                .audit_repo
                .record(&AutomationLog {
                    id: uuid::Uuid::new_v4(),
                    user_id: rule.user_id,
                    rule_id: rule.id,
                    outcome: LogOutcome::Success,
                    message: outcome.details,
                    skip_reason: None,
                    created_at: now,
                })
                .await?;
            advance_on_first_attempt(executor, &job, now).await;
            Ok(())
        }
        Err(failure) => fail(executor, &job, &rule, failure, now).await,
    }
}

async fn record_skip(executor: &Executor, rule: &corelib::AutomationRule, reason: &str) {
    let log = AutomationLog {
        id: uuid::Uuid::new_v4(),
        user_id: rule.user_id,
        rule_id: rule.id,
        outcome: LogOutcome::Skipped,
        message: format!("firing skipped: {reason}"),
        skip_reason: Some(reason.to_string()),
        created_at: Utc::now(),
    };
    if let Err(e) = executor.audit_repo.record(&log).await {
        tracing::warn!(error = %e, "failed to record skip log");
    }
}

async fn fail(
    executor: &Executor,
    job: &Job,
    rule: &corelib::AutomationRule,
    failure: RawFailure,
    now: chrono::DateTime<Utc>,
) -> anyhow::Result<()> {
    executor
        .rule_repo
        .record_execution(&rule.id, false, Some(failure.message.clone()), now)
        .await?;
    executor
        .audit_repo
        .record(&AutomationLog {
            id: uuid::Uuid::new_v4(),
            user_id: rule.user_id,
            rule_id: rule.id,
            outcome: LogOutcome::Failure,
            message: failure.message.clone(),
            skip_reason: None,
            created_at: now,
        })
        .await?;

    // An open circuit rejected the call before it ever reached the
    // marketplace. Reschedule on the breaker's own cadence instead of
    // running this through per-job retry backoff — it isn't a marketplace
    // failure and must not consume the job's retry budget.
    if failure.error_code.as_deref() == Some("circuit_open") {
        advance_on_first_attempt(executor, job, now).await;
        let retry_at = failure.circuit_retry_at.unwrap_or(now + chrono::Duration::seconds(30));
        executor.queue.requeue_at_admission_retry(job.clone(), retry_at);
        return Ok(());
    }

    let analysis = executor.categorizer.classify(&failure);

    let retry_after_override = failure
        .headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("retry-after"))
        .and_then(|(_, v)| v.parse::<u64>().ok())
        .map(std::time::Duration::from_secs);

    let outcome = executor.retry_scheduler.handle_failure(
        job.id,
        job.history.clone(),
        &analysis,
        job.attempt_number,
        failure.error_code.clone(),
        failure.message.clone(),
        retry_after_override,
        now,
    );

    advance_on_first_attempt(executor, job, now).await;

    match outcome.action {
        retry::RetryAction::ScheduleRetry { scheduled_for, .. } => {
            executor.queue.requeue(job.clone(), scheduled_for, outcome.history);
        }
        retry::RetryAction::DeadLetter(entry) => {
            executor.dlq_repo.insert(&entry).await?;
        }
    }

    Ok(())
}

async fn advance_on_first_attempt(executor: &Executor, job: &Job, now: chrono::DateTime<Utc>) {
    if job.attempt_number != 1 {
        return;
    }
    let JobPayload::RuleFiring { firing } = &job.payload else { return };
    if let Err(e) = executor.scheduler.advance(&firing.schedule, now).await {
        tracing::warn!(error = %e, schedule_id = %firing.schedule.id, "failed to advance schedule");
    }
}
