//! Retry Scheduler (C7) and Dead Letter Queue (C6).

use corelib::{
    DeadLetterEntry, DlqId, DlqResolutionStatus, FailureAnalysis, FailureCategory, JobId,
    RetryHistoryEntry,
};
use rand::Rng;

#[derive(Clone, Debug)]
pub enum RetryAction {
    ScheduleRetry {
        scheduled_for: chrono::DateTime<chrono::Utc>,
        delay: std::time::Duration,
    },
    DeadLetter(DeadLetterEntry),
}

#[derive(Clone, Debug)]
pub struct RetryOutcome {
    pub history: Vec<RetryHistoryEntry>,
    pub action: RetryAction,
}

#[derive(Default)]
pub struct RetryScheduler;

impl RetryScheduler {
    pub fn new() -> Self {
        Self
    }

    /// `retry_after_override` is the server-reported `Retry-After`, applied
    /// verbatim for `attempt_number == 1` of a `rate_limit` failure; later
    /// attempts fall back to the category's normal backoff (§4.6).
    #[allow(clippy::too_many_arguments)]
    pub fn handle_failure(
        &self,
        job_id: JobId,
        mut history: Vec<RetryHistoryEntry>,
        analysis: &FailureAnalysis,
        attempt_number: u32,
        error_code: Option<String>,
        error_message: String,
        retry_after_override: Option<std::time::Duration>,
        now: chrono::DateTime<chrono::Utc>,
    ) -> RetryOutcome {
        let should_continue = analysis.should_retry && attempt_number < analysis.max_retries;

        let delay = if should_continue {
            Some(self.compute_delay(analysis, attempt_number, retry_after_override))
        } else {
            None
        };

        let next_retry_at = delay.map(|d| now + chrono::Duration::from_std(d).unwrap_or_default());

        history.push(RetryHistoryEntry {
            job_id,
            attempt_number,
            category: analysis.category,
            error_code,
            error_message,
            delay_used_ms: delay.map(|d| d.as_millis() as u64).unwrap_or(0),
            next_retry_at,
        });

        let action = match (should_continue, next_retry_at, delay) {
            (true, Some(scheduled_for), Some(delay)) => RetryAction::ScheduleRetry { scheduled_for, delay },
            _ => RetryAction::DeadLetter(self.finalize(job_id, analysis, history.clone(), now)),
        };

        RetryOutcome { history, action }
    }

    fn compute_delay(
        &self,
        analysis: &FailureAnalysis,
        attempt_number: u32,
        retry_after_override: Option<std::time::Duration>,
    ) -> std::time::Duration {
        if attempt_number == 1 {
            if let (FailureCategory::RateLimit, Some(override_delay)) = (analysis.category, retry_after_override) {
                return override_delay.min(std::time::Duration::from_millis(analysis.max_delay_ms));
            }
        }

        let exponent = (attempt_number.saturating_sub(1)) as i32;
        let raw_ms = (analysis.base_delay_ms as f64) * analysis.backoff_multiplier.powi(exponent);
        let capped_ms = raw_ms.min(analysis.max_delay_ms as f64);

        let jitter = if analysis.jitter_range > 0.0 {
            rand::thread_rng().gen_range(-analysis.jitter_range..=analysis.jitter_range)
        } else {
            0.0
        };

        let jittered_ms = (capped_ms * (1.0 + jitter)).max(0.0);
        std::time::Duration::from_millis(jittered_ms as u64)
    }

    fn finalize(
        &self,
        job_id: JobId,
        analysis: &FailureAnalysis,
        history: Vec<RetryHistoryEntry>,
        now: chrono::DateTime<chrono::Utc>,
    ) -> DeadLetterEntry {
        let resolution = if analysis.category == FailureCategory::Validation {
            DlqResolutionStatus::Discarded
        } else {
            DlqResolutionStatus::PendingReview
        };

        DeadLetterEntry {
            id: DlqId::new_v4(),
            job_id,
            total_attempts: history.len() as u32,
            final_category: analysis.category,
            history,
            resolution,
            created_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analysis(category: FailureCategory) -> FailureAnalysis {
        FailureAnalysis::from_category(category, 0.9, "test")
    }

    #[test]
    fn retries_until_max_then_dead_letters() {
        let scheduler = RetryScheduler::new();
        let job_id = JobId::new_v4();
        let now = chrono::Utc::now();
        let a = analysis(FailureCategory::Temporary); // max_retries = 3

        let mut history = Vec::new();
        let mut outcome = scheduler.handle_failure(job_id, history.clone(), &a, 1, None, "boom".into(), None, now);
        assert!(matches!(outcome.action, RetryAction::ScheduleRetry { .. }));
        history = outcome.history.clone();

        outcome = scheduler.handle_failure(job_id, history.clone(), &a, 2, None, "boom".into(), None, now);
        assert!(matches!(outcome.action, RetryAction::ScheduleRetry { .. }));
        history = outcome.history.clone();

        outcome = scheduler.handle_failure(job_id, history, &a, 3, None, "boom".into(), None, now);
        match outcome.action {
            RetryAction::DeadLetter(entry) => {
                assert_eq!(entry.total_attempts, 3);
                assert_eq!(entry.resolution, DlqResolutionStatus::PendingReview);
            }
            _ => panic!("expected dead letter"),
        }
    }

    #[test]
    fn validation_failures_go_straight_to_discarded() {
        let scheduler = RetryScheduler::new();
        let job_id = JobId::new_v4();
        let now = chrono::Utc::now();
        let a = analysis(FailureCategory::Validation);

        let outcome = scheduler.handle_failure(job_id, Vec::new(), &a, 1, None, "bad input".into(), None, now);
        match outcome.action {
            RetryAction::DeadLetter(entry) => assert_eq!(entry.resolution, DlqResolutionStatus::Discarded),
            _ => panic!("validation must not retry"),
        }
    }

    #[test]
    fn rate_limit_retry_after_overrides_first_attempt_only() {
        let scheduler = RetryScheduler::new();
        let job_id = JobId::new_v4();
        let now = chrono::Utc::now();
        let a = analysis(FailureCategory::RateLimit);
        let retry_after = std::time::Duration::from_secs(7);

        let outcome = scheduler.handle_failure(job_id, Vec::new(), &a, 1, None, "429".into(), Some(retry_after), now);
        match outcome.action {
            RetryAction::ScheduleRetry { delay, .. } => assert_eq!(delay, retry_after),
            _ => panic!("expected a scheduled retry"),
        }

        let outcome2 = scheduler.handle_failure(job_id, outcome.history, &a, 2, None, "429".into(), Some(retry_after), now);
        match outcome2.action {
            RetryAction::ScheduleRetry { delay, .. } => assert_ne!(delay, retry_after),
            _ => panic!("expected a scheduled retry"),
        }
    }
}
