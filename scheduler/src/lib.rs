//! Scheduler (C9): maintains `next_run_at` for every active schedule and
//! hands due firings to the executor.
//!
//! Non-responsibilities:
//! - Executing rules against a marketplace (the executor + engines do this).
//! - Retry/backoff bookkeeping (the retry scheduler does this).

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Timelike, Utc};
use rand::Rng;

use corelib::{AutomationSchedule, RuleId, ScheduleId, ScheduleType};
use store::RuleRepository;

#[derive(Clone, Debug)]
pub struct Firing {
    pub rule_id: RuleId,
    pub schedule: AutomationSchedule,
    pub scheduled_for: DateTime<Utc>,
}

pub struct Scheduler {
    repo: Arc<dyn RuleRepository>,
    /// Process-wide emergency pause (§4.1 `deactivate_all`/`reactivate_all`).
    /// In-memory only: persisted schedule rows are untouched by a pause, so
    /// a restart does not need to recover this flag.
    paused: AtomicBool,
}

impl Scheduler {
    pub fn new(repo: Arc<dyn RuleRepository>) -> Self {
        Self {
            repo,
            paused: AtomicBool::new(false),
        }
    }

    #[tracing::instrument(skip(self), fields(%rule_id))]
    pub async fn activate(&self, rule_id: &RuleId) -> anyhow::Result<()> {
        let schedules = self.repo.fetch_active_schedules_for_rule(rule_id).await?;
        for schedule in schedules {
            self.recompute_and_save(schedule, Utc::now()).await?;
        }
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(%rule_id))]
    pub async fn deactivate(&self, rule_id: &RuleId) -> anyhow::Result<()> {
        self.repo.deactivate_schedules_for_rule(rule_id).await?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub async fn deactivate_all(&self) -> anyhow::Result<()> {
        self.paused.store(true, Ordering::SeqCst);
        self.repo.deactivate_all_schedules().await?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub async fn reactivate_all(&self) -> anyhow::Result<()> {
        self.repo.reactivate_all_schedules().await?;
        self.paused.store(false, Ordering::SeqCst);
        Ok(())
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Schedules due at `now`, already filtered for eligibility beyond the
    /// `active`/`next_run_at <= now` predicate the store applies.
    #[tracing::instrument(skip(self), fields(limit))]
    pub async fn due_firings(&self, now: DateTime<Utc>, limit: i64) -> anyhow::Result<Vec<Firing>> {
        if self.paused.load(Ordering::SeqCst) {
            return Ok(Vec::new());
        }

        let candidates = self.repo.fetch_due_schedules(now, limit).await?;
        let mut out = Vec::with_capacity(candidates.len());

        for schedule in candidates {
            match self.repo.fetch_rule(&schedule.rule_id).await? {
                Some(rule) if rule.enabled && self.is_eligible(&schedule, now) => {
                    let scheduled_for = schedule.next_run_at.unwrap_or(now);
                    out.push(Firing {
                        rule_id: schedule.rule_id,
                        schedule,
                        scheduled_for,
                    });
                }
                Some(_) => {
                    tracing::debug!(schedule_id = %schedule.id, "skipping schedule: rule disabled or ineligible");
                }
                None => {
                    tracing::warn!(schedule_id = %schedule.id, "skipping schedule for missing rule");
                }
            }
        }

        Ok(out)
    }

    fn is_eligible(&self, schedule: &AutomationSchedule, now: DateTime<Utc>) -> bool {
        if !schedule.active || schedule.max_executions_reached() || !schedule.within_validity_window(now) {
            return false;
        }
        match schedule.last_run_at {
            Some(last) => now - last >= schedule.interval_lower_bound(),
            None => true,
        }
    }

    /// Called by the executor once a firing has been fully handled (whether
    /// it succeeded, failed, or was skipped). CAS-advances `next_run_at`;
    /// a `false` result means another sweep already advanced it first.
    #[tracing::instrument(skip(self, schedule), fields(schedule_id = %schedule.id))]
    pub async fn advance(&self, schedule: &AutomationSchedule, fired_at: DateTime<Utc>) -> anyhow::Result<bool> {
        let next_run_at = self.next_run(schedule, fired_at);
        self.repo.advance_schedule(&schedule.id, fired_at, next_run_at).await.map_err(Into::into)
    }

    async fn recompute_and_save(&self, mut schedule: AutomationSchedule, now: DateTime<Utc>) -> anyhow::Result<()> {
        schedule.next_run_at = self.next_run(&schedule, now);
        if schedule.next_run_at.is_none() {
            tracing::warn!(schedule_id = %schedule.id, "unparseable schedule expression; demoting to inactive");
            schedule.active = false;
        }
        self.repo.upsert_schedule(&schedule).await?;
        Ok(())
    }

    /// Recomputes `next_run_at` per the schedule's type (§4.1's table).
    /// `None` means the expression could not be evaluated; the caller
    /// demotes the schedule to inactive and logs.
    pub fn next_run(&self, schedule: &AutomationSchedule, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        next_run_at(&schedule.schedule_type, now)
    }
}

fn next_run_at(schedule_type: &ScheduleType, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match schedule_type {
        ScheduleType::Cron { expression, time_zone } => next_cron_fire(expression, time_zone, now),
        ScheduleType::Interval { interval_minutes } => Some(now + Duration::minutes(*interval_minutes as i64)),
        ScheduleType::Continuous { interval_seconds } => {
            let floor = (*interval_seconds).max(corelib::MIN_CONTINUOUS_INTERVAL_SECS) as f64;
            let jitter = rand::thread_rng().gen_range(-0.1..=0.1);
            let seconds = floor * (1.0 + jitter);
            Some(now + Duration::milliseconds((seconds * 1_000.0) as i64))
        }
        ScheduleType::TimeOfDay { hours, time_zone } => next_time_of_day_fire(hours, time_zone, now),
    }
}

fn next_cron_fire(expression: &str, time_zone: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let schedule = cron::Schedule::from_str(expression).ok()?;
    let tz = chrono_tz::Tz::from_str(time_zone).ok()?;
    let local_now = now.with_timezone(&tz);
    schedule.after(&local_now).next().map(|d| d.with_timezone(&Utc))
}

fn next_time_of_day_fire(hours: &[u8], time_zone: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if hours.is_empty() {
        return None;
    }
    let tz = chrono_tz::Tz::from_str(time_zone).ok()?;
    let local_now = now.with_timezone(&tz);

    let mut sorted = hours.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let today = local_now.date_naive();
    let current_hour = local_now.hour();

    let next_hour_today = sorted.iter().copied().find(|h| (*h as u32) > current_hour);

    let candidate_date = match next_hour_today {
        Some(_) => today,
        None => today.succ_opt()?,
    };
    let hour = next_hour_today.unwrap_or(sorted[0]);

    let naive = candidate_date.and_hms_opt(hour as u32, 0, 0)?;
    let local = tz.from_local_datetime(&naive).single()?;
    Some(local.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule(schedule_type: ScheduleType) -> AutomationSchedule {
        AutomationSchedule {
            id: uuid::Uuid::new_v4(),
            rule_id: uuid::Uuid::new_v4(),
            schedule_type,
            active: true,
            start_date: None,
            end_date: None,
            max_executions: None,
            execution_count: 0,
            last_run_at: None,
            next_run_at: None,
        }
    }

    #[test]
    fn interval_schedule_advances_by_exact_minutes() {
        let now = Utc::now();
        let next = next_run_at(&ScheduleType::Interval { interval_minutes: 15 }, now).unwrap();
        assert_eq!(next, now + Duration::minutes(15));
    }

    #[test]
    fn continuous_schedule_stays_within_jitter_bounds() {
        let now = Utc::now();
        for _ in 0..100 {
            let next = next_run_at(&ScheduleType::Continuous { interval_seconds: 120 }, now).unwrap();
            let delta = (next - now).num_milliseconds() as f64;
            assert!(delta >= 120_000.0 * 0.9);
            assert!(delta <= 120_000.0 * 1.1);
        }
    }

    #[test]
    fn continuous_schedule_floors_below_minimum() {
        let now = Utc::now();
        let next = next_run_at(&ScheduleType::Continuous { interval_seconds: 5 }, now).unwrap();
        let delta = (next - now).num_milliseconds() as f64;
        assert!(delta >= 60_000.0 * 0.9);
    }

    #[test]
    fn time_of_day_picks_smallest_later_hour_today() {
        let now = Utc.with_ymd_and_hms(2026, 1, 5, 8, 0, 0).unwrap();
        let next = next_time_of_day_fire(&[6, 12, 20], "UTC", now).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 5, 12, 0, 0).unwrap());
    }

    #[test]
    fn time_of_day_rolls_to_tomorrow_when_all_hours_passed() {
        let now = Utc.with_ymd_and_hms(2026, 1, 5, 23, 0, 0).unwrap();
        let next = next_time_of_day_fire(&[6, 12], "UTC", now).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 6, 6, 0, 0).unwrap());
    }

    #[tokio::test]
    async fn due_firings_returns_empty_while_paused() {
        struct NoopRepo;

        #[async_trait::async_trait]
        impl RuleRepository for NoopRepo {
            async fn fetch_rule(&self, _id: &RuleId) -> store::StoreResult<Option<corelib::AutomationRule>> {
                unreachable!("paused scheduler must not query the store")
            }
            async fn fetch_enabled_rules(&self) -> store::StoreResult<Vec<corelib::AutomationRule>> {
                unreachable!()
            }
            async fn record_execution(
                &self,
                _rule_id: &RuleId,
                _succeeded: bool,
                _error: Option<String>,
                _at: DateTime<Utc>,
            ) -> store::StoreResult<()> {
                unreachable!()
            }
            async fn fetch_active_schedules_for_rule(&self, _rule_id: &RuleId) -> store::StoreResult<Vec<AutomationSchedule>> {
                unreachable!()
            }
            async fn fetch_due_schedules(&self, _now: DateTime<Utc>, _limit: i64) -> store::StoreResult<Vec<AutomationSchedule>> {
                unreachable!("paused scheduler must not query the store")
            }
            async fn upsert_schedule(&self, _schedule: &AutomationSchedule) -> store::StoreResult<()> {
                unreachable!()
            }
            async fn advance_schedule(
                &self,
                _schedule_id: &ScheduleId,
                _fired_at: DateTime<Utc>,
                _next_run_at: Option<DateTime<Utc>>,
            ) -> store::StoreResult<bool> {
                unreachable!()
            }
            async fn deactivate_schedules_for_rule(&self, _rule_id: &RuleId) -> store::StoreResult<()> {
                unreachable!()
            }
            async fn deactivate_all_schedules(&self) -> store::StoreResult<()> {
                Ok(())
            }
            async fn reactivate_all_schedules(&self) -> store::StoreResult<()> {
                unreachable!()
            }
        }

        let scheduler = Scheduler::new(Arc::new(NoopRepo));
        scheduler.deactivate_all().await.unwrap();
        let firings = scheduler.due_firings(Utc::now(), 10).await.unwrap();
        assert!(firings.is_empty());
    }
}
