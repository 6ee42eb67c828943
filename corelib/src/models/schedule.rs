use serde::{Deserialize, Serialize};

use super::ids::{RuleId, ScheduleId};

/// Per spec.md §4.1's resolution of the "continuous" ambiguity: interval is
/// always stored in whole seconds with an enforced lower bound of 60.
pub const MIN_CONTINUOUS_INTERVAL_SECS: u32 = 60;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum ScheduleType {
    Cron {
        expression: String,
        time_zone: String,
    },
    Interval {
        interval_minutes: u32,
    },
    Continuous {
        interval_seconds: u32,
    },
    TimeOfDay {
        /// Hours of day (0-23) this schedule fires at, in the configured
        /// time zone. Stored sorted and deduplicated.
        hours: Vec<u8>,
        time_zone: String,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AutomationSchedule {
    pub id: ScheduleId,
    pub rule_id: RuleId,
    pub schedule_type: ScheduleType,
    pub active: bool,
    pub start_date: Option<chrono::DateTime<chrono::Utc>>,
    pub end_date: Option<chrono::DateTime<chrono::Utc>>,
    pub max_executions: Option<u64>,
    pub execution_count: u64,
    pub last_run_at: Option<chrono::DateTime<chrono::Utc>>,
    pub next_run_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl AutomationSchedule {
    /// Minimum time that must elapse between two firings of this schedule,
    /// used as one of the eligibility checks in §4.1 ("minimum spacing").
    pub fn interval_lower_bound(&self) -> chrono::Duration {
        match &self.schedule_type {
            ScheduleType::Cron { .. } => chrono::Duration::seconds(1),
            ScheduleType::Interval { interval_minutes } => {
                chrono::Duration::minutes(*interval_minutes as i64)
            }
            ScheduleType::Continuous { interval_seconds } => {
                chrono::Duration::seconds((*interval_seconds).max(MIN_CONTINUOUS_INTERVAL_SECS) as i64)
            }
            ScheduleType::TimeOfDay { .. } => chrono::Duration::hours(1),
        }
    }

    pub fn max_executions_reached(&self) -> bool {
        match self.max_executions {
            Some(max) => self.execution_count >= max,
            None => false,
        }
    }

    pub fn within_validity_window(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        let after_start = self.start_date.map(|s| now >= s).unwrap_or(true);
        let before_end = self.end_date.map(|e| now <= e).unwrap_or(true);
        after_start && before_end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn continuous_interval_has_enforced_floor() {
        let s = AutomationSchedule {
            id: uuid::Uuid::new_v4(),
            rule_id: uuid::Uuid::new_v4(),
            schedule_type: ScheduleType::Continuous { interval_seconds: 10 },
            active: true,
            start_date: None,
            end_date: None,
            max_executions: None,
            execution_count: 0,
            last_run_at: None,
            next_run_at: None,
        };
        assert_eq!(s.interval_lower_bound(), chrono::Duration::seconds(60));
    }

    #[test]
    fn max_executions_reached_respects_cap() {
        let mut s = AutomationSchedule {
            id: uuid::Uuid::new_v4(),
            rule_id: uuid::Uuid::new_v4(),
            schedule_type: ScheduleType::Interval { interval_minutes: 5 },
            active: true,
            start_date: None,
            end_date: None,
            max_executions: Some(3),
            execution_count: 2,
            last_run_at: None,
            next_run_at: None,
        };
        assert!(!s.max_executions_reached());
        s.execution_count = 3;
        assert!(s.max_executions_reached());
    }
}
