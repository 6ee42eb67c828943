use async_trait::async_trait;
use sqlx::{AnyPool, Row};

use corelib::{AutomationRule, AutomationSchedule, RuleCounters, RuleId, ScheduleId};

use crate::error::{StoreError, StoreResult};

#[async_trait]
pub trait RuleRepository: Send + Sync {
    async fn fetch_rule(&self, id: &RuleId) -> StoreResult<Option<AutomationRule>>;

    async fn fetch_enabled_rules(&self) -> StoreResult<Vec<AutomationRule>>;

    /// Records an execution outcome. Always succeeds against an existing
    /// row; unknown rule ids are a no-op (the rule may have been deleted
    /// concurrently).
    async fn record_execution(
        &self,
        rule_id: &RuleId,
        succeeded: bool,
        error: Option<String>,
        at: chrono::DateTime<chrono::Utc>,
    ) -> StoreResult<()>;

    async fn fetch_active_schedules_for_rule(
        &self,
        rule_id: &RuleId,
    ) -> StoreResult<Vec<AutomationSchedule>>;

    /// Schedules whose `next_run_at` has passed and are still active, used
    /// by the scheduler's sweep.
    async fn fetch_due_schedules(
        &self,
        now: chrono::DateTime<chrono::Utc>,
        limit: i64,
    ) -> StoreResult<Vec<AutomationSchedule>>;

    async fn upsert_schedule(&self, schedule: &AutomationSchedule) -> StoreResult<()>;

    /// CAS: only advances `next_run_at` forward, enforcing the strictly
    /// monotonic invariant even under concurrent sweeps.
    async fn advance_schedule(
        &self,
        schedule_id: &ScheduleId,
        fired_at: chrono::DateTime<chrono::Utc>,
        next_run_at: Option<chrono::DateTime<chrono::Utc>>,
    ) -> StoreResult<bool>;

    async fn deactivate_schedules_for_rule(&self, rule_id: &RuleId) -> StoreResult<()>;

    async fn deactivate_all_schedules(&self) -> StoreResult<()>;

    async fn reactivate_all_schedules(&self) -> StoreResult<()>;
}

pub struct SqlxRuleRepository {
    pool: AnyPool,
}

impl SqlxRuleRepository {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }
}

fn row_to_rule(row: &sqlx::any::AnyRow) -> StoreResult<AutomationRule> {
    let config: corelib::RuleConfig = serde_json::from_str(&row.get::<String, _>("config_json"))?;
    Ok(AutomationRule {
        id: parse_uuid(row.get("id"))?,
        user_id: parse_uuid(row.get("user_id"))?,
        marketplace: row.get("marketplace"),
        config,
        enabled: row.get("enabled"),
        counters: RuleCounters {
            total: row.get::<i64, _>("total_count") as u64,
            success: row.get::<i64, _>("success_count") as u64,
            fail: row.get::<i64, _>("fail_count") as u64,
        },
        last_executed_at: parse_ts_opt(row.get("last_executed_at"))?,
        last_error: row.get("last_error"),
    })
}

fn row_to_schedule(row: &sqlx::any::AnyRow) -> StoreResult<AutomationSchedule> {
    let schedule_type = serde_json::from_str(&row.get::<String, _>("schedule_type_json"))?;
    Ok(AutomationSchedule {
        id: parse_uuid(row.get("id"))?,
        rule_id: parse_uuid(row.get("rule_id"))?,
        schedule_type,
        active: row.get("active"),
        start_date: parse_ts_opt(row.get("start_date"))?,
        end_date: parse_ts_opt(row.get("end_date"))?,
        max_executions: row.get::<Option<i64>, _>("max_executions").map(|v| v as u64),
        execution_count: row.get::<i64, _>("execution_count") as u64,
        last_run_at: parse_ts_opt(row.get("last_run_at"))?,
        next_run_at: parse_ts_opt(row.get("next_run_at"))?,
    })
}

fn parse_uuid(s: String) -> StoreResult<uuid::Uuid> {
    s.parse().map_err(|_| StoreError::NotFound(format!("malformed id {s}")))
}

fn parse_ts_opt(s: Option<String>) -> StoreResult<Option<chrono::DateTime<chrono::Utc>>> {
    s.map(|s| chrono::DateTime::parse_from_rfc3339(&s))
        .transpose()
        .map_err(|e| StoreError::NotFound(e.to_string()))
        .map(|o| o.map(|t| t.with_timezone(&chrono::Utc)))
}

#[async_trait]
impl RuleRepository for SqlxRuleRepository {
    async fn fetch_rule(&self, id: &RuleId) -> StoreResult<Option<AutomationRule>> {
        let row = sqlx::query(
            r#"
SELECT id, user_id, marketplace, config_json, enabled,
       total_count, success_count, fail_count, last_executed_at, last_error
FROM automation_rules WHERE id = ?;
"#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| row_to_rule(&r)).transpose()
    }

    async fn fetch_enabled_rules(&self) -> StoreResult<Vec<AutomationRule>> {
        let rows = sqlx::query(
            r#"
SELECT id, user_id, marketplace, config_json, enabled,
       total_count, success_count, fail_count, last_executed_at, last_error
FROM automation_rules WHERE enabled = 1;
"#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for r in rows {
            match row_to_rule(&r) {
                Ok(rule) => out.push(rule),
                Err(e) => tracing::warn!(error = %e, "skipping malformed rule row"),
            }
        }
        Ok(out)
    }

    async fn record_execution(
        &self,
        rule_id: &RuleId,
        succeeded: bool,
        error: Option<String>,
        at: chrono::DateTime<chrono::Utc>,
    ) -> StoreResult<()> {
        let (success_delta, fail_delta) = if succeeded { (1, 0) } else { (0, 1) };
        sqlx::query(
            r#"
UPDATE automation_rules
SET total_count = total_count + 1,
    success_count = success_count + ?,
    fail_count = fail_count + ?,
    last_executed_at = ?,
    last_error = ?
WHERE id = ?;
"#,
        )
        .bind(success_delta)
        .bind(fail_delta)
        .bind(at.to_rfc3339())
        .bind(error)
        .bind(rule_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fetch_active_schedules_for_rule(
        &self,
        rule_id: &RuleId,
    ) -> StoreResult<Vec<AutomationSchedule>> {
        let rows = sqlx::query(
            r#"
SELECT id, rule_id, schedule_type_json, active, start_date, end_date,
       max_executions, execution_count, last_run_at, next_run_at
FROM automation_schedules WHERE rule_id = ? AND active = 1;
"#,
        )
        .bind(rule_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_schedule).collect()
    }

    async fn fetch_due_schedules(
        &self,
        now: chrono::DateTime<chrono::Utc>,
        limit: i64,
    ) -> StoreResult<Vec<AutomationSchedule>> {
        let rows = sqlx::query(
            r#"
SELECT id, rule_id, schedule_type_json, active, start_date, end_date,
       max_executions, execution_count, last_run_at, next_run_at
FROM automation_schedules
WHERE active = 1 AND next_run_at IS NOT NULL AND next_run_at <= ?
ORDER BY next_run_at ASC
LIMIT ?;
"#,
        )
        .bind(now.to_rfc3339())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_schedule).collect()
    }

    async fn upsert_schedule(&self, schedule: &AutomationSchedule) -> StoreResult<()> {
        let schedule_type_json = serde_json::to_string(&schedule.schedule_type)?;

        sqlx::query("DELETE FROM automation_schedules WHERE id = ?;")
            .bind(schedule.id.to_string())
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
INSERT INTO automation_schedules
  (id, rule_id, schedule_type_json, active, start_date, end_date,
   max_executions, execution_count, last_run_at, next_run_at)
VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?);
"#,
        )
        .bind(schedule.id.to_string())
        .bind(schedule.rule_id.to_string())
        .bind(schedule_type_json)
        .bind(schedule.active)
        .bind(schedule.start_date.map(|t| t.to_rfc3339()))
        .bind(schedule.end_date.map(|t| t.to_rfc3339()))
        .bind(schedule.max_executions.map(|v| v as i64))
        .bind(schedule.execution_count as i64)
        .bind(schedule.last_run_at.map(|t| t.to_rfc3339()))
        .bind(schedule.next_run_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn advance_schedule(
        &self,
        schedule_id: &ScheduleId,
        fired_at: chrono::DateTime<chrono::Utc>,
        next_run_at: Option<chrono::DateTime<chrono::Utc>>,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
UPDATE automation_schedules
SET last_run_at = ?,
    next_run_at = ?,
    execution_count = execution_count + 1
WHERE id = ?
  AND (next_run_at IS NULL OR next_run_at <= ?);
"#,
        )
        .bind(fired_at.to_rfc3339())
        .bind(next_run_at.map(|t| t.to_rfc3339()))
        .bind(schedule_id.to_string())
        .bind(fired_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn deactivate_schedules_for_rule(&self, rule_id: &RuleId) -> StoreResult<()> {
        sqlx::query("UPDATE automation_schedules SET active = 0 WHERE rule_id = ?;")
            .bind(rule_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn deactivate_all_schedules(&self) -> StoreResult<()> {
        sqlx::query("UPDATE automation_schedules SET active = 0;")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn reactivate_all_schedules(&self) -> StoreResult<()> {
        sqlx::query(
            r#"
UPDATE automation_schedules SET active = 1
WHERE rule_id IN (SELECT id FROM automation_rules WHERE enabled = 1);
"#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
