use async_trait::async_trait;
use sqlx::{AnyPool, Row};

use corelib::{AutomationLog, LogOutcome, RuleId};

use crate::error::StoreResult;

/// Append-only audit trail (C13). `record` is the only write; there is
/// deliberately no update or delete.
#[async_trait]
pub trait AuditLogRepository: Send + Sync {
    async fn record(&self, entry: &AutomationLog) -> StoreResult<()>;

    async fn fetch_for_rule(&self, rule_id: &RuleId, limit: i64) -> StoreResult<Vec<AutomationLog>>;
}

pub struct SqlxAuditLogRepository {
    pool: AnyPool,
}

impl SqlxAuditLogRepository {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }
}

fn outcome_to_str(o: LogOutcome) -> &'static str {
    match o {
        LogOutcome::Success => "success",
        LogOutcome::Failure => "failure",
        LogOutcome::Skipped => "skipped",
    }
}

fn outcome_from_str(s: &str) -> LogOutcome {
    match s {
        "success" => LogOutcome::Success,
        "skipped" => LogOutcome::Skipped,
        _ => LogOutcome::Failure,
    }
}

fn row_to_log(row: &sqlx::any::AnyRow) -> StoreResult<AutomationLog> {
    Ok(AutomationLog {
        id: row.get::<String, _>("id").parse().unwrap_or_default(),
        user_id: row.get::<String, _>("user_id").parse().unwrap_or_default(),
        rule_id: row.get::<String, _>("rule_id").parse().unwrap_or_default(),
        outcome: outcome_from_str(&row.get::<String, _>("outcome")),
        message: row.get("message"),
        skip_reason: row.get("skip_reason"),
        created_at: chrono::DateTime::parse_from_rfc3339(&row.get::<String, _>("created_at"))
            .map(|t| t.with_timezone(&chrono::Utc))
            .unwrap_or_else(|_| chrono::Utc::now()),
    })
}

#[async_trait]
impl AuditLogRepository for SqlxAuditLogRepository {
    async fn record(&self, entry: &AutomationLog) -> StoreResult<()> {
        sqlx::query(
            r#"
INSERT INTO automation_logs (id, user_id, rule_id, outcome, message, skip_reason, created_at)
VALUES (?, ?, ?, ?, ?, ?, ?);
"#,
        )
        .bind(entry.id.to_string())
        .bind(entry.user_id.to_string())
        .bind(entry.rule_id.to_string())
        .bind(outcome_to_str(entry.outcome))
        .bind(&entry.message)
        .bind(&entry.skip_reason)
        .bind(entry.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fetch_for_rule(&self, rule_id: &RuleId, limit: i64) -> StoreResult<Vec<AutomationLog>> {
        let rows = sqlx::query(
            r#"
SELECT id, user_id, rule_id, outcome, message, skip_reason, created_at
FROM automation_logs
WHERE rule_id = ?
ORDER BY created_at DESC
LIMIT ?;
"#,
        )
        .bind(rule_id.to_string())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_log).collect()
    }
}
