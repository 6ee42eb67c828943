use serde::{Deserialize, Serialize};

use super::ids::{LogId, RuleId, UserId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogOutcome {
    Success,
    Failure,
    Skipped,
}

/// One row of the append-only audit trail (C13). Every execution attempt,
/// whether it ran an action or merely decided not to, produces exactly one
/// of these.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AutomationLog {
    pub id: LogId,
    pub user_id: UserId,
    pub rule_id: RuleId,
    pub outcome: LogOutcome,
    pub message: String,
    /// Present only when `outcome` is `Skipped`; names the admission check
    /// that prevented the run (e.g. `"rate_limited"`, `"circuit_open"`).
    pub skip_reason: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}
