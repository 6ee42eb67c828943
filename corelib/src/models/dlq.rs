use serde::{Deserialize, Serialize};

use super::failure::FailureCategory;
use super::ids::{DlqId, JobId};

/// One recorded attempt against a job, whether it succeeded or not (§3).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryHistoryEntry {
    pub job_id: JobId,
    pub attempt_number: u32,
    pub category: FailureCategory,
    pub error_code: Option<String>,
    pub error_message: String,
    pub delay_used_ms: u64,
    pub next_retry_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DlqResolutionStatus {
    /// Awaiting a human to inspect and decide.
    PendingReview,
    /// A user or operator resolved it; no further action.
    Resolved,
    /// Permanently abandoned (e.g. `validation` category, §4.6).
    Discarded,
}

/// A job that exhausted its retry budget or failed non-retryably with
/// `requires_user_intervention=true` (§4.6).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub id: DlqId,
    pub job_id: JobId,
    pub total_attempts: u32,
    pub final_category: FailureCategory,
    pub history: Vec<RetryHistoryEntry>,
    pub resolution: DlqResolutionStatus,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl DeadLetterEntry {
    pub fn requires_manual_review(&self) -> bool {
        matches!(self.resolution, DlqResolutionStatus::PendingReview)
    }
}
