pub mod circuit;
pub mod dlq;
pub mod listings;
pub mod logs;
pub mod polling;
pub mod rate_limit;
pub mod rules;
pub mod sync;
pub mod users;
pub mod webhook;

pub use circuit::{CircuitRepository, SqlxCircuitRepository};
pub use dlq::{DlqRepository, SqlxDlqRepository};
pub use listings::{ListingRepository, SqlxListingRepository};
pub use logs::{AuditLogRepository, SqlxAuditLogRepository};
pub use polling::{PollingRepository, SqlxPollingRepository};
pub use rate_limit::{RateLimitRepository, SqlxRateLimitRepository};
pub use rules::{RuleRepository, SqlxRuleRepository};
pub use sync::{SqlxSyncRepository, SyncRepository};
pub use users::{SqlxUserRepository, UserRepository};
pub use webhook::{SqlxWebhookRepository, WebhookRepository};
