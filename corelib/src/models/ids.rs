use uuid::Uuid;

pub type UserId = Uuid;
pub type MarketplaceConnectionId = Uuid;
pub type ListingId = Uuid;
pub type ListingPostId = Uuid;
pub type RuleId = Uuid;
pub type ScheduleId = Uuid;
pub type LogId = Uuid;
pub type WebhookEventId = Uuid;
pub type SyncJobId = Uuid;
pub type DlqId = Uuid;
pub type JobId = Uuid;

/// A marketplace tag (e.g. `"poshmark"`, `"mercari"`, `"depop"`).
///
/// Kept as a plain string rather than an enum: the core is parametric over
/// marketplaces (§4.8) and must not hardcode the supported set.
pub type MarketplaceTag = String;
