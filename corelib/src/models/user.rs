use serde::{Deserialize, Serialize};

use super::ids::{MarketplaceConnectionId, MarketplaceTag, UserId};

/// A subscription plan's caps on automation volume.
///
/// Plan enforcement (billing) is out of scope (spec.md §1); only the caps
/// consumed by the scheduler/executor to bound work are modeled here.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlanLimits {
    pub max_active_rules: u32,
    pub max_actions_per_day: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    /// IANA time zone name (e.g. `"America/New_York"`); schedules without an
    /// explicit zone inherit this.
    pub time_zone: String,
    pub plan_limits: PlanLimits,
}

/// A connected marketplace account for a user.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MarketplaceConnection {
    pub id: MarketplaceConnectionId,
    pub user_id: UserId,
    pub marketplace: MarketplaceTag,
    pub is_connected: bool,
    /// Opaque to the core; handed to the engine's HTTP/WS client unchanged.
    pub access_credential: String,
    pub credential_expires_at: Option<chrono::DateTime<chrono::Utc>>,
    pub last_sync_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl MarketplaceConnection {
    /// `true` if the credential is present, not expired, and the connection
    /// has not been auto-disabled by a prior auth failure (§7).
    pub fn is_usable(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        self.is_connected
            && match self.credential_expires_at {
                Some(exp) => exp > now,
                None => true,
            }
    }
}
