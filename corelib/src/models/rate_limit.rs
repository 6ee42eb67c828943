use serde::{Deserialize, Serialize};

use super::ids::MarketplaceTag;

/// A fixed-window counter keyed by (user, marketplace, action bucket) per
/// §4.3. The `ratelimit` crate owns the increment/reset logic; this is the
/// persisted shape.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RateLimitCounter {
    pub marketplace: MarketplaceTag,
    pub bucket: String,
    pub window_start: chrono::DateTime<chrono::Utc>,
    pub window_seconds: u32,
    pub count: u32,
    pub limit: u32,
}

impl RateLimitCounter {
    pub fn window_expired(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        now >= self.window_start + chrono::Duration::seconds(self.window_seconds as i64)
    }

    pub fn has_capacity(&self) -> bool {
        self.count < self.limit
    }
}
