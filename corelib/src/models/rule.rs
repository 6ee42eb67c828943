use serde::{Deserialize, Serialize};

use super::ids::{MarketplaceTag, RuleId, UserId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleType {
    Share,
    Follow,
    Offer,
    Bump,
    Drop,
    Relist,
    BundleOffer,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShareOrder {
    Newest,
    Oldest,
    Random,
    PriceHigh,
    PriceLow,
}

/// `rule_config`, modeled as a tagged union keyed by `rule_type` per
/// spec.md §9 ("Dynamic configuration") rather than as an opaque blob, so
/// `MarketplaceEngine::validate_rule` can match exhaustively.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "rule_type", rename_all = "snake_case")]
pub enum RuleConfig {
    AutoBump {
        max_bumps_per_week: u32,
        min_days_between_bumps: u32,
        bumps_per_execution: u32,
        min_views_for_bump: u32,
    },
    SmartDrop {
        min_days_between_drops: u32,
        base_drop_percentage: f64,
        max_total_drop_percentage: f64,
        accelerate_after_days: u32,
        min_price_cents: i64,
    },
    AutoOffer {
        template_id: uuid::Uuid,
        max_offers_per_item: u32,
        discount_percent: f64,
        include_shipping: bool,
    },
    AutoShare {
        max_items: u32,
        min_delay_secs: u32,
        max_delay_secs: u32,
        share_order: ShareOrder,
    },
    PartyShare {
        max_items_per_party: u32,
        party_categories: Vec<String>,
    },
    WatcherOffers {
        min_watch_days: u32,
        offer_discount_percentage: f64,
        max_offers_per_item: u32,
    },
}

impl RuleConfig {
    pub fn rule_type(&self) -> RuleType {
        match self {
            RuleConfig::AutoBump { .. } => RuleType::Bump,
            RuleConfig::SmartDrop { .. } => RuleType::Drop,
            RuleConfig::AutoOffer { .. } => RuleType::Offer,
            RuleConfig::AutoShare { .. } => RuleType::Share,
            RuleConfig::PartyShare { .. } => RuleType::Share,
            RuleConfig::WatcherOffers { .. } => RuleType::Offer,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RuleCounters {
    pub total: u64,
    pub success: u64,
    pub fail: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AutomationRule {
    pub id: RuleId,
    pub user_id: UserId,
    pub marketplace: MarketplaceTag,
    pub config: RuleConfig,
    pub enabled: bool,
    pub counters: RuleCounters,
    pub last_executed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub last_error: Option<String>,
}

impl AutomationRule {
    pub fn rule_type(&self) -> RuleType {
        self.config.rule_type()
    }
}
