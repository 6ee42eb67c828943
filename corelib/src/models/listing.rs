use serde::{Deserialize, Serialize};

use super::ids::{ListingId, ListingPostId, MarketplaceTag, UserId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListingStatus {
    Draft,
    Active,
    Sold,
    Deleted,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Listing {
    pub id: ListingId,
    pub user_id: UserId,
    pub title: String,
    /// Decimal price, kept as a string-backed fixed-point to avoid float
    /// drift across repeated price-drop math (§4.8 price drop / offer).
    pub price_cents: i64,
    pub quantity: u32,
    pub category: String,
    pub brand: Option<String>,
    pub condition: String,
    pub status: ListingStatus,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListingPostStatus {
    Pending,
    Posted,
    Failed,
    Delisted,
}

/// A listing's representation on one marketplace.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ListingPost {
    pub id: ListingPostId,
    pub listing_id: ListingId,
    pub marketplace: MarketplaceTag,
    pub external_id: String,
    pub status: ListingPostStatus,
}

impl ListingPost {
    /// Posts eligible to be targeted by a cross-platform sync delist fan-out
    /// (§4.10 step 2).
    pub fn is_delist_target(&self) -> bool {
        matches!(
            self.status,
            ListingPostStatus::Posted | ListingPostStatus::Pending
        )
    }
}
