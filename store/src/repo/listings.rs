use async_trait::async_trait;
use sqlx::{AnyPool, Row};

use corelib::{Listing, ListingId, ListingPost, ListingPostStatus, UserId};

use crate::error::{StoreError, StoreResult};

#[async_trait]
pub trait ListingRepository: Send + Sync {
    async fn fetch_listing(&self, id: &ListingId) -> StoreResult<Option<Listing>>;

    async fn fetch_listings_for_user(&self, user_id: &UserId) -> StoreResult<Vec<Listing>>;

    async fn fetch_posts_for_listing(&self, listing_id: &ListingId) -> StoreResult<Vec<ListingPost>>;

    async fn fetch_post(
        &self,
        marketplace: &str,
        external_id: &str,
    ) -> StoreResult<Option<ListingPost>>;

    async fn set_post_status(
        &self,
        post_id: &corelib::ListingPostId,
        status: ListingPostStatus,
    ) -> StoreResult<()>;
}

pub struct SqlxListingRepository {
    pool: AnyPool,
}

impl SqlxListingRepository {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }
}

fn parse_uuid(s: String) -> StoreResult<uuid::Uuid> {
    s.parse().map_err(|_| StoreError::NotFound(format!("malformed id {s}")))
}

fn status_from_str(s: &str) -> StoreResult<ListingPostStatus> {
    match s {
        "pending" => Ok(ListingPostStatus::Pending),
        "posted" => Ok(ListingPostStatus::Posted),
        "failed" => Ok(ListingPostStatus::Failed),
        "delisted" => Ok(ListingPostStatus::Delisted),
        other => Err(StoreError::NotFound(format!("unknown post status {other}"))),
    }
}

fn status_to_str(s: ListingPostStatus) -> &'static str {
    match s {
        ListingPostStatus::Pending => "pending",
        ListingPostStatus::Posted => "posted",
        ListingPostStatus::Failed => "failed",
        ListingPostStatus::Delisted => "delisted",
    }
}

fn row_to_listing(row: &sqlx::any::AnyRow) -> StoreResult<Listing> {
    let status = match row.get::<String, _>("status").as_str() {
        "draft" => corelib::ListingStatus::Draft,
        "active" => corelib::ListingStatus::Active,
        "sold" => corelib::ListingStatus::Sold,
        "deleted" => corelib::ListingStatus::Deleted,
        other => return Err(StoreError::NotFound(format!("unknown listing status {other}"))),
    };

    Ok(Listing {
        id: parse_uuid(row.get("id"))?,
        user_id: parse_uuid(row.get("user_id"))?,
        title: row.get("title"),
        price_cents: row.get("price_cents"),
        quantity: row.get::<i64, _>("quantity") as u32,
        category: row.get("category"),
        brand: row.get("brand"),
        condition: row.get("condition"),
        status,
    })
}

fn row_to_post(row: &sqlx::any::AnyRow) -> StoreResult<ListingPost> {
    Ok(ListingPost {
        id: parse_uuid(row.get("id"))?,
        listing_id: parse_uuid(row.get("listing_id"))?,
        marketplace: row.get("marketplace"),
        external_id: row.get("external_id"),
        status: status_from_str(&row.get::<String, _>("status"))?,
    })
}

#[async_trait]
impl ListingRepository for SqlxListingRepository {
    async fn fetch_listing(&self, id: &ListingId) -> StoreResult<Option<Listing>> {
        let row = sqlx::query(
            "SELECT id, user_id, title, price_cents, quantity, category, brand, condition, status FROM listings WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| row_to_listing(&r)).transpose()
    }

    async fn fetch_listings_for_user(&self, user_id: &UserId) -> StoreResult<Vec<Listing>> {
        let rows = sqlx::query(
            "SELECT id, user_id, title, price_cents, quantity, category, brand, condition, status FROM listings WHERE user_id = ?",
        )
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_listing).collect()
    }

    async fn fetch_posts_for_listing(&self, listing_id: &ListingId) -> StoreResult<Vec<ListingPost>> {
        let rows = sqlx::query(
            "SELECT id, listing_id, marketplace, external_id, status FROM listing_posts WHERE listing_id = ?",
        )
        .bind(listing_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_post).collect()
    }

    async fn fetch_post(
        &self,
        marketplace: &str,
        external_id: &str,
    ) -> StoreResult<Option<ListingPost>> {
        let row = sqlx::query(
            "SELECT id, listing_id, marketplace, external_id, status FROM listing_posts WHERE marketplace = ? AND external_id = ?",
        )
        .bind(marketplace)
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| row_to_post(&r)).transpose()
    }

    async fn set_post_status(
        &self,
        post_id: &corelib::ListingPostId,
        status: ListingPostStatus,
    ) -> StoreResult<()> {
        sqlx::query("UPDATE listing_posts SET status = ? WHERE id = ?;")
            .bind(status_to_str(status))
            .bind(post_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
