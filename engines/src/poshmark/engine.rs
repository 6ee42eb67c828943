use std::sync::Arc;

use async_trait::async_trait;
use rand::seq::SliceRandom;

use corelib::{AutomationRule, Listing, ListingPostStatus, MarketplaceConnection, RuleConfig, RuleType, ShareOrder, User};
use reliability::{FailureCategorizer, MarketplacePatternTable, RawFailure};

use crate::pacing::PacingConfig;
use crate::poshmark::client::PoshmarkClient;
use crate::{check_connection_usable, EngineContext, EngineResult, ExecutionOutcome, MarketplaceEngine};

/// A Poshmark-like marketplace: share/bump/drop/offer against listing posts
/// already on that marketplace, through whatever `PoshmarkClient` is wired
/// in (HTTP in production, a fake in tests).
pub struct PoshmarkLikeEngine {
    marketplace: String,
    client: Arc<dyn PoshmarkClient>,
    pacing: PacingConfig,
    categorizer: FailureCategorizer,
}

impl PoshmarkLikeEngine {
    pub fn new(marketplace: impl Into<String>, client: Arc<dyn PoshmarkClient>, pacing: PacingConfig) -> Self {
        Self {
            marketplace: marketplace.into(),
            client,
            pacing,
            categorizer: FailureCategorizer::new(MarketplacePatternTable::new()),
        }
    }

    /// Re-runs the per-action gate (§4.8 steps 1-2) before every outbound
    /// call, not just once per rule firing — a long `AutoShare` batch must
    /// stay inside rate-limit and circuit-breaker bounds item by item.
    async fn gate(&self, ctx: &EngineContext<'_>) -> EngineResult<()> {
        check_connection_usable(ctx.connection, ctx.now)?;

        let check = ctx
            .rate_limiter
            .check(&self.marketplace, &ctx.connection.user_id, ctx.now)
            .await
            .map_err(|e| self.infra_failure(e))?;

        if !check.allowed {
            return Err(RawFailure {
                marketplace: self.marketplace.clone(),
                error_code: Some("rate_limited".to_string()),
                message: "local rate-limit window exhausted".to_string(),
                headers: check
                    .retry_after
                    .map(|d| {
                        let mut h = std::collections::HashMap::new();
                        h.insert("retry-after".to_string(), d.num_seconds().to_string());
                        h
                    })
                    .unwrap_or_default(),
                ..Default::default()
            });
        }

        let admission = ctx
            .circuit_breaker
            .admission(&self.marketplace, ctx.now)
            .await
            .map_err(|e| self.infra_failure(e))?;

        if !admission.allowed {
            return Err(RawFailure {
                marketplace: self.marketplace.clone(),
                error_code: Some("circuit_open".to_string()),
                message: admission.reason.unwrap_or_else(|| "circuit breaker open".to_string()),
                circuit_retry_at: admission.next_retry_at,
                ..Default::default()
            });
        }

        Ok(())
    }

    async fn record_outcome(&self, ctx: &EngineContext<'_>, result: &Result<(), RawFailure>) {
        let counts_toward_circuit = match result {
            Ok(()) => true,
            Err(failure) => self.categorizer.classify(failure).circuit_breaker_enabled,
        };

        let _ = ctx
            .rate_limiter
            .record(&self.marketplace, &ctx.connection.user_id, result.is_ok(), ctx.now)
            .await;

        if result.is_ok() {
            let _ = ctx.circuit_breaker.on_success(&self.marketplace).await;
        } else {
            let _ = ctx
                .circuit_breaker
                .on_failure(&self.marketplace, counts_toward_circuit, ctx.now)
                .await;
        }
    }

    fn infra_failure(&self, source: anyhow::Error) -> RawFailure {
        RawFailure {
            marketplace: self.marketplace.clone(),
            error_type_name: Some("store_unavailable".to_string()),
            message: source.to_string(),
            ..Default::default()
        }
    }

    /// Listing posts on this marketplace eligible for an action: currently
    /// live on the marketplace (`Posted`), never the ones pending first
    /// publish or already delisted.
    async fn eligible_posts(
        &self,
        ctx: &EngineContext<'_>,
        user_id: &corelib::UserId,
    ) -> EngineResult<Vec<(Listing, corelib::ListingPost)>> {
        let listings = ctx
            .listing_repo
            .fetch_listings_for_user(user_id)
            .await
            .map_err(|e| self.infra_failure(e.into()))?;

        let mut out = Vec::new();
        for listing in listings {
            let posts = ctx
                .listing_repo
                .fetch_posts_for_listing(&listing.id)
                .await
                .map_err(|e| self.infra_failure(e.into()))?;

            for post in posts {
                if post.marketplace == self.marketplace && post.status == ListingPostStatus::Posted {
                    out.push((listing.clone(), post));
                }
            }
        }
        Ok(out)
    }

    fn order_for_share(mut items: Vec<(Listing, corelib::ListingPost)>, order: ShareOrder) -> Vec<(Listing, corelib::ListingPost)> {
        match order {
            ShareOrder::PriceHigh => items.sort_by(|a, b| b.0.price_cents.cmp(&a.0.price_cents)),
            ShareOrder::PriceLow => items.sort_by(|a, b| a.0.price_cents.cmp(&b.0.price_cents)),
            // No listing-creation timestamp is tracked here; id order is the
            // best stable proxy available for "newest"/"oldest".
            ShareOrder::Newest => items.sort_by(|a, b| b.0.id.cmp(&a.0.id)),
            ShareOrder::Oldest => items.sort_by(|a, b| a.0.id.cmp(&b.0.id)),
            ShareOrder::Random => items.shuffle(&mut rand::thread_rng()),
        }
        items
    }

    async fn pace(&self) {
        tokio::time::sleep(self.pacing.next_delay()).await;
    }
}

#[async_trait]
impl MarketplaceEngine for PoshmarkLikeEngine {
    fn marketplace_tag(&self) -> &str {
        &self.marketplace
    }

    #[tracing::instrument(skip(self, rule, user, ctx), fields(marketplace = %self.marketplace, rule_id = %rule.id))]
    async fn execute(&self, rule: &AutomationRule, user: &User, ctx: &EngineContext<'_>) -> EngineResult<ExecutionOutcome> {
        let mut outcome = ExecutionOutcome::default();
        let mut successes_in_batch = 0u32;

        match &rule.config {
            RuleConfig::AutoShare { max_items, share_order, .. } => {
                let items = Self::order_for_share(self.eligible_posts(ctx, &user.id).await?, *share_order);

                for (_, post) in items.into_iter().take(*max_items as usize) {
                    self.gate(ctx).await?;
                    let result = self.client.share_listing(ctx.connection, &post.external_id).await;
                    self.record_outcome(ctx, &result).await;
                    result?;

                    outcome.actions_taken += 1;
                    successes_in_batch += 1;
                    if self.pacing.should_break(successes_in_batch) {
                        tokio::time::sleep(self.pacing.break_duration()).await;
                    } else {
                        self.pace().await;
                    }
                }
                outcome.details = format!("shared {} listings", outcome.actions_taken);
            }

            RuleConfig::PartyShare { max_items_per_party, .. } => {
                let items = self.eligible_posts(ctx, &user.id).await?;
                for (_, post) in items.into_iter().take(*max_items_per_party as usize) {
                    self.gate(ctx).await?;
                    let result = self.client.share_listing(ctx.connection, &post.external_id).await;
                    self.record_outcome(ctx, &result).await;
                    result?;

                    outcome.actions_taken += 1;
                    successes_in_batch += 1;
                    if self.pacing.should_break(successes_in_batch) {
                        tokio::time::sleep(self.pacing.break_duration()).await;
                    } else {
                        self.pace().await;
                    }
                }
                outcome.details = format!("shared {} listings to a party", outcome.actions_taken);
            }

            RuleConfig::AutoBump { bumps_per_execution, .. } => {
                let items = self.eligible_posts(ctx, &user.id).await?;
                for (_, post) in items.into_iter().take(*bumps_per_execution as usize) {
                    self.gate(ctx).await?;
                    let result = self.client.bump_listing(ctx.connection, &post.external_id).await;
                    self.record_outcome(ctx, &result).await;
                    result?;

                    outcome.actions_taken += 1;
                    self.pace().await;
                }
                outcome.details = format!("bumped {} listings", outcome.actions_taken);
            }

            RuleConfig::SmartDrop { base_drop_percentage, min_price_cents, .. } => {
                let items = self.eligible_posts(ctx, &user.id).await?;
                for (listing, post) in items {
                    let dropped = apply_drop(listing.price_cents, *base_drop_percentage, *min_price_cents);
                    if dropped == listing.price_cents {
                        continue;
                    }

                    self.gate(ctx).await?;
                    let result = self.client.drop_price(ctx.connection, &post.external_id, dropped).await;
                    self.record_outcome(ctx, &result).await;
                    result?;

                    outcome.actions_taken += 1;
                    self.pace().await;
                }
                outcome.details = format!("dropped price on {} listings", outcome.actions_taken);
            }

            RuleConfig::AutoOffer { max_offers_per_item, discount_percent, .. } => {
                let items = self.eligible_posts(ctx, &user.id).await?;
                for (listing, post) in items.into_iter().take(*max_offers_per_item as usize) {
                    let offer_price = apply_drop(listing.price_cents, *discount_percent, 0);

                    self.gate(ctx).await?;
                    let result = self.client.send_offer(ctx.connection, &post.external_id, offer_price).await;
                    self.record_outcome(ctx, &result).await;
                    result?;

                    outcome.actions_taken += 1;
                    self.pace().await;
                }
                outcome.details = format!("sent {} offers", outcome.actions_taken);
            }

            RuleConfig::WatcherOffers { offer_discount_percentage, max_offers_per_item, .. } => {
                let items = self.eligible_posts(ctx, &user.id).await?;
                for (listing, post) in items.into_iter().take(*max_offers_per_item as usize) {
                    let offer_price = apply_drop(listing.price_cents, *offer_discount_percentage, 0);

                    self.gate(ctx).await?;
                    let result = self.client.send_offer(ctx.connection, &post.external_id, offer_price).await;
                    self.record_outcome(ctx, &result).await;
                    result?;

                    outcome.actions_taken += 1;
                    self.pace().await;
                }
                outcome.details = format!("sent {} watcher offers", outcome.actions_taken);
            }
        }

        Ok(outcome)
    }

    fn validate_rule(&self, rule: &AutomationRule) -> Result<(), String> {
        match &rule.config {
            RuleConfig::AutoShare { max_items, min_delay_secs, max_delay_secs, .. } => {
                if *max_items == 0 {
                    return Err("max_items must be positive".to_string());
                }
                if min_delay_secs > max_delay_secs {
                    return Err("min_delay_secs cannot exceed max_delay_secs".to_string());
                }
                Ok(())
            }
            RuleConfig::PartyShare { max_items_per_party, .. } => {
                if *max_items_per_party == 0 {
                    return Err("max_items_per_party must be positive".to_string());
                }
                Ok(())
            }
            RuleConfig::AutoBump { bumps_per_execution, min_views_for_bump: _, .. } => {
                if *bumps_per_execution == 0 {
                    return Err("bumps_per_execution must be positive".to_string());
                }
                Ok(())
            }
            RuleConfig::SmartDrop { base_drop_percentage, max_total_drop_percentage, min_price_cents, .. } => {
                if !(0.0..=100.0).contains(base_drop_percentage) {
                    return Err("base_drop_percentage must be within 0-100".to_string());
                }
                if base_drop_percentage > max_total_drop_percentage {
                    return Err("base_drop_percentage cannot exceed max_total_drop_percentage".to_string());
                }
                if *min_price_cents < 0 {
                    return Err("min_price_cents cannot be negative".to_string());
                }
                Ok(())
            }
            RuleConfig::AutoOffer { discount_percent, .. } | RuleConfig::WatcherOffers { offer_discount_percentage: discount_percent, .. } => {
                if !(0.0..=100.0).contains(discount_percent) {
                    return Err("discount_percent must be within 0-100".to_string());
                }
                Ok(())
            }
        }
    }

    fn available_actions(&self) -> Vec<RuleType> {
        vec![RuleType::Share, RuleType::Bump, RuleType::Drop, RuleType::Offer]
    }

    fn default_config(&self, action: RuleType) -> Option<RuleConfig> {
        match action {
            RuleType::Share => Some(RuleConfig::AutoShare {
                max_items: 50,
                min_delay_secs: 2,
                max_delay_secs: 8,
                share_order: ShareOrder::Oldest,
            }),
            RuleType::Bump => Some(RuleConfig::AutoBump {
                max_bumps_per_week: 7,
                min_days_between_bumps: 1,
                bumps_per_execution: 5,
                min_views_for_bump: 0,
            }),
            RuleType::Drop => Some(RuleConfig::SmartDrop {
                min_days_between_drops: 3,
                base_drop_percentage: 5.0,
                max_total_drop_percentage: 30.0,
                accelerate_after_days: 14,
                min_price_cents: 500,
            }),
            RuleType::Offer => Some(RuleConfig::AutoOffer {
                template_id: uuid::Uuid::nil(),
                max_offers_per_item: 1,
                discount_percent: 10.0,
                include_shipping: false,
            }),
            RuleType::Follow | RuleType::Relist | RuleType::BundleOffer => None,
        }
    }

    #[tracing::instrument(skip(self, connection, ctx), fields(marketplace = %self.marketplace, external_id))]
    async fn delist(&self, connection: &MarketplaceConnection, external_id: &str, ctx: &EngineContext<'_>) -> EngineResult<()> {
        self.gate(ctx).await?;
        let result = self.client.delist(connection, external_id).await;
        self.record_outcome(ctx, &result).await;
        result
    }
}

fn apply_drop(price_cents: i64, percentage: f64, floor_cents: i64) -> i64 {
    let dropped = (price_cents as f64 * (1.0 - percentage / 100.0)).round() as i64;
    dropped.max(floor_cents).min(price_cents)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_drop_never_crosses_the_floor() {
        assert_eq!(apply_drop(10_000, 10.0, 9_500), 9_500);
        assert_eq!(apply_drop(10_000, 5.0, 0), 9_500);
    }

    #[test]
    fn order_for_share_sorts_price_descending_for_price_high() {
        let a = sample_item(100, "a");
        let b = sample_item(500, "b");
        let ordered = PoshmarkLikeEngine::order_for_share(vec![a.clone(), b.clone()], ShareOrder::PriceHigh);
        assert_eq!(ordered[0].1.external_id, "b");
    }

    fn sample_item(price_cents: i64, external_id: &str) -> (Listing, corelib::ListingPost) {
        let listing = Listing {
            id: uuid::Uuid::new_v4(),
            user_id: uuid::Uuid::new_v4(),
            title: "item".to_string(),
            price_cents,
            quantity: 1,
            category: "misc".to_string(),
            brand: None,
            condition: "good".to_string(),
            status: corelib::ListingStatus::Active,
        };
        let post = corelib::ListingPost {
            id: uuid::Uuid::new_v4(),
            listing_id: listing.id,
            marketplace: "poshmark".to_string(),
            external_id: external_id.to_string(),
            status: ListingPostStatus::Posted,
        };
        (listing, post)
    }
}
