//! Marketplace Engine (C8): the capability set every marketplace
//! integration implements, plus the shared pacing helper used by all of
//! them before any outbound call.

pub mod pacing;
pub mod poshmark;

use async_trait::async_trait;

use corelib::{AutomationRule, MarketplaceConnection, RuleConfig, RuleType, User};
use reliability::RawFailure;

pub type EngineResult<T> = Result<T, RawFailure>;

#[derive(Clone, Debug, Default)]
pub struct ExecutionOutcome {
    pub actions_taken: u32,
    pub details: String,
}

/// Everything an engine needs to act on one rule firing, gathered by the
/// Executor before dispatch (§4.8: "acts only through Record Store, Rate
/// Limiter, and Circuit Breaker").
pub struct EngineContext<'a> {
    pub connection: &'a MarketplaceConnection,
    pub rate_limiter: &'a ratelimit::RateLimiter,
    pub circuit_breaker: &'a reliability::CircuitBreaker,
    pub listing_repo: &'a dyn store::ListingRepository,
    pub now: chrono::DateTime<chrono::Utc>,
}

#[async_trait]
pub trait MarketplaceEngine: Send + Sync {
    fn marketplace_tag(&self) -> &str;

    async fn execute(
        &self,
        rule: &AutomationRule,
        user: &User,
        ctx: &EngineContext<'_>,
    ) -> EngineResult<ExecutionOutcome>;

    fn validate_rule(&self, rule: &AutomationRule) -> Result<(), String>;

    fn available_actions(&self) -> Vec<RuleType>;

    fn default_config(&self, action: RuleType) -> Option<RuleConfig>;

    /// Delists one external listing. Used directly by the Cross-Platform
    /// Sync Coordinator (§4.10), outside of any rule firing.
    async fn delist(
        &self,
        connection: &MarketplaceConnection,
        external_id: &str,
        ctx: &EngineContext<'_>,
    ) -> EngineResult<()>;
}

/// Confirms the connection precondition common to every engine (§4.8 step
/// 1). Callers should run this before obtaining rate-limit admission.
pub fn check_connection_usable(
    connection: &MarketplaceConnection,
    now: chrono::DateTime<chrono::Utc>,
) -> EngineResult<()> {
    if connection.is_usable(now) {
        Ok(())
    } else {
        Err(RawFailure {
            marketplace: connection.marketplace.clone(),
            http_status: Some(401),
            error_code: Some("credential_expired".to_string()),
            message: "marketplace connection is disconnected or its credential has expired".to_string(),
            ..Default::default()
        })
    }
}
