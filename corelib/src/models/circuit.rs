use serde::{Deserialize, Serialize};

use super::ids::MarketplaceTag;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitPhase {
    Closed,
    Open,
    HalfOpen,
}

/// Per-marketplace circuit breaker state (§4.5) — shared across all users,
/// not scoped to one. One row tracks one breaker; the state-transition
/// logic lives in the `reliability` crate, which operates on this record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CircuitBreakerState {
    pub marketplace: MarketplaceTag,
    pub phase: CircuitPhase,
    pub failure_count: u32,
    pub success_count: u32,
    pub opened_at: Option<chrono::DateTime<chrono::Utc>>,
    pub next_retry_at: Option<chrono::DateTime<chrono::Utc>>,
    /// Current half-open timeout. Doubles on each failed probe, capped at
    /// `max_timeout_ms` (§9 open question, resolved in SPEC_FULL.md §3.4).
    pub current_timeout_ms: u64,
    pub half_open_probes_in_flight: u32,
}

impl CircuitBreakerState {
    pub fn closed(marketplace: MarketplaceTag, base_timeout_ms: u64) -> Self {
        Self {
            marketplace,
            phase: CircuitPhase::Closed,
            failure_count: 0,
            success_count: 0,
            opened_at: None,
            next_retry_at: None,
            current_timeout_ms: base_timeout_ms,
            half_open_probes_in_flight: 0,
        }
    }

    pub fn is_admitting(&self, half_open_max_requests: u32) -> bool {
        match self.phase {
            CircuitPhase::Closed => true,
            CircuitPhase::Open => false,
            CircuitPhase::HalfOpen => self.half_open_probes_in_flight < half_open_max_requests,
        }
    }
}
