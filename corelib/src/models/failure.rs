use serde::{Deserialize, Serialize};

/// Closed set of failure categories (§4.4). The categorizer maps every
/// marketplace-engine error into exactly one of these before it reaches the
/// circuit breaker or the retry scheduler — neither downstream component
/// ever inspects the raw error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    Permanent,
    Validation,
    Auth,
    Network,
    Temporary,
    RateLimit,
    MarketplaceError,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RetryPolicy {
    pub retryable: bool,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter_range: f64,
    pub requires_user_intervention: bool,
    pub circuit_breaker_enabled: bool,
}

impl FailureCategory {
    /// Default policy table from §4.4. Per-marketplace overrides, if any,
    /// are applied on top of this by the categorizer.
    pub fn default_policy(self) -> RetryPolicy {
        match self {
            FailureCategory::Permanent => RetryPolicy {
                retryable: false,
                max_retries: 0,
                base_delay_ms: 0,
                max_delay_ms: 0,
                backoff_multiplier: 1.0,
                jitter_range: 0.0,
                requires_user_intervention: true,
                circuit_breaker_enabled: false,
            },
            FailureCategory::Validation => RetryPolicy {
                retryable: false,
                max_retries: 0,
                base_delay_ms: 0,
                max_delay_ms: 0,
                backoff_multiplier: 1.0,
                jitter_range: 0.0,
                requires_user_intervention: true,
                circuit_breaker_enabled: false,
            },
            FailureCategory::Auth => RetryPolicy {
                retryable: true,
                max_retries: 1,
                base_delay_ms: 60_000,
                max_delay_ms: 300_000,
                backoff_multiplier: 1.0,
                jitter_range: 0.0,
                requires_user_intervention: true,
                circuit_breaker_enabled: false,
            },
            FailureCategory::Network => RetryPolicy {
                retryable: true,
                max_retries: 4,
                base_delay_ms: 500,
                max_delay_ms: 15_000,
                backoff_multiplier: 1.8,
                jitter_range: 0.15,
                requires_user_intervention: false,
                circuit_breaker_enabled: true,
            },
            FailureCategory::Temporary => RetryPolicy {
                retryable: true,
                max_retries: 3,
                base_delay_ms: 1_000,
                max_delay_ms: 30_000,
                backoff_multiplier: 2.0,
                jitter_range: 0.10,
                requires_user_intervention: false,
                circuit_breaker_enabled: true,
            },
            FailureCategory::RateLimit => RetryPolicy {
                retryable: true,
                max_retries: 5,
                base_delay_ms: 5_000,
                max_delay_ms: 300_000,
                backoff_multiplier: 2.5,
                jitter_range: 0.20,
                requires_user_intervention: false,
                circuit_breaker_enabled: true,
            },
            FailureCategory::MarketplaceError => RetryPolicy {
                retryable: true,
                max_retries: 3,
                base_delay_ms: 2_000,
                max_delay_ms: 60_000,
                backoff_multiplier: 2.2,
                jitter_range: 0.15,
                requires_user_intervention: false,
                circuit_breaker_enabled: true,
            },
        }
    }
}

/// Full categorizer output (§4.4). `confidence`/`reasoning` are carried for
/// observability only; retry/circuit decisions use the category alone.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FailureAnalysis {
    pub category: FailureCategory,
    pub error_type: String,
    pub should_retry: bool,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter_range: f64,
    pub requires_user_intervention: bool,
    pub circuit_breaker_enabled: bool,
    pub confidence: f64,
    pub reasoning: String,
}

impl FailureAnalysis {
    pub fn from_category(category: FailureCategory, confidence: f64, reasoning: impl Into<String>) -> Self {
        let policy = category.default_policy();
        Self {
            category,
            error_type: format!("{category:?}"),
            should_retry: policy.retryable,
            max_retries: policy.max_retries,
            base_delay_ms: policy.base_delay_ms,
            max_delay_ms: policy.max_delay_ms,
            backoff_multiplier: policy.backoff_multiplier,
            jitter_range: policy.jitter_range,
            requires_user_intervention: policy.requires_user_intervention,
            circuit_breaker_enabled: policy.circuit_breaker_enabled,
            confidence,
            reasoning: reasoning.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_is_retried_once_but_needs_user_intervention() {
        let p = FailureCategory::Auth.default_policy();
        assert!(p.retryable);
        assert_eq!(p.max_retries, 1);
        assert!(p.requires_user_intervention);
        assert!(!p.circuit_breaker_enabled);
    }

    #[test]
    fn rate_limit_trips_the_breaker_and_retries_generously() {
        let p = FailureCategory::RateLimit.default_policy();
        assert!(p.retryable);
        assert_eq!(p.max_retries, 5);
        assert!(p.circuit_breaker_enabled);
    }

    #[test]
    fn permanent_and_validation_never_retry() {
        assert!(!FailureCategory::Permanent.default_policy().retryable);
        assert!(!FailureCategory::Validation.default_policy().retryable);
    }
}
