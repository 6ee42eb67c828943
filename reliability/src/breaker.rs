use std::sync::Arc;

use corelib::{CircuitBreakerState, CircuitPhase};
use store::CircuitRepository;

#[derive(Clone, Copy, Debug)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub timeout_ms: u64,
    pub half_open_max_requests: u32,
    pub recovery_threshold: u32,
    /// Cap on the exponentially-doubled half-open timeout (§9 open
    /// question, resolved in SPEC_FULL.md §3.4).
    pub max_timeout_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout_ms: 60_000,
            half_open_max_requests: 3,
            recovery_threshold: 3,
            max_timeout_ms: 1_800_000,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Admission {
    pub allowed: bool,
    pub reason: Option<String>,
    /// When rejected, the instant a caller should retry at instead of
    /// applying its own backoff — the breaker's cadence, not the job's.
    pub next_retry_at: Option<chrono::DateTime<chrono::Utc>>,
}

pub struct CircuitBreaker {
    repo: Arc<dyn CircuitRepository>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(repo: Arc<dyn CircuitRepository>, config: CircuitBreakerConfig) -> Self {
        Self { repo, config }
    }

    #[tracing::instrument(skip(self), fields(marketplace))]
    pub async fn admission(
        &self,
        marketplace: &str,
        now: chrono::DateTime<chrono::Utc>,
    ) -> anyhow::Result<Admission> {
        let mut state = self.repo.fetch_or_init(marketplace, self.config.timeout_ms).await?;

        if state.phase == CircuitPhase::Open {
            if state.next_retry_at.is_some_and(|t| now >= t) {
                state.phase = CircuitPhase::HalfOpen;
                state.half_open_probes_in_flight = 0;
                state.success_count = 0;
                self.repo.save(&state).await?;
            } else {
                return Ok(Admission {
                    allowed: false,
                    reason: Some("circuit_open".to_string()),
                    next_retry_at: state.next_retry_at,
                });
            }
        }

        if !self.try_admit_half_open_probe(&mut state).await? {
            return Ok(Admission {
                allowed: false,
                reason: Some("circuit_open".to_string()),
                next_retry_at: Some(state.next_retry_at.unwrap_or(now + chrono::Duration::seconds(1))),
            });
        }

        Ok(Admission { allowed: true, reason: None, next_retry_at: None })
    }

    /// Atomically claims one half-open probe slot, or confirms a closed
    /// circuit always admits. Closed/Open-with-no-slot callers never reach
    /// here with work to do — `admission` already returned for those — so
    /// this only has to single-flight the half-open compare-and-set.
    async fn try_admit_half_open_probe(&self, state: &mut CircuitBreakerState) -> anyhow::Result<bool> {
        if state.phase != CircuitPhase::HalfOpen {
            return Ok(state.is_admitting(self.config.half_open_max_requests));
        }

        match self
            .repo
            .try_admit_half_open_probe(&state.marketplace, self.config.half_open_max_requests)
            .await?
        {
            Some(admitted_state) => {
                *state = admitted_state;
                Ok(true)
            }
            None => {
                // Refresh so the caller's `next_retry_at` fallback reflects reality.
                *state = self.repo.fetch_or_init(&state.marketplace, self.config.timeout_ms).await?;
                Ok(false)
            }
        }
    }

    #[tracing::instrument(skip(self), fields(marketplace))]
    pub async fn on_success(&self, marketplace: &str) -> anyhow::Result<()> {
        let mut state = self.repo.fetch_or_init(marketplace, self.config.timeout_ms).await?;

        match state.phase {
            CircuitPhase::Closed => {
                state.failure_count = state.failure_count.saturating_sub(1);
            }
            CircuitPhase::HalfOpen => {
                state.success_count += 1;
                state.half_open_probes_in_flight = state.half_open_probes_in_flight.saturating_sub(1);
                if state.success_count >= self.config.recovery_threshold {
                    state = self.reset(&state.marketplace);
                }
            }
            CircuitPhase::Open => {}
        }

        self.repo.save(&state).await?;
        Ok(())
    }

    /// `counts_toward_circuit` comes from the categorizer's
    /// `circuit_breaker_enabled` flag for this failure's category.
    #[tracing::instrument(skip(self), fields(marketplace, counts_toward_circuit))]
    pub async fn on_failure(
        &self,
        marketplace: &str,
        counts_toward_circuit: bool,
        now: chrono::DateTime<chrono::Utc>,
    ) -> anyhow::Result<()> {
        if !counts_toward_circuit {
            return Ok(());
        }

        let mut state = self.repo.fetch_or_init(marketplace, self.config.timeout_ms).await?;

        match state.phase {
            CircuitPhase::Closed => {
                state.failure_count += 1;
                if state.failure_count >= self.config.failure_threshold {
                    state.phase = CircuitPhase::Open;
                    state.opened_at = Some(now);
                    state.next_retry_at = Some(now + chrono::Duration::milliseconds(state.current_timeout_ms as i64));
                }
            }
            CircuitPhase::HalfOpen => {
                state.phase = CircuitPhase::Open;
                state.opened_at = Some(now);
                state.current_timeout_ms = (state.current_timeout_ms * 2).min(self.config.max_timeout_ms);
                state.next_retry_at = Some(now + chrono::Duration::milliseconds(state.current_timeout_ms as i64));
                state.half_open_probes_in_flight = 0;
                state.success_count = 0;
            }
            CircuitPhase::Open => {}
        }

        self.repo.save(&state).await?;
        Ok(())
    }

    fn reset(&self, marketplace: &str) -> CircuitBreakerState {
        CircuitBreakerState::closed(marketplace.to_string(), self.config.timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct InMemoryCircuitRepo {
        states: Mutex<std::collections::HashMap<String, CircuitBreakerState>>,
    }

    #[async_trait]
    impl CircuitRepository for InMemoryCircuitRepo {
        async fn fetch_or_init(&self, marketplace: &str, base_timeout_ms: u64) -> store::StoreResult<CircuitBreakerState> {
            let mut states = self.states.lock().unwrap();
            Ok(states
                .entry(marketplace.to_string())
                .or_insert_with(|| CircuitBreakerState::closed(marketplace.to_string(), base_timeout_ms))
                .clone())
        }

        async fn save(&self, state: &CircuitBreakerState) -> store::StoreResult<()> {
            self.states.lock().unwrap().insert(state.marketplace.clone(), state.clone());
            Ok(())
        }

        async fn try_admit_half_open_probe(
            &self,
            marketplace: &str,
            half_open_max_requests: u32,
        ) -> store::StoreResult<Option<CircuitBreakerState>> {
            let mut states = self.states.lock().unwrap();
            let Some(state) = states.get_mut(marketplace) else {
                return Ok(None);
            };
            if state.phase != CircuitPhase::HalfOpen || state.half_open_probes_in_flight >= half_open_max_requests {
                return Ok(None);
            }
            state.half_open_probes_in_flight += 1;
            Ok(Some(state.clone()))
        }
    }

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(Arc::new(InMemoryCircuitRepo::default()), CircuitBreakerConfig::default())
    }

    #[tokio::test]
    async fn opens_after_threshold_failures() {
        let cb = breaker();
        let now = chrono::Utc::now();
        for _ in 0..5 {
            cb.on_failure("poshmark", true, now).await.unwrap();
        }
        let admission = cb.admission("poshmark", now).await.unwrap();
        assert!(!admission.allowed);
        assert_eq!(admission.reason.as_deref(), Some("circuit_open"));
    }

    #[tokio::test]
    async fn transitions_to_half_open_after_timeout_then_closes_on_recovery() {
        let cb = breaker();
        let t0 = chrono::Utc::now();
        for _ in 0..5 {
            cb.on_failure("poshmark", true, t0).await.unwrap();
        }

        let after_timeout = t0 + chrono::Duration::milliseconds(61_000);
        let admission = cb.admission("poshmark", after_timeout).await.unwrap();
        assert!(admission.allowed);

        for _ in 0..3 {
            cb.on_success("poshmark").await.unwrap();
        }

        let admission = cb.admission("poshmark", after_timeout).await.unwrap();
        assert!(admission.allowed);
    }

    #[tokio::test]
    async fn half_open_failure_doubles_timeout_and_reopens() {
        let cb = breaker();
        let t0 = chrono::Utc::now();
        for _ in 0..5 {
            cb.on_failure("poshmark", true, t0).await.unwrap();
        }
        let after_timeout = t0 + chrono::Duration::milliseconds(61_000);
        cb.admission("poshmark", after_timeout).await.unwrap();
        cb.on_failure("poshmark", true, after_timeout).await.unwrap();

        let admission = cb.admission("poshmark", after_timeout).await.unwrap();
        assert!(!admission.allowed);
    }

    #[tokio::test]
    async fn non_circuit_failures_are_ignored() {
        let cb = breaker();
        let now = chrono::Utc::now();
        for _ in 0..10 {
            cb.on_failure("poshmark", false, now).await.unwrap();
        }
        let admission = cb.admission("poshmark", now).await.unwrap();
        assert!(admission.allowed);
    }
}
