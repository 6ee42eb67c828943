use async_trait::async_trait;
use sqlx::{AnyPool, Row};

use corelib::{CircuitBreakerState, CircuitPhase};

use crate::error::StoreResult;

#[async_trait]
pub trait CircuitRepository: Send + Sync {
    async fn fetch_or_init(
        &self,
        marketplace: &str,
        base_timeout_ms: u64,
    ) -> StoreResult<CircuitBreakerState>;

    async fn save(&self, state: &CircuitBreakerState) -> StoreResult<()>;

    /// Atomically claims one half-open probe slot: a conditional `UPDATE …
    /// WHERE half_open_probes_in_flight < ?` inside a transaction, so two
    /// concurrent callers can't both read the same count and both be
    /// admitted. Returns the post-increment state if claimed, `None` if the
    /// circuit isn't half-open or the slot is already saturated.
    async fn try_admit_half_open_probe(
        &self,
        marketplace: &str,
        half_open_max_requests: u32,
    ) -> StoreResult<Option<CircuitBreakerState>>;
}

pub struct SqlxCircuitRepository {
    pool: AnyPool,
}

impl SqlxCircuitRepository {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }
}

fn phase_to_str(p: CircuitPhase) -> &'static str {
    match p {
        CircuitPhase::Closed => "closed",
        CircuitPhase::Open => "open",
        CircuitPhase::HalfOpen => "half_open",
    }
}

fn phase_from_str(s: &str) -> CircuitPhase {
    match s {
        "open" => CircuitPhase::Open,
        "half_open" => CircuitPhase::HalfOpen,
        _ => CircuitPhase::Closed,
    }
}

fn parse_ts(s: Option<String>) -> Option<chrono::DateTime<chrono::Utc>> {
    s.and_then(|s| chrono::DateTime::parse_from_rfc3339(&s).ok())
        .map(|t| t.with_timezone(&chrono::Utc))
}

fn row_to_state(row: &sqlx::any::AnyRow) -> CircuitBreakerState {
    CircuitBreakerState {
        marketplace: row.get("marketplace"),
        phase: phase_from_str(&row.get::<String, _>("phase")),
        failure_count: row.get::<i64, _>("failure_count") as u32,
        success_count: row.get::<i64, _>("success_count") as u32,
        opened_at: parse_ts(row.get("opened_at")),
        next_retry_at: parse_ts(row.get("next_retry_at")),
        current_timeout_ms: row.get::<i64, _>("current_timeout_ms") as u64,
        half_open_probes_in_flight: row.get::<i64, _>("half_open_probes_in_flight") as u32,
    }
}

#[async_trait]
impl CircuitRepository for SqlxCircuitRepository {
    async fn fetch_or_init(
        &self,
        marketplace: &str,
        base_timeout_ms: u64,
    ) -> StoreResult<CircuitBreakerState> {
        let row = sqlx::query(
            r#"
SELECT marketplace, phase, failure_count, success_count, opened_at, next_retry_at,
       current_timeout_ms, half_open_probes_in_flight
FROM circuit_breaker_states WHERE marketplace = ?;
"#,
        )
        .bind(marketplace)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            return Ok(row_to_state(&row));
        }

        let fresh = CircuitBreakerState::closed(marketplace.to_string(), base_timeout_ms);
        self.save(&fresh).await?;
        Ok(fresh)
    }

    async fn save(&self, state: &CircuitBreakerState) -> StoreResult<()> {
        sqlx::query("DELETE FROM circuit_breaker_states WHERE marketplace = ?;")
            .bind(&state.marketplace)
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
INSERT INTO circuit_breaker_states
  (marketplace, phase, failure_count, success_count, opened_at, next_retry_at,
   current_timeout_ms, half_open_probes_in_flight)
VALUES (?, ?, ?, ?, ?, ?, ?, ?);
"#,
        )
        .bind(&state.marketplace)
        .bind(phase_to_str(state.phase))
        .bind(state.failure_count as i64)
        .bind(state.success_count as i64)
        .bind(state.opened_at.map(|t| t.to_rfc3339()))
        .bind(state.next_retry_at.map(|t| t.to_rfc3339()))
        .bind(state.current_timeout_ms as i64)
        .bind(state.half_open_probes_in_flight as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn try_admit_half_open_probe(
        &self,
        marketplace: &str,
        half_open_max_requests: u32,
    ) -> StoreResult<Option<CircuitBreakerState>> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
UPDATE circuit_breaker_states SET half_open_probes_in_flight = half_open_probes_in_flight + 1
WHERE marketplace = ? AND phase = 'half_open' AND half_open_probes_in_flight < ?;
"#,
        )
        .bind(marketplace)
        .bind(half_open_max_requests as i64)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() != 1 {
            tx.rollback().await?;
            return Ok(None);
        }

        let row = sqlx::query(
            r#"
SELECT marketplace, phase, failure_count, success_count, opened_at, next_retry_at,
       current_timeout_ms, half_open_probes_in_flight
FROM circuit_breaker_states WHERE marketplace = ?;
"#,
        )
        .bind(marketplace)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(row_to_state(&row)))
    }
}
