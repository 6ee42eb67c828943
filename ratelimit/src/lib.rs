//! Rate Limiter (C3): fixed-window admission per (marketplace, user,
//! window-type), plus a marketplace-wide block and human-pacing delay.

use std::sync::Arc;

use corelib::UserId;
use store::RateLimitRepository;

#[derive(Clone, Copy, Debug)]
pub struct RateLimitConfig {
    pub hourly_limit: u32,
    pub daily_limit: u32,
    pub min_inter_request_delay_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            hourly_limit: 100,
            daily_limit: 1_000,
            min_inter_request_delay_ms: 500,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CheckResult {
    pub allowed: bool,
    pub retry_after: Option<chrono::Duration>,
    pub remaining: u32,
}

const HOURLY_BUCKET: &str = "hourly";
const DAILY_BUCKET: &str = "daily";
const HOURLY_WINDOW_SECS: u32 = 3_600;
const DAILY_WINDOW_SECS: u32 = 86_400;

pub struct RateLimiter {
    repo: Arc<dyn RateLimitRepository>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(repo: Arc<dyn RateLimitRepository>, config: RateLimitConfig) -> Self {
        Self { repo, config }
    }

    /// Read-only admission preview: compares current windows against
    /// configured caps without mutating state (§4.3 `check`).
    #[tracing::instrument(skip(self), fields(marketplace, %user_id))]
    pub async fn check(
        &self,
        marketplace: &str,
        user_id: &UserId,
        now: chrono::DateTime<chrono::Utc>,
    ) -> anyhow::Result<CheckResult> {
        if let Some(until) = self.repo.marketplace_block(marketplace).await? {
            if until > now {
                return Ok(CheckResult {
                    allowed: false,
                    retry_after: Some(until - now),
                    remaining: 0,
                });
            }
        }

        let hourly = self.repo.fetch_counter(user_id, marketplace, HOURLY_BUCKET).await?;
        let daily = self.repo.fetch_counter(user_id, marketplace, DAILY_BUCKET).await?;

        let hourly_remaining = remaining_in_window(hourly.as_ref(), self.config.hourly_limit, now);
        let daily_remaining = remaining_in_window(daily.as_ref(), self.config.daily_limit, now);

        let allowed = hourly_remaining > 0 && daily_remaining > 0;
        let retry_after = if allowed {
            None
        } else {
            let hourly_reset = reset_time(hourly.as_ref(), HOURLY_WINDOW_SECS, now);
            let daily_reset = reset_time(daily.as_ref(), DAILY_WINDOW_SECS, now);
            Some((hourly_reset.max(daily_reset) - now).max(chrono::Duration::zero()))
        };

        Ok(CheckResult {
            allowed,
            retry_after,
            remaining: hourly_remaining.min(daily_remaining),
        })
    }

    /// Atomically increments both windows (§4.3 `record`). Returns `false`
    /// if either window was saturated by the time the increment landed —
    /// callers that raced past `check` must still honor this.
    #[tracing::instrument(skip(self), fields(marketplace, %user_id, success))]
    pub async fn record(
        &self,
        marketplace: &str,
        user_id: &UserId,
        success: bool,
        now: chrono::DateTime<chrono::Utc>,
    ) -> anyhow::Result<bool> {
        let hourly_ok = self
            .repo
            .try_admit(user_id, marketplace, HOURLY_BUCKET, HOURLY_WINDOW_SECS, self.config.hourly_limit, now)
            .await?;
        let daily_ok = self
            .repo
            .try_admit(user_id, marketplace, DAILY_BUCKET, DAILY_WINDOW_SECS, self.config.daily_limit, now)
            .await?;

        if !success {
            tracing::debug!("recording a failed call against rate-limit counters");
        }

        Ok(hourly_ok && daily_ok)
    }

    /// Applies a server-reported `Retry-After` (or equivalent) as an
    /// account-wide hold, overriding local window estimates until it lapses.
    pub async fn block(
        &self,
        marketplace: &str,
        reason: &str,
        until: chrono::DateTime<chrono::Utc>,
    ) -> anyhow::Result<()> {
        self.repo.block_marketplace(marketplace, reason, until).await?;
        Ok(())
    }

    pub fn min_inter_request_delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.config.min_inter_request_delay_ms)
    }
}

fn remaining_in_window(
    counter: Option<&corelib::RateLimitCounter>,
    limit: u32,
    now: chrono::DateTime<chrono::Utc>,
) -> u32 {
    match counter {
        Some(c) if !c.window_expired(now) => limit.saturating_sub(c.count),
        _ => limit,
    }
}

fn reset_time(
    counter: Option<&corelib::RateLimitCounter>,
    window_seconds: u32,
    now: chrono::DateTime<chrono::Utc>,
) -> chrono::DateTime<chrono::Utc> {
    match counter {
        Some(c) => c.window_start + chrono::Duration::seconds(c.window_seconds as i64),
        None => now + chrono::Duration::seconds(window_seconds as i64),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct InMemoryRateLimitRepo {
        counters: Mutex<std::collections::HashMap<(String, String, String), corelib::RateLimitCounter>>,
        blocks: Mutex<std::collections::HashMap<String, chrono::DateTime<chrono::Utc>>>,
    }

    #[async_trait]
    impl RateLimitRepository for InMemoryRateLimitRepo {
        async fn fetch_counter(
            &self,
            user_id: &UserId,
            marketplace: &str,
            bucket: &str,
        ) -> store::StoreResult<Option<corelib::RateLimitCounter>> {
            let key = (user_id.to_string(), marketplace.to_string(), bucket.to_string());
            Ok(self.counters.lock().unwrap().get(&key).cloned())
        }

        async fn try_admit(
            &self,
            user_id: &UserId,
            marketplace: &str,
            bucket: &str,
            window_seconds: u32,
            limit: u32,
            now: chrono::DateTime<chrono::Utc>,
        ) -> store::StoreResult<bool> {
            let key = (user_id.to_string(), marketplace.to_string(), bucket.to_string());
            let mut counters = self.counters.lock().unwrap();
            let entry = counters.entry(key).or_insert_with(|| corelib::RateLimitCounter {
                marketplace: marketplace.to_string(),
                bucket: bucket.to_string(),
                window_start: now,
                window_seconds,
                count: 0,
                limit,
            });

            if entry.window_expired(now) {
                entry.window_start = now;
                entry.count = 0;
            }

            if !entry.has_capacity() {
                return Ok(false);
            }
            entry.count += 1;
            Ok(true)
        }

        async fn block_marketplace(
            &self,
            marketplace: &str,
            _reason: &str,
            until: chrono::DateTime<chrono::Utc>,
        ) -> store::StoreResult<()> {
            self.blocks.lock().unwrap().insert(marketplace.to_string(), until);
            Ok(())
        }

        async fn marketplace_block(
            &self,
            marketplace: &str,
        ) -> store::StoreResult<Option<chrono::DateTime<chrono::Utc>>> {
            Ok(self.blocks.lock().unwrap().get(marketplace).copied())
        }
    }

    fn limiter(hourly_limit: u32) -> RateLimiter {
        RateLimiter::new(
            Arc::new(InMemoryRateLimitRepo::default()),
            RateLimitConfig {
                hourly_limit,
                daily_limit: 10_000,
                min_inter_request_delay_ms: 0,
            },
        )
    }

    #[tokio::test]
    async fn admits_up_to_the_hourly_cap_then_blocks() {
        let rl = limiter(2);
        let user = uuid::Uuid::new_v4();
        let now = chrono::Utc::now();

        assert!(rl.record("poshmark", &user, true, now).await.unwrap());
        assert!(rl.record("poshmark", &user, true, now).await.unwrap());
        assert!(!rl.record("poshmark", &user, true, now).await.unwrap());
    }

    #[tokio::test]
    async fn explicit_block_overrides_remaining_capacity() {
        let rl = limiter(100);
        let user = uuid::Uuid::new_v4();
        let now = chrono::Utc::now();

        rl.block("poshmark", "server_retry_after", now + chrono::Duration::seconds(30))
            .await
            .unwrap();

        let result = rl.check("poshmark", &user, now).await.unwrap();
        assert!(!result.allowed);
        assert!(result.retry_after.unwrap() <= chrono::Duration::seconds(30));
    }

    #[tokio::test]
    async fn check_reports_remaining_without_mutating_state() {
        let rl = limiter(5);
        let user = uuid::Uuid::new_v4();
        let now = chrono::Utc::now();

        let before = rl.check("poshmark", &user, now).await.unwrap();
        let after = rl.check("poshmark", &user, now).await.unwrap();
        assert_eq!(before, after);
        assert_eq!(before.remaining, 5);
    }
}
