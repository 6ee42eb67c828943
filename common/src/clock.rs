//! Clock & TimeZone (C1): the one seam every timing decision flows through.
//! Nothing outside this module calls `chrono::Utc::now()` directly, so a
//! fixed clock can stand in for the wall clock in tests (DST transitions,
//! jitter bounds, schedule firing windows).

use chrono::{DateTime, Utc};

pub trait Clock: Send + Sync {
    fn now_utc(&self) -> DateTime<Utc>;

    /// Current time rendered in `tz`. Returns `None` for an unrecognized
    /// IANA zone name; callers treat that as a configuration error.
    fn now_in(&self, tz: &str) -> Option<DateTime<chrono_tz::Tz>> {
        let zone: chrono_tz::Tz = tz.parse().ok()?;
        Some(self.now_utc().with_timezone(&zone))
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock pinned to one instant, for deterministic scheduling tests.
#[derive(Clone, Copy, Debug)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_in_rejects_unknown_zones() {
        let clock = FixedClock(DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().with_timezone(&Utc));
        assert!(clock.now_in("Not/AZone").is_none());
        assert!(clock.now_in("America/New_York").is_some());
    }
}
