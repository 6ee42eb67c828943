use std::collections::HashMap;

use corelib::{FailureAnalysis, FailureCategory};

/// Raw engine failure, before categorization (§4.4 input).
#[derive(Clone, Debug, Default)]
pub struct RawFailure {
    pub marketplace: String,
    pub http_status: Option<u16>,
    pub headers: HashMap<String, String>,
    pub error_code: Option<String>,
    pub message: String,
    pub error_type_name: Option<String>,
    pub attempt_number: u32,
    /// Set only when `error_code` is `"circuit_open"`: the breaker's own
    /// `next_retry_at`, so callers can reschedule on the breaker's cadence
    /// instead of running this through per-job retry backoff (§7).
    pub circuit_retry_at: Option<chrono::DateTime<chrono::Utc>>,
}

const RATE_LIMIT_HEADERS: &[&str] = &["x-ratelimit-remaining", "retry-after", "x-rate-limit-remaining"];

/// Per-marketplace error-code ⇒ category overrides (step 3 of §4.4's
/// classification order), populated from each engine's known quirks.
#[derive(Clone, Debug, Default)]
pub struct MarketplacePatternTable {
    patterns: HashMap<(String, String), FailureCategory>,
}

impl MarketplacePatternTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, marketplace: impl Into<String>, error_code: impl Into<String>, category: FailureCategory) {
        self.patterns.insert((marketplace.into(), error_code.into()), category);
    }

    fn lookup(&self, marketplace: &str, error_code: &str) -> Option<FailureCategory> {
        self.patterns.get(&(marketplace.to_string(), error_code.to_string())).copied()
    }
}

pub struct FailureCategorizer {
    patterns: MarketplacePatternTable,
}

impl FailureCategorizer {
    pub fn new(patterns: MarketplacePatternTable) -> Self {
        Self { patterns }
    }

    /// Classifies a raw failure per the ordered rules in §4.4. Every branch
    /// returns; the fallback classification never fails to produce an
    /// analysis.
    pub fn classify(&self, failure: &RawFailure) -> FailureAnalysis {
        if let Some(retry_after) = header_value(&failure.headers, "retry-after") {
            let mut analysis = FailureAnalysis::from_category(
                FailureCategory::RateLimit,
                0.95,
                "server presented a rate-limit header",
            );
            if let Ok(secs) = retry_after.parse::<u64>() {
                analysis.base_delay_ms = (secs * 1_000).min(analysis.max_delay_ms);
            }
            return analysis;
        }
        if has_any_header(&failure.headers, RATE_LIMIT_HEADERS) {
            return FailureAnalysis::from_category(
                FailureCategory::RateLimit,
                0.95,
                "server presented a rate-limit header",
            );
        }

        if let Some(status) = failure.http_status {
            let category = match status {
                400 | 409 | 422 => Some(FailureCategory::Validation),
                401 | 403 => Some(FailureCategory::Auth),
                404 => Some(FailureCategory::Permanent),
                429 => Some(FailureCategory::RateLimit),
                500..=599 => Some(FailureCategory::Temporary),
                400..=499 => Some(FailureCategory::MarketplaceError),
                _ => None,
            };
            if let Some(category) = category {
                return FailureAnalysis::from_category(category, 0.85, format!("http status {status}"));
            }
        }

        if let Some(code) = &failure.error_code {
            if let Some(category) = self.patterns.lookup(&failure.marketplace, code) {
                return FailureAnalysis::from_category(
                    category,
                    0.75,
                    format!("marketplace pattern match for code {code}"),
                );
            }
        }

        let message = failure.message.to_lowercase();
        if contains_any(&message, &["timeout", "timed out", "connection", "network", "dns"]) {
            return FailureAnalysis::from_category(FailureCategory::Network, 0.6, "message matched network phrasing");
        }
        if contains_any(&message, &["rate limit", "too many requests", "throttle"]) {
            return FailureAnalysis::from_category(FailureCategory::RateLimit, 0.6, "message matched rate-limit phrasing");
        }
        if contains_any(&message, &["invalid", "validation", "malformed"]) {
            return FailureAnalysis::from_category(FailureCategory::Validation, 0.6, "message matched validation phrasing");
        }

        if let Some(type_name) = &failure.error_type_name {
            let type_name = type_name.to_lowercase();
            if contains_any(&type_name, &["timeout", "abort", "network"]) {
                return FailureAnalysis::from_category(FailureCategory::Network, 0.5, "error type name implied network");
            }
            if contains_any(&type_name, &["type", "reference", "syntax"]) {
                return FailureAnalysis::from_category(FailureCategory::Permanent, 0.5, "error type name implied a defect");
            }
        }

        FailureAnalysis::from_category(FailureCategory::Temporary, 0.3, "no classifier matched; defaulting")
    }
}

fn header_value<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

fn has_any_header(headers: &HashMap<String, String>, names: &[&str]) -> bool {
    names.iter().any(|n| header_value(headers, n).is_some())
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure() -> RawFailure {
        RawFailure {
            marketplace: "poshmark".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn retry_after_header_wins_over_status() {
        let mut f = failure();
        f.http_status = Some(500);
        f.headers.insert("Retry-After".to_string(), "7".to_string());

        let analysis = FailureCategorizer::new(MarketplacePatternTable::new()).classify(&f);
        assert_eq!(analysis.category, FailureCategory::RateLimit);
        assert_eq!(analysis.base_delay_ms, 7_000);
    }

    #[test]
    fn status_404_is_permanent() {
        let mut f = failure();
        f.http_status = Some(404);
        let analysis = FailureCategorizer::new(MarketplacePatternTable::new()).classify(&f);
        assert_eq!(analysis.category, FailureCategory::Permanent);
        assert!(!analysis.should_retry);
    }

    #[test]
    fn marketplace_pattern_table_overrides_message_heuristics() {
        let mut patterns = MarketplacePatternTable::new();
        patterns.register("poshmark", "POSH_BANNED", FailureCategory::Permanent);

        let mut f = failure();
        f.error_code = Some("POSH_BANNED".to_string());
        f.message = "connection timeout while banned".to_string();

        let analysis = FailureCategorizer::new(patterns).classify(&f);
        assert_eq!(analysis.category, FailureCategory::Permanent);
    }

    #[test]
    fn unrecognized_failure_falls_back_to_temporary_with_low_confidence() {
        let f = failure();
        let analysis = FailureCategorizer::new(MarketplacePatternTable::new()).classify(&f);
        assert_eq!(analysis.category, FailureCategory::Temporary);
        assert_eq!(analysis.confidence, 0.3);
    }
}
