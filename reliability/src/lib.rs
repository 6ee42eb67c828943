pub mod breaker;
pub mod categorizer;

pub use breaker::{Admission, CircuitBreaker, CircuitBreakerConfig};
pub use categorizer::{FailureCategorizer, MarketplacePatternTable, RawFailure};
