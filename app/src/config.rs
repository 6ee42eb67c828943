#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub http_bind_addr: String,

    pub rate_limit: ratelimit::RateLimitConfig,
    pub circuit_breaker: reliability::CircuitBreakerConfig,

    /// How many worker tasks the Executor spawns (§5 "parallel worker
    /// pool"). Recommended default: CPU count × a small factor.
    pub executor_concurrency: usize,

    /// Scheduler sweep cadence and batch size.
    pub scheduler_tick: std::time::Duration,
    pub scheduler_batch_size: i64,

    /// Polling sweep cadence (the cadence at which due schedules are
    /// *noticed*; each schedule's own adaptive interval governs how often
    /// it is actually polled).
    pub polling_tick: std::time::Duration,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let database_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://marketplace_automation.db".to_string());
        let http_bind_addr = std::env::var("HTTP_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        Self {
            database_url,
            http_bind_addr,
            rate_limit: ratelimit::RateLimitConfig::default(),
            circuit_breaker: reliability::CircuitBreakerConfig::default(),
            executor_concurrency: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4) * 2,
            scheduler_tick: std::time::Duration::from_secs(5),
            scheduler_batch_size: 100,
            polling_tick: std::time::Duration::from_secs(30),
        }
    }
}
