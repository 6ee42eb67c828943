mod config;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;

use config::AppConfig;
use engines::pacing::PacingConfig;
use engines::poshmark::{HttpPoshmarkClient, PoshmarkLikeEngine};
use engines::MarketplaceEngine;
use executor::Executor;
use ingest::http::{router, IngestState};
use ingest::{default_event_kinds, PollingDriver, WebhookIngestor};
use reliability::CircuitBreaker;
use scheduler::Scheduler;
use store::Db;
use sync::SyncTrigger;

/// Wires the Record Store, then constructs every repository on top of it.
async fn init_store(cfg: &AppConfig) -> anyhow::Result<Db> {
    let db = Db::connect(&cfg.database_url).await?;
    db.migrate().await?;
    Ok(db)
}

/// Registers one engine per marketplace tag this deployment automates.
/// Adding a marketplace means adding one line here and nowhere else in the
/// executor or scheduler.
fn build_engines(pacing: PacingConfig) -> anyhow::Result<HashMap<String, Arc<dyn MarketplaceEngine>>> {
    let mut engines: HashMap<String, Arc<dyn MarketplaceEngine>> = HashMap::new();

    let poshmark_client = Arc::new(HttpPoshmarkClient::new("https://poshmark.com")?);
    let poshmark_engine = Arc::new(PoshmarkLikeEngine::new("poshmark", poshmark_client, pacing));
    engines.insert("poshmark".to_string(), poshmark_engine);

    Ok(engines)
}

/// Drains due firings off the scheduler onto the executor's queue at a fixed
/// cadence. Each tick also recomputes nothing on its own — `Executor::advance`
/// is what moves `next_run_at` forward, on the first attempt of each firing.
fn start_scheduler_loop(scheduler: Arc<Scheduler>, executor: Arc<Executor>, cfg: &AppConfig) {
    let tick = cfg.scheduler_tick;
    let batch_size = cfg.scheduler_batch_size;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(tick);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match scheduler.due_firings(Utc::now(), batch_size).await {
                Ok(firings) => {
                    for firing in firings {
                        executor.submit_rule_firing(firing);
                    }
                }
                Err(e) => tracing::error!(error = %e, "scheduler sweep failed"),
            }
        }
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let is_production = std::env::var("APP_ENV").unwrap_or_default() == "production";
    common::init_tracing(is_production);

    tracing::info!("starting marketplace automation backend");

    let cfg = AppConfig::from_env();
    let db = init_store(&cfg).await?;
    let pool = (*db.pool).clone();

    let rule_repo = Arc::new(store::SqlxRuleRepository::new(pool.clone()));
    let user_repo = Arc::new(store::SqlxUserRepository::new(pool.clone()));
    let listing_repo = Arc::new(store::SqlxListingRepository::new(pool.clone()));
    let audit_repo = Arc::new(store::SqlxAuditLogRepository::new(pool.clone()));
    let sync_repo = Arc::new(store::SqlxSyncRepository::new(pool.clone()));
    let dlq_repo = Arc::new(store::SqlxDlqRepository::new(pool.clone()));
    let rate_limit_repo = Arc::new(store::SqlxRateLimitRepository::new(pool.clone()));
    let circuit_repo = Arc::new(store::SqlxCircuitRepository::new(pool.clone()));
    let webhook_repo = Arc::new(store::SqlxWebhookRepository::new(pool.clone()));
    let polling_repo = Arc::new(store::SqlxPollingRepository::new(pool.clone()));

    let rate_limiter = Arc::new(ratelimit::RateLimiter::new(rate_limit_repo, cfg.rate_limit));
    let circuit_breaker = Arc::new(CircuitBreaker::new(circuit_repo, cfg.circuit_breaker));
    let scheduler = Arc::new(Scheduler::new(rule_repo.clone()));

    let engines = build_engines(PacingConfig::default())?;

    let executor = Arc::new(Executor::new(
        engines,
        rule_repo,
        user_repo,
        listing_repo.clone(),
        audit_repo,
        sync_repo.clone(),
        dlq_repo,
        rate_limiter,
        circuit_breaker,
        scheduler.clone(),
        reliability::MarketplacePatternTable::new(),
    ));

    executor.clone().run(cfg.executor_concurrency);

    start_scheduler_loop(scheduler, executor.clone(), &cfg);

    let sync_trigger = Arc::new(SyncTrigger::new(listing_repo.clone(), sync_repo, executor.clone()));

    let ingestor = Arc::new(WebhookIngestor::new(webhook_repo, listing_repo.clone(), sync_trigger.clone(), default_event_kinds()));

    let polling_clients: HashMap<String, Arc<dyn ingest::PollingClient>> = HashMap::new();
    let polling_driver = Arc::new(PollingDriver::new(polling_repo, listing_repo, polling_clients, sync_trigger));
    tokio::spawn(polling_driver.run(cfg.polling_tick));

    let http_state = IngestState { ingestor };
    let listener = tokio::net::TcpListener::bind(&cfg.http_bind_addr).await?;
    tracing::info!(addr = %cfg.http_bind_addr, "webhook listener bound");

    tokio::select! {
        result = axum::serve(listener, router(http_state)) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "http server exited");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    Ok(())
}
