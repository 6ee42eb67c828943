use sqlx::AnyPool;

pub async fn migrate(pool: &AnyPool) -> anyhow::Result<()> {
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS users (
  id TEXT PRIMARY KEY,
  time_zone TEXT NOT NULL,
  max_active_rules INTEGER NOT NULL,
  max_actions_per_day INTEGER NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS marketplace_connections (
  id TEXT PRIMARY KEY,
  user_id TEXT NOT NULL,
  marketplace TEXT NOT NULL,
  is_connected BOOLEAN NOT NULL,
  access_credential TEXT NOT NULL,
  credential_expires_at TEXT,
  last_sync_at TEXT
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS listings (
  id TEXT PRIMARY KEY,
  user_id TEXT NOT NULL,
  title TEXT NOT NULL,
  price_cents BIGINT NOT NULL,
  quantity INTEGER NOT NULL,
  category TEXT NOT NULL,
  brand TEXT,
  condition TEXT NOT NULL,
  status TEXT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS listing_posts (
  id TEXT PRIMARY KEY,
  listing_id TEXT NOT NULL,
  marketplace TEXT NOT NULL,
  external_id TEXT NOT NULL,
  status TEXT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS automation_rules (
  id TEXT PRIMARY KEY,
  user_id TEXT NOT NULL,
  marketplace TEXT NOT NULL,
  config_json TEXT NOT NULL,
  enabled BOOLEAN NOT NULL,
  total_count BIGINT NOT NULL,
  success_count BIGINT NOT NULL,
  fail_count BIGINT NOT NULL,
  last_executed_at TEXT,
  last_error TEXT
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS automation_schedules (
  id TEXT PRIMARY KEY,
  rule_id TEXT NOT NULL,
  schedule_type_json TEXT NOT NULL,
  active BOOLEAN NOT NULL,
  start_date TEXT,
  end_date TEXT,
  max_executions BIGINT,
  execution_count BIGINT NOT NULL,
  last_run_at TEXT,
  next_run_at TEXT
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS automation_logs (
  id TEXT PRIMARY KEY,
  user_id TEXT NOT NULL,
  rule_id TEXT NOT NULL,
  outcome TEXT NOT NULL,
  message TEXT NOT NULL,
  skip_reason TEXT,
  created_at TEXT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS rate_limit_counters (
  user_id TEXT NOT NULL,
  marketplace TEXT NOT NULL,
  bucket TEXT NOT NULL,
  window_start TEXT NOT NULL,
  window_seconds INTEGER NOT NULL,
  count_value INTEGER NOT NULL,
  limit_value INTEGER NOT NULL,
  PRIMARY KEY (user_id, marketplace, bucket)
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS rate_limit_blocks (
  marketplace TEXT PRIMARY KEY,
  reason TEXT NOT NULL,
  until TEXT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS circuit_breaker_states (
  marketplace TEXT PRIMARY KEY,
  phase TEXT NOT NULL,
  failure_count INTEGER NOT NULL,
  success_count INTEGER NOT NULL,
  opened_at TEXT,
  next_retry_at TEXT,
  current_timeout_ms BIGINT NOT NULL,
  half_open_probes_in_flight INTEGER NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS webhook_configurations (
  user_id TEXT NOT NULL,
  marketplace TEXT NOT NULL,
  endpoint TEXT NOT NULL,
  secret TEXT NOT NULL,
  subscribed_events_json TEXT NOT NULL,
  verified BOOLEAN NOT NULL,
  consecutive_errors INTEGER NOT NULL,
  PRIMARY KEY (user_id, marketplace)
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS webhook_events (
  id TEXT PRIMARY KEY,
  marketplace TEXT NOT NULL,
  external_event_id TEXT NOT NULL,
  raw_payload_json TEXT NOT NULL,
  headers_json TEXT NOT NULL,
  signature_valid BOOLEAN NOT NULL,
  status TEXT NOT NULL,
  duplicate_of TEXT,
  kind TEXT,
  priority INTEGER NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE UNIQUE INDEX IF NOT EXISTS idx_webhook_events_dedup
           ON webhook_events(marketplace, external_event_id);"#,
    )
    .execute(pool)
    .await?;

    // Deliberately outside webhook_events' dedup keyspace: external_event_id
    // on an unsigned delivery is attacker-controlled, so admitting it to the
    // unique (marketplace, external_event_id) index would let a spoofed
    // delivery pre-seed the key and cause a later genuinely-signed event
    // with the same id to be rejected as a duplicate (§4.7 `verify`).
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS rejected_webhook_deliveries (
  id TEXT PRIMARY KEY,
  marketplace TEXT NOT NULL,
  external_event_id TEXT NOT NULL,
  raw_payload_json TEXT NOT NULL,
  headers_json TEXT NOT NULL,
  received_at TEXT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS polling_schedules (
  user_id TEXT NOT NULL,
  marketplace TEXT NOT NULL,
  min_interval_secs INTEGER NOT NULL,
  max_interval_secs INTEGER NOT NULL,
  current_interval_secs INTEGER NOT NULL,
  consecutive_failures INTEGER NOT NULL,
  max_failures INTEGER NOT NULL,
  disabled BOOLEAN NOT NULL,
  last_poll_at TEXT,
  PRIMARY KEY (user_id, marketplace)
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS sync_jobs (
  id TEXT PRIMARY KEY,
  listing_id TEXT NOT NULL,
  triggering_event_id TEXT NOT NULL,
  source_marketplace TEXT NOT NULL,
  targets_json TEXT NOT NULL,
  total_count INTEGER NOT NULL,
  done_count INTEGER NOT NULL,
  failed_count INTEGER NOT NULL,
  status TEXT NOT NULL,
  started_at TEXT NOT NULL,
  finished_at TEXT
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE INDEX IF NOT EXISTS idx_sync_jobs_listing
           ON sync_jobs(listing_id, triggering_event_id);"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS dlq_entries (
  id TEXT PRIMARY KEY,
  job_id TEXT NOT NULL,
  total_attempts INTEGER NOT NULL,
  final_category TEXT NOT NULL,
  history_json TEXT NOT NULL,
  resolution TEXT NOT NULL,
  created_at TEXT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_rules_user ON automation_rules(user_id);"#)
        .execute(pool)
        .await?;

    sqlx::query(
        r#"CREATE INDEX IF NOT EXISTS idx_schedules_next_run
           ON automation_schedules(active, next_run_at);"#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
