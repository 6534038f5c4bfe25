use anyhow::Result;
use marketplace_ledger::config::AppConfig;
use marketplace_ledger::gateways::razorpay::RazorpayGateway;
use marketplace_ledger::service::audit::StoreAuditLogger;
use marketplace_ledger::service::notifier::OutcomeRouter;
use marketplace_ledger::{Engine, EngineSettings, Stores};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cfg = AppConfig::from_env();
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&cfg.database_url)
        .await?;

    let redis_client = redis::Client::open(cfg.redis_url.clone())?;

    let stores = Stores::postgres(&pool);
    let engine = Engine::build(
        &stores,
        EngineSettings::from_config(&cfg),
        Arc::new(RazorpayGateway::from_config(&cfg)),
        Arc::new(StoreAuditLogger::new(stores.audit.clone())),
        OutcomeRouter::from_config(&cfg, redis_client),
    );

    tracing::info!(
        max_attempts = cfg.retry_max_attempts,
        poll_ms = cfg.retry_poll_ms,
        "reconciliation worker started"
    );
    engine
        .reconciliation_worker(cfg.retry_max_attempts, Duration::from_millis(cfg.retry_poll_ms))
        .run()
        .await;
    Ok(())
}
