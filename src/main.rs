use marketplace_ledger::config::AppConfig;
use marketplace_ledger::gateways::razorpay::RazorpayGateway;
use marketplace_ledger::http::routes::router;
use marketplace_ledger::service::audit::StoreAuditLogger;
use marketplace_ledger::service::notifier::OutcomeRouter;
use marketplace_ledger::{AppState, Engine, EngineSettings, Stores};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cfg = AppConfig::from_env();
    if cfg.webhook_secret.is_none() {
        tracing::warn!("WEBHOOK_SECRET is not set; webhook deliveries will be answered with 500");
    }

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&cfg.database_url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    let redis_client = redis::Client::open(cfg.redis_url.clone())?;

    let stores = Stores::postgres(&pool);
    let engine = Engine::build(
        &stores,
        EngineSettings::from_config(&cfg),
        Arc::new(RazorpayGateway::from_config(&cfg)),
        Arc::new(StoreAuditLogger::new(stores.audit.clone())),
        OutcomeRouter::from_config(&cfg, redis_client.clone()),
    );

    let state = AppState::new(&engine).with_backends(pool, redis_client);
    let app = router(state, cfg.internal_api_key.clone());

    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr).await?;
    tracing::info!("listening on {}", cfg.bind_addr);
    axum::serve(listener, app).await?;
    Ok(())
}
