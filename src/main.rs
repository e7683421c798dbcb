use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;
use travel_checkout::bootstrap::build_orchestrator;
use travel_checkout::config::AppConfig;
use travel_checkout::http::router;
use travel_checkout::{AppState, WebhookSettings};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cfg = AppConfig::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&cfg.database_url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    let redis_client = redis::Client::open(cfg.redis_url.clone())?;
    let orchestrator = build_orchestrator(&cfg, pool.clone(), redis_client.clone());

    if cfg.card_webhook_secret.is_empty() {
        tracing::warn!("CARD_WEBHOOK_SECRET is empty; card webhooks will be rejected");
    }

    let state = AppState {
        orchestrator,
        pool,
        redis_client,
        webhook: WebhookSettings {
            card_secret: cfg.card_webhook_secret.clone(),
            tolerance_secs: cfg.card_webhook_tolerance_secs,
        },
    };

    let app = router::build(state, cfg.internal_api_key.clone());

    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr).await?;
    tracing::info!("listening on {}", cfg.bind_addr);
    axum::serve(listener, app).await?;
    Ok(())
}
