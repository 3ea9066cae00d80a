use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use welth_advisor::{
    api::start_server,
    config::AppConfig,
    controller::ChatController,
    gateway::{AdviceGateway, DryRunGateway, GeminiClient},
    ratelimit::RateLimiter,
    session::{InMemorySessionStore, PgSessionStore, SessionStore},
    store::{FinanceStore, InMemoryFinanceStore, PgFinanceStore},
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::from_env()?;

    info!("Welth Advisor - API Server");
    info!("Port: {}", config.port);

    let (store, sessions): (Arc<dyn FinanceStore>, Arc<dyn SessionStore>) = match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new().max_connections(5).connect_lazy(url)?;
            info!("Using Postgres finance store");
            (
                Arc::new(PgFinanceStore::new(pool.clone())),
                Arc::new(PgSessionStore::new(pool)),
            )
        }
        None => {
            warn!("DATABASE_URL not set, using empty in-memory stores");
            (
                Arc::new(InMemoryFinanceStore::new()),
                Arc::new(InMemorySessionStore::new()),
            )
        }
    };

    let gateway: Arc<dyn AdviceGateway> = if config.gateway.api_key.trim().is_empty() {
        warn!("GEMINI_API_KEY not set, replies come from the dry-run gateway");
        Arc::new(DryRunGateway)
    } else {
        Arc::new(GeminiClient::new(
            config.gateway.api_key.clone(),
            config.gateway.base_url.clone(),
        )?)
    };

    let controller = Arc::new(ChatController::new(
        store,
        gateway,
        sessions,
        Arc::new(RateLimiter::new(config.rate_limit.clone())),
        config.chat.clone(),
        config.gateway.clone(),
    ));

    info!(
        primary = %config.gateway.primary.model,
        fallback = %config.gateway.fallback.model,
        "Controller initialized"
    );

    start_server(controller, config.port).await?;

    Ok(())
}
