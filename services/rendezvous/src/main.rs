use std::sync::Arc;

use anyhow::Result;
use common::{
    cache::{RedisConfig, RedisPool},
    database::{self, DatabaseConfig},
};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use rendezvous::{
    AppState, SessionRegistry, Watcher,
    assertion::AssertionVerifier,
    rate_limiter::RateLimiter,
    reaper::ExpiryReaper,
    repositories::{AccountRepository, DeviceRepository},
    routes,
    settings::Settings,
    store::{RedisSessionStore, SessionStore},
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting rendezvous service");

    let settings = Settings::from_env()?;

    // Initialize database connection pool
    let db_config = DatabaseConfig::from_env()?;
    let pool = database::init_pool(&db_config).await?;
    if database::health_check(&pool).await? {
        info!("Database connection successful");
    } else {
        anyhow::bail!("Failed to connect to database");
    }
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database migrations applied");

    // Initialize Redis-backed session store
    let redis_config = RedisConfig::from_env()?;
    let redis_pool = RedisPool::new(&redis_config).await?;
    let store: Arc<dyn SessionStore> = Arc::new(RedisSessionStore::new(redis_pool));
    if !store.health_check().await? {
        anyhow::bail!("Failed to connect to Redis");
    }

    let accounts = AccountRepository::new(pool.clone());
    let devices = DeviceRepository::new(pool);

    let verifier = AssertionVerifier::new(Arc::new(devices.clone()), settings.assertion_max_age_secs);
    let registry = SessionRegistry::new(
        store.clone(),
        Arc::new(accounts.clone()),
        verifier,
        settings.session_ttl(),
    );
    let watcher = Watcher::new(store.clone(), settings.session_ttl(), settings.watch_margin());

    let reaper = ExpiryReaper::new(store.clone(), registry.clone(), settings.sweep_interval())?;
    let reaper_handle = reaper.start().await?;

    let app_state = AppState {
        registry,
        watcher,
        store,
        accounts,
        devices,
        rate_limiter: RateLimiter::new(settings.rate_limiter()),
    };

    let app = routes::create_router(app_state);

    let listener = TcpListener::bind(&settings.bind_addr).await?;
    info!("Rendezvous service listening on {}", settings.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
        })
        .await?;

    reaper_handle.stop().await?;
    info!("Rendezvous service stopped");

    Ok(())
}
