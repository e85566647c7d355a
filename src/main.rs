//! Entry point: load config, wire dependencies, and run the server.

use std::sync::Arc;

use parley::auth::JwtSecret;
use parley::config::Config;
use parley::db::{self, ChatStore, MemoryStore, PgStore};
use parley::{cors_layer, create_app, AppState, Hub, HubHandle};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!("config: {}", e))?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))?;
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let store: Arc<dyn ChatStore> = match &config.database_url {
        Some(url) => {
            let pool = db::create_pool(url).await?;
            db::run_migrations(&pool).await?;
            tracing::info!("using postgres store");
            Arc::new(PgStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL unset, keeping everything in memory");
            Arc::new(MemoryStore::new())
        }
    };

    let hub = Hub::start(store.clone(), config.hub_settings()).await?;
    let jwt_secret = JwtSecret::with_ttl(
        config.jwt_secret.clone(),
        chrono::Duration::seconds(config.token_ttl_secs),
    );
    let state = AppState::new(hub.clone(), store, jwt_secret, config.pump_settings());

    let app = create_app(state).layer(cors_layer(config.allowed_origin.as_deref())?);

    tracing::info!(addr = %config.server_addr, "listening");
    let listener = tokio::net::TcpListener::bind(config.server_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(hub))
        .await?;

    tracing::info!("server stopped");
    Ok(())
}

/// Resolves on ctrl-c after closing every live session, so upgraded
/// connections do not hold the server open.
async fn shutdown_signal(hub: HubHandle) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for ctrl-c");
    }
    tracing::info!("shutdown requested");
    hub.shutdown();
}
