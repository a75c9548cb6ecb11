use std::sync::Arc;

use anyhow::Context;
use handlequota::{AppState, app, auth, clock::SystemClock, config::Config, store::SqliteStore};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tower_sessions::{Expiry, MemoryStore, SessionManagerLayer, cookie::SameSite};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;

    let session_layer = SessionManagerLayer::new(MemoryStore::default())
        .with_secure(false)
        .with_same_site(SameSite::Lax)
        .with_expiry(Expiry::OnInactivity(time::Duration::minutes(config.session_inactivity_minutes)));

    let store = Arc::new(SqliteStore::connect(&config.database_url).await?);

    let secrets = std::fs::read_to_string(&config.client_secrets)
        .with_context(|| format!("reading {}", config.client_secrets.display()))?;
    let clients = auth::Clients::from_json(&serde_json::from_str(&secrets)?, &config.public_url)?;

    let state = AppState::new(
        store,
        Arc::new(SystemClock),
        clients,
        config.allocator(),
        config.ledger(),
        config.bootstrap(),
    );

    let app = app(state)
        .layer(session_layer)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("listening on {}", config.bind_addr);
    axum::serve(listener, app).await?;
    Ok(())
}
