use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use libris_api::{app, AppState, AuthConfig};
use libris_core::repository::{CirculationRepository, SlotRepository, UserRepository};
use libris_store::app_config::{Config, StorageBackend};
use libris_store::{DbClient, MemoryStore, PgCirculationRepository, PgSlotRepository, PgUserRepository};
use mockable::DefaultClock;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

type Repositories = (
    Arc<dyn SlotRepository>,
    Arc<dyn CirculationRepository>,
    Arc<dyn UserRepository>,
);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "libris_api=debug,libris_seating=info,libris_circulation=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting Libris API on port {}", config.server.port);

    let (slots, circulation, users): Repositories = match config.storage.backend {
        StorageBackend::Postgres => {
            let db = DbClient::new(&config.database.url, config.database.max_connections)
                .await
                .context("Failed to connect to Postgres")?;
            db.migrate().await.context("Failed to run migrations")?;
            (
                Arc::new(PgSlotRepository::new(db.pool.clone())),
                Arc::new(PgCirculationRepository::new(db.pool.clone())),
                Arc::new(PgUserRepository::new(db.pool)),
            )
        }
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory storage, state is lost on exit");
            let store = Arc::new(MemoryStore::seeded().await?);
            (store.clone(), store.clone(), store)
        }
    };

    let clock = Arc::new(DefaultClock);
    let state = AppState::new(
        slots,
        circulation,
        users,
        config.rules.library_rules(),
        clock.clone(),
        AuthConfig {
            secret: config.auth.jwt_secret.clone(),
        },
    );

    let sweeper = state
        .ledger
        .sweeper()
        .clone()
        .spawn(clock, config.rules.sweep_interval());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    let shutdown = state.shutdown.clone();
    axum::serve(listener, app(state))
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            // Ends open event streams so in-flight connections can drain.
            shutdown.trigger();
        })
        .await?;

    sweeper.stop().await;
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("Shutdown signal received");
}
