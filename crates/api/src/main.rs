//! NextSlot API server

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;

use nextslot_api::{
    config::Config,
    domains::{DomainService, TrustDnsLookup},
    routes::create_router,
    telemetry::init_tracing,
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::from_env().context("Invalid configuration")?;
    init_tracing(config.log_json);

    let pool = match &config.database_url {
        Some(url) => {
            let migration_pool = nextslot_shared::create_migration_pool(url)
                .await
                .context("Failed to connect to database for migrations")?;
            nextslot_shared::run_migrations(&migration_pool)
                .await
                .context("Failed to run migrations")?;
            migration_pool.close().await;

            let pool = nextslot_shared::create_pool(url, config.database_max_connections)
                .await
                .context("Failed to connect to database")?;
            tracing::info!("Database connected and migrated");
            Some(pool)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory binding store");
            None
        }
    };

    let dns = Arc::new(TrustDnsLookup::new(config.verification.lookup_timeout));
    let state = AppState::new(&config, pool, dns);

    let entries = state
        .domains
        .refresh_directory()
        .await
        .context("Failed to load tenant directory")?;
    tracing::info!(entries, "Tenant directory loaded");

    tokio::spawn(refresh_directory_loop(
        state.domains.clone(),
        config.directory_refresh_interval,
    ));

    let app = create_router(state);
    let listener = TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_address))?;
    tracing::info!(address = %config.bind_address, "NextSlot API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    Ok(())
}

/// Reload the directory so writes made by other processes (the worker) become routable
async fn refresh_directory_loop(domains: DomainService, every: std::time::Duration) {
    let mut interval = tokio::time::interval(every);
    interval.tick().await;
    loop {
        interval.tick().await;
        match domains.refresh_directory().await {
            Ok(entries) => tracing::debug!(entries, "Tenant directory refreshed"),
            Err(e) => tracing::error!(error = %e, "Tenant directory refresh failed"),
        }
        domains.directory().cache().cleanup();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutting down");
}
