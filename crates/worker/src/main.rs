//! NextSlot background worker
//!
//! Runs the scheduled domain verification and health check passes.

mod domain_verification;

use std::sync::Arc;

use anyhow::{bail, Context};
use tokio_cron_scheduler::{Job, JobScheduler};

use nextslot_api::{config::Config, domains::TrustDnsLookup, telemetry::init_tracing, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::from_env().context("Invalid configuration")?;
    init_tracing(config.log_json);

    let Some(database_url) = config.database_url.clone() else {
        bail!("DATABASE_URL must be set for the worker");
    };
    let pool = domain_verification::connect_with_retry(&database_url, config.database_max_connections)
        .await
        .context("Failed to connect to database")?;

    let dns = Arc::new(TrustDnsLookup::new(config.verification.lookup_timeout));
    let state = AppState::new(&config, Some(pool), dns);

    let sched = JobScheduler::new().await?;

    let domains = state.domains.clone();
    let verify_job = Job::new_async(config.verify_cron.as_str(), move |_uuid, _lock| {
        let domains = domains.clone();
        Box::pin(async move {
            domain_verification::process_pending_verifications(&domains).await;
        })
    })?;
    sched.add(verify_job).await?;

    let domains = state.domains.clone();
    let health_job = Job::new_async(config.health_check_cron.as_str(), move |_uuid, _lock| {
        let domains = domains.clone();
        Box::pin(async move {
            domain_verification::process_health_checks(&domains).await;
        })
    })?;
    sched.add(health_job).await?;

    sched.start().await?;
    tracing::info!(
        verify_cron = %config.verify_cron,
        health_check_cron = %config.health_check_cron,
        "NextSlot worker started"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down worker");
    let mut sched = sched;
    sched.shutdown().await?;

    Ok(())
}
