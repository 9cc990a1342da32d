//! Domain verification jobs
//!
//! Scheduled DNS checks for bindings awaiting verification, plus periodic
//! health checks of verified custom domains. Individual binding failures are
//! isolated inside the pass; only a failure to load the batch surfaces here.

use std::time::{Duration, Instant};

use sqlx::PgPool;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;
use tracing::{debug, error, warn};

use nextslot_api::domains::{DomainService, PassSummary};

const CONNECT_BASE_DELAY: Duration = Duration::from_millis(500);
const CONNECT_MAX_DELAY: Duration = Duration::from_secs(10);
const CONNECT_ATTEMPTS: usize = 5;

/// Connect to Postgres, retrying with backoff while the database comes up
pub async fn connect_with_retry(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    let strategy = ExponentialBackoff::from_millis(CONNECT_BASE_DELAY.as_millis() as u64)
        .max_delay(CONNECT_MAX_DELAY)
        .map(jitter)
        .take(CONNECT_ATTEMPTS);

    Retry::spawn(strategy, || async {
        nextslot_shared::create_pool(database_url, max_connections)
            .await
            .map_err(|e| {
                warn!(error = %e, "Database not reachable, retrying");
                e
            })
    })
    .await
}

/// Check every Pending/DnsPartial binding past its propagation grace period
pub async fn process_pending_verifications(domains: &DomainService) {
    let started = Instant::now();
    match domains.run_verification_pass().await {
        Ok(summary) => log_elapsed("verification", &summary, started),
        Err(e) => error!(error = %e, "Failed to load bindings awaiting verification"),
    }
}

/// Re-check verified custom domains so broken DNS shows up in diagnostics
pub async fn process_health_checks(domains: &DomainService) {
    let started = Instant::now();
    match domains.run_health_checks().await {
        Ok(summary) => log_elapsed("health check", &summary, started),
        Err(e) => error!(error = %e, "Failed to load verified bindings"),
    }
}

fn log_elapsed(pass: &str, summary: &PassSummary, started: Instant) {
    debug!(
        pass,
        checked = summary.checked,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Domain pass finished"
    );
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use nextslot_api::config::{PlatformConfig, VerificationPolicy};
    use nextslot_api::domains::{MemoryBindingStore, StaticDns, VerificationEngine};
    use nextslot_api::routing::DirectoryIndex;
    use nextslot_shared::{BindingKind, DomainState, Tenant};

    #[tokio::test]
    async fn test_scheduled_pass_verifies_configured_domain() {
        let dns = Arc::new(StaticDns::new());
        let policy = VerificationPolicy {
            propagation_grace: time::Duration::ZERO,
            ..VerificationPolicy::default()
        };
        let domains = DomainService::new(
            Arc::new(MemoryBindingStore::new()),
            VerificationEngine::new(dns.clone()),
            Arc::new(DirectoryIndex::default()),
            Arc::new(PlatformConfig::new("nextslot.in")),
            policy,
        );

        let tenant = Tenant::new("okmentor", "OK Mentor");
        domains.store().upsert_tenant(&tenant).await.unwrap();
        let binding = domains
            .add_domain(tenant.id, "okmentor.in", BindingKind::CustomDomain)
            .await
            .unwrap()
            .binding;

        dns.set_cname("okmentor.in", "app.nextslot.in.");
        dns.set_txt(&binding.txt_lookup_name(), &[binding.verification_token.as_str()]);

        process_pending_verifications(&domains).await;
        process_health_checks(&domains).await;

        let stored = domains.get_binding(tenant.id, binding.id).await.unwrap();
        assert_eq!(stored.state, DomainState::Verified);
    }
}
