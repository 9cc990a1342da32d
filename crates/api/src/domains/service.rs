//! Domain management service
//!
//! Ties the binding store, verification engine, lifecycle rules and the
//! in-memory directory together. Both the HTTP handlers and the worker go
//! through this type.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use time::OffsetDateTime;
use tracing::{error, info, warn};

use nextslot_shared::{BindingId, BindingKind, DomainBinding, DomainState, Tenant, TenantId};

use crate::config::{PlatformConfig, VerificationPolicy};
use crate::routing::DirectoryIndex;

use super::hostname::validate_hostname;
use super::lifecycle::{self, CheckMode};
use super::secrets::new_binding_secrets;
use super::store::BindingStore;
use super::verifier::{VerificationEngine, VerificationResult};
use super::{DomainError, DomainResult, StoreError};

/// TTL suggested for the records a tenant creates
const INSTRUCTION_TTL: u32 = 3600;

/// Attempts at a tenant-initiated write before giving up on a busy binding
const MAX_WRITE_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DnsRecord {
    pub record_type: &'static str,
    pub name: String,
    pub value: String,
    pub ttl: u32,
}

/// Records a tenant must create for a custom domain
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DnsInstructions {
    pub cname: DnsRecord,
    pub txt: DnsRecord,
}

impl DnsInstructions {
    /// Instructions for a custom domain binding; subdomains need none
    pub fn for_binding(binding: &DomainBinding) -> Option<Self> {
        if binding.kind == BindingKind::Subdomain {
            return None;
        }
        Some(Self {
            cname: DnsRecord {
                record_type: "CNAME",
                name: binding.hostname.clone(),
                value: binding.cname_target.clone(),
                ttl: INSTRUCTION_TTL,
            },
            txt: DnsRecord {
                record_type: "TXT",
                name: binding.txt_lookup_name(),
                value: binding.verification_token.clone(),
                ttl: INSTRUCTION_TTL,
            },
        })
    }
}

/// A binding together with what the tenant has to do next
#[derive(Debug, Clone, Serialize)]
pub struct BindingWithInstructions {
    pub binding: DomainBinding,
    pub dns_instructions: Option<DnsInstructions>,
}

impl From<DomainBinding> for BindingWithInstructions {
    fn from(binding: DomainBinding) -> Self {
        Self {
            dns_instructions: DnsInstructions::for_binding(&binding),
            binding,
        }
    }
}

/// Outcome of an on-demand verification
#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    pub binding: DomainBinding,
    pub result: VerificationResult,
}

/// Counts from one verification or health-check pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PassSummary {
    pub checked: usize,
    pub verified: usize,
    pub partial: usize,
    pub pending: usize,
    pub failed: usize,
    pub transient: usize,
    /// Verified bindings whose records no longer check out (health checks only)
    pub unhealthy: usize,
    pub stale_writes: usize,
    pub errors: usize,
}

/// What happened to one binding during a pass
enum BindingOutcome {
    Checked {
        state: DomainState,
        result: VerificationResult,
    },
    Stale,
    Error,
}

impl PassSummary {
    fn record(&mut self, outcome: &BindingOutcome) {
        self.checked += 1;
        match outcome {
            BindingOutcome::Checked { state, result } => {
                if result.has_transient() {
                    self.transient += 1;
                }
                match state {
                    DomainState::Verified | DomainState::SslActive => {
                        if result.fully_verified() {
                            self.verified += 1;
                        } else if !result.has_transient() {
                            self.unhealthy += 1;
                        }
                    }
                    DomainState::DnsPartial => self.partial += 1,
                    DomainState::Pending => self.pending += 1,
                    DomainState::Failed => self.failed += 1,
                    DomainState::Removed => {}
                }
            }
            BindingOutcome::Stale => self.stale_writes += 1,
            BindingOutcome::Error => self.errors += 1,
        }
    }
}

#[derive(Clone)]
pub struct DomainService {
    store: Arc<dyn BindingStore>,
    engine: VerificationEngine,
    directory: Arc<DirectoryIndex>,
    platform: Arc<PlatformConfig>,
    policy: VerificationPolicy,
}

impl DomainService {
    pub fn new(
        store: Arc<dyn BindingStore>,
        engine: VerificationEngine,
        directory: Arc<DirectoryIndex>,
        platform: Arc<PlatformConfig>,
        policy: VerificationPolicy,
    ) -> Self {
        Self {
            store,
            engine,
            directory,
            platform,
            policy,
        }
    }

    pub fn store(&self) -> &Arc<dyn BindingStore> {
        &self.store
    }

    pub fn directory(&self) -> &Arc<DirectoryIndex> {
        &self.directory
    }

    // =========================================================================
    // Tenant actions
    // =========================================================================

    /// Bind a hostname to a tenant and return the DNS records to create.
    ///
    /// Subdomains are trusted and routable immediately. Adding a hostname the
    /// tenant already holds returns the existing binding.
    pub async fn add_domain(
        &self,
        tenant_id: TenantId,
        hostname: &str,
        kind: BindingKind,
    ) -> DomainResult<BindingWithInstructions> {
        let tenant = self.tenant(tenant_id).await?;
        let hostname = validate_hostname(hostname, kind, &self.platform)?;

        if let Some(existing) = self.store.find_live_binding(&hostname).await? {
            if existing.tenant_id == tenant_id && existing.kind == kind {
                return Ok(existing.into());
            }
            return Err(DomainError::HostnameTaken(hostname));
        }

        let has_primary = self
            .store
            .list_tenant_bindings(tenant_id)
            .await?
            .iter()
            .any(|b| b.is_primary && b.state != DomainState::Removed);

        let secrets = new_binding_secrets(&tenant, &self.platform);
        let now = OffsetDateTime::now_utc();
        let trusted = kind == BindingKind::Subdomain;
        let binding = DomainBinding {
            id: BindingId::new(),
            tenant_id,
            hostname: hostname.clone(),
            kind,
            verification_token: secrets.verification_token,
            txt_record_name: secrets.txt_record_name,
            cname_target: secrets.cname_target,
            state: if trusted {
                DomainState::Verified
            } else {
                DomainState::Pending
            },
            is_primary: !has_primary,
            verification_attempts: 0,
            last_messages: Vec::new(),
            version: 0,
            added_at: now,
            pending_since: now,
            verified_at: trusted.then_some(now),
            last_checked_at: None,
            ssl_activated_at: None,
            removed_at: None,
            updated_at: now,
        };

        match self.store.insert_binding(&binding).await {
            Ok(()) => {}
            Err(StoreError::Conflict(constraint)) if constraint.contains("hostname") => {
                return Err(DomainError::HostnameTaken(hostname));
            }
            Err(e) => return Err(e.into()),
        }

        self.directory.apply(&tenant, &binding);
        info!(
            tenant_id = %tenant_id,
            binding_id = %binding.id,
            hostname = %binding.hostname,
            kind = %binding.kind,
            state = %binding.state,
            "Domain added"
        );

        Ok(binding.into())
    }

    pub async fn get_binding(&self, tenant_id: TenantId, id: BindingId) -> DomainResult<DomainBinding> {
        self.owned_binding(tenant_id, id).await
    }

    pub async fn list_bindings(&self, tenant_id: TenantId) -> DomainResult<Vec<DomainBinding>> {
        self.tenant(tenant_id).await?;
        Ok(self.store.list_tenant_bindings(tenant_id).await?)
    }

    /// Tenant-triggered verification. May downgrade a verified binding whose
    /// records are now permanently wrong.
    pub async fn check_verification(&self, tenant_id: TenantId, id: BindingId) -> DomainResult<CheckReport> {
        let binding = self.owned_binding(tenant_id, id).await?;
        if binding.state == DomainState::Removed {
            return Err(DomainError::InvalidTransition {
                from: binding.state,
                action: "verify",
            });
        }

        let (binding, result, _) = self.verify_binding(binding, CheckMode::TenantInitiated).await?;
        Ok(CheckReport { binding, result })
    }

    /// Remove a binding. Its hostname becomes available to other tenants and,
    /// if it was primary, the tenant's oldest remaining binding takes over.
    pub async fn remove_domain(&self, tenant_id: TenantId, id: BindingId) -> DomainResult<DomainBinding> {
        let current = self.owned_binding(tenant_id, id).await?;
        let was_primary = current.is_primary;

        let removed = self
            .update_with(id, |b| Ok(lifecycle::remove(b, OffsetDateTime::now_utc())))
            .await?;
        info!(tenant_id = %tenant_id, binding_id = %id, hostname = %removed.hostname, "Domain removed");

        if was_primary {
            self.promote_next_primary(tenant_id).await?;
        }
        Ok(removed)
    }

    pub async fn set_primary(&self, tenant_id: TenantId, id: BindingId) -> DomainResult<DomainBinding> {
        let binding = self.owned_binding(tenant_id, id).await?;
        if binding.state == DomainState::Removed {
            return Err(DomainError::InvalidTransition {
                from: binding.state,
                action: "make primary",
            });
        }

        self.store.set_primary(tenant_id, id).await?;
        info!(tenant_id = %tenant_id, binding_id = %id, "Primary domain changed");
        self.owned_binding(tenant_id, id).await
    }

    /// Issue fresh secrets and restart verification. The only way out of `Failed`.
    pub async fn resubmit(&self, tenant_id: TenantId, id: BindingId) -> DomainResult<BindingWithInstructions> {
        let tenant = self.tenant(tenant_id).await?;
        self.owned_binding(tenant_id, id).await?;

        let platform = self.platform.clone();
        let binding = self
            .update_with(id, |b| {
                lifecycle::restart(
                    b,
                    new_binding_secrets(&tenant, &platform),
                    OffsetDateTime::now_utc(),
                )
            })
            .await?;

        info!(tenant_id = %tenant_id, binding_id = %id, hostname = %binding.hostname, "Domain resubmitted");
        Ok(binding.into())
    }

    /// Hook for the TLS issuance collaborator: a certificate is live
    pub async fn mark_ssl_active(&self, id: BindingId) -> DomainResult<DomainBinding> {
        let binding = self
            .update_with(id, |b| lifecycle::mark_ssl_active(b, OffsetDateTime::now_utc()))
            .await?;
        info!(binding_id = %id, hostname = %binding.hostname, "SSL active");
        Ok(binding)
    }

    // =========================================================================
    // Scheduled passes
    // =========================================================================

    /// Check every binding still waiting on DNS. Bindings are checked
    /// concurrently and independently; one failure never aborts the pass.
    pub async fn run_verification_pass(&self) -> DomainResult<PassSummary> {
        let started_before = OffsetDateTime::now_utc() - self.policy.propagation_grace;
        let due = self.store.list_awaiting_verification(started_before).await?;
        let summary = self.run_pass(due).await;

        if summary.checked > 0 {
            info!(
                checked = summary.checked,
                verified = summary.verified,
                partial = summary.partial,
                pending = summary.pending,
                failed = summary.failed,
                transient = summary.transient,
                stale_writes = summary.stale_writes,
                errors = summary.errors,
                "Domain verification pass complete"
            );
        }
        Ok(summary)
    }

    /// Lenient re-check of verified custom domains. Never changes state.
    pub async fn run_health_checks(&self) -> DomainResult<PassSummary> {
        let verified = self.store.list_verified().await?;
        let summary = self.run_pass(verified).await;

        if summary.unhealthy > 0 {
            warn!(
                checked = summary.checked,
                unhealthy = summary.unhealthy,
                "Verified domains with broken DNS records"
            );
        } else {
            info!(checked = summary.checked, transient = summary.transient, "Domain health checks complete");
        }
        Ok(summary)
    }

    /// Rebuild the directory from the store
    pub async fn refresh_directory(&self) -> DomainResult<usize> {
        let rows = self.store.list_routable().await?;
        let count = self.directory.replace_all(rows);
        tracing::debug!(entries = count, "Tenant directory refreshed");
        Ok(count)
    }

    async fn run_pass(&self, bindings: Vec<DomainBinding>) -> PassSummary {
        let concurrency = self.policy.concurrency.max(1);
        let outcomes: Vec<BindingOutcome> = stream::iter(bindings)
            .map(|binding| self.verify_scheduled(binding))
            .buffer_unordered(concurrency)
            .collect()
            .await;

        let mut summary = PassSummary::default();
        for outcome in &outcomes {
            summary.record(outcome);
        }
        summary
    }

    async fn verify_scheduled(&self, binding: DomainBinding) -> BindingOutcome {
        let id = binding.id;
        match self.verify_binding(binding, CheckMode::Scheduled).await {
            Ok((_, _, true)) => BindingOutcome::Stale,
            Ok((binding, result, false)) => BindingOutcome::Checked {
                state: binding.state,
                result,
            },
            Err(e) => {
                error!(binding_id = %id, error = %e, "Domain verification failed");
                BindingOutcome::Error
            }
        }
    }

    /// Run DNS checks and persist the resulting transition. The returned flag
    /// is true when a concurrent writer won; the binding is then the fresh copy.
    pub async fn verify_binding(
        &self,
        current: DomainBinding,
        mode: CheckMode,
    ) -> DomainResult<(DomainBinding, VerificationResult, bool)> {
        let result = self.engine.verify(&current).await;
        let next = lifecycle::apply_verification(
            &current,
            &result,
            mode,
            &self.policy,
            OffsetDateTime::now_utc(),
        );

        if next == current {
            return Ok((current, result, false));
        }

        match self.commit(&current, next).await? {
            Some(written) => Ok((written, result, false)),
            None => {
                let fresh = self
                    .store
                    .get_binding(current.id)
                    .await?
                    .ok_or(DomainError::NotFound)?;
                Ok((fresh, result, true))
            }
        }
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn tenant(&self, tenant_id: TenantId) -> DomainResult<Tenant> {
        self.store
            .get_tenant(tenant_id)
            .await?
            .ok_or(DomainError::TenantNotFound)
    }

    async fn owned_binding(&self, tenant_id: TenantId, id: BindingId) -> DomainResult<DomainBinding> {
        match self.store.get_binding(id).await? {
            Some(binding) if binding.tenant_id == tenant_id => Ok(binding),
            _ => Err(DomainError::NotFound),
        }
    }

    /// Apply `change` to the latest stored copy, retrying if another writer
    /// bumps the version in between
    async fn update_with<F>(&self, id: BindingId, mut change: F) -> DomainResult<DomainBinding>
    where
        F: FnMut(&DomainBinding) -> DomainResult<DomainBinding> + Send,
    {
        for _ in 0..MAX_WRITE_ATTEMPTS {
            let current = self.store.get_binding(id).await?.ok_or(DomainError::NotFound)?;
            let next = change(&current)?;
            if next == current {
                return Ok(current);
            }
            if let Some(written) = self.commit(&current, next).await? {
                return Ok(written);
            }
        }
        Err(DomainError::Store(StoreError::Conflict(format!(
            "binding {} kept changing during update",
            id
        ))))
    }

    /// Compare-and-swap `next` over `current`. `None` if `current` is stale.
    async fn commit(&self, current: &DomainBinding, mut next: DomainBinding) -> DomainResult<Option<DomainBinding>> {
        next.version = current.version + 1;
        next.updated_at = OffsetDateTime::now_utc();

        if !self.store.update_if_version(&next, current.version).await? {
            warn!(
                binding_id = %current.id,
                hostname = %current.hostname,
                expected_version = current.version,
                "Stale binding write discarded"
            );
            return Ok(None);
        }

        if current.state != next.state {
            info!(
                binding_id = %next.id,
                hostname = %next.hostname,
                from = %current.state,
                to = %next.state,
                attempts = next.verification_attempts,
                "Domain state changed"
            );
        }
        self.sync_directory(&next).await;
        Ok(Some(next))
    }

    async fn sync_directory(&self, binding: &DomainBinding) {
        match self.store.get_tenant(binding.tenant_id).await {
            Ok(Some(tenant)) => self.directory.apply(&tenant, binding),
            Ok(None) => warn!(tenant_id = %binding.tenant_id, "Binding has no tenant"),
            Err(e) => error!(binding_id = %binding.id, error = %e, "Failed to load tenant for directory update"),
        }
    }

    async fn promote_next_primary(&self, tenant_id: TenantId) -> DomainResult<()> {
        let live: Vec<DomainBinding> = self
            .store
            .list_tenant_bindings(tenant_id)
            .await?
            .into_iter()
            .filter(|b| b.state != DomainState::Removed)
            .collect();

        if live.iter().any(|b| b.is_primary) {
            return Ok(());
        }
        // Oldest routable binding first, otherwise the oldest live one
        let next = live
            .iter()
            .find(|b| b.is_routable())
            .or_else(|| live.first());

        if let Some(next) = next {
            self.store.set_primary(tenant_id, next.id).await?;
            info!(tenant_id = %tenant_id, binding_id = %next.id, hostname = %next.hostname, "Primary domain promoted");
        }
        Ok(())
    }
}
