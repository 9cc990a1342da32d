//! Binding persistence
//!
//! Every state change goes through [`BindingStore::update_if_version`], a
//! compare-and-swap on the binding's `version`. A slower verification pass can
//! therefore never overwrite a newer result.

use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use nextslot_shared::{BindingId, BindingKind, DomainBinding, DomainState, Tenant, TenantId};

use super::StoreError;

#[async_trait]
pub trait BindingStore: Send + Sync {
    async fn get_tenant(&self, id: TenantId) -> Result<Option<Tenant>, StoreError>;

    async fn upsert_tenant(&self, tenant: &Tenant) -> Result<(), StoreError>;

    async fn get_binding(&self, id: BindingId) -> Result<Option<DomainBinding>, StoreError>;

    /// The non-removed binding holding `hostname`, if any
    async fn find_live_binding(&self, hostname: &str) -> Result<Option<DomainBinding>, StoreError>;

    /// All of a tenant's bindings, oldest first
    async fn list_tenant_bindings(&self, tenant_id: TenantId) -> Result<Vec<DomainBinding>, StoreError>;

    /// Pending/DnsPartial bindings whose current cycle started before `started_before`
    async fn list_awaiting_verification(
        &self,
        started_before: OffsetDateTime,
    ) -> Result<Vec<DomainBinding>, StoreError>;

    /// Verified/SslActive custom domain bindings, for health checks
    async fn list_verified(&self) -> Result<Vec<DomainBinding>, StoreError>;

    /// Snapshot of routable bindings with their tenants, for the directory
    async fn list_routable(&self) -> Result<Vec<(Tenant, DomainBinding)>, StoreError>;

    /// Insert a new binding. `Conflict` when the hostname is held by a live binding.
    async fn insert_binding(&self, binding: &DomainBinding) -> Result<(), StoreError>;

    /// Write `binding` only if the stored version still equals `expected_version`.
    /// Returns `false` when another writer got there first.
    async fn update_if_version(
        &self,
        binding: &DomainBinding,
        expected_version: i64,
    ) -> Result<bool, StoreError>;

    /// Move the primary flag to `binding_id` among the tenant's live bindings
    async fn set_primary(&self, tenant_id: TenantId, binding_id: BindingId) -> Result<(), StoreError>;
}

#[derive(Default)]
struct MemoryInner {
    tenants: HashMap<TenantId, Tenant>,
    bindings: HashMap<BindingId, DomainBinding>,
}

/// In-process store for tests and database-less runs
#[derive(Default)]
pub struct MemoryBindingStore {
    inner: RwLock<MemoryInner>,
}

impl MemoryBindingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn is_live(binding: &DomainBinding) -> bool {
    binding.state != DomainState::Removed
}

fn sorted(mut bindings: Vec<DomainBinding>) -> Vec<DomainBinding> {
    bindings.sort_by(|a, b| a.added_at.cmp(&b.added_at).then(a.hostname.cmp(&b.hostname)));
    bindings
}

#[async_trait]
impl BindingStore for MemoryBindingStore {
    async fn get_tenant(&self, id: TenantId) -> Result<Option<Tenant>, StoreError> {
        Ok(self.inner.read().await.tenants.get(&id).cloned())
    }

    async fn upsert_tenant(&self, tenant: &Tenant) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let slug_taken = inner
            .tenants
            .values()
            .any(|t| t.id != tenant.id && t.slug == tenant.slug);
        if slug_taken {
            return Err(StoreError::Conflict("tenants_slug_key".to_string()));
        }
        inner.tenants.insert(tenant.id, tenant.clone());
        Ok(())
    }

    async fn get_binding(&self, id: BindingId) -> Result<Option<DomainBinding>, StoreError> {
        Ok(self.inner.read().await.bindings.get(&id).cloned())
    }

    async fn find_live_binding(&self, hostname: &str) -> Result<Option<DomainBinding>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .bindings
            .values()
            .find(|b| is_live(b) && b.hostname.eq_ignore_ascii_case(hostname))
            .cloned())
    }

    async fn list_tenant_bindings(&self, tenant_id: TenantId) -> Result<Vec<DomainBinding>, StoreError> {
        let inner = self.inner.read().await;
        Ok(sorted(
            inner
                .bindings
                .values()
                .filter(|b| b.tenant_id == tenant_id)
                .cloned()
                .collect(),
        ))
    }

    async fn list_awaiting_verification(
        &self,
        started_before: OffsetDateTime,
    ) -> Result<Vec<DomainBinding>, StoreError> {
        let inner = self.inner.read().await;
        Ok(sorted(
            inner
                .bindings
                .values()
                .filter(|b| b.state.is_awaiting_dns() && b.pending_since <= started_before)
                .cloned()
                .collect(),
        ))
    }

    async fn list_verified(&self) -> Result<Vec<DomainBinding>, StoreError> {
        let inner = self.inner.read().await;
        Ok(sorted(
            inner
                .bindings
                .values()
                .filter(|b| b.state.is_routable() && b.kind == BindingKind::CustomDomain)
                .cloned()
                .collect(),
        ))
    }

    async fn list_routable(&self) -> Result<Vec<(Tenant, DomainBinding)>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .bindings
            .values()
            .filter(|b| b.is_routable())
            .filter_map(|b| {
                inner
                    .tenants
                    .get(&b.tenant_id)
                    .map(|t| (t.clone(), b.clone()))
            })
            .collect())
    }

    async fn insert_binding(&self, binding: &DomainBinding) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;

        if !inner.tenants.contains_key(&binding.tenant_id) {
            return Err(StoreError::NotFound);
        }
        for existing in inner.bindings.values().filter(|b| is_live(b)) {
            if existing.hostname.eq_ignore_ascii_case(&binding.hostname) {
                return Err(StoreError::Conflict("domain_bindings_live_hostname".to_string()));
            }
            if binding.is_primary && existing.is_primary && existing.tenant_id == binding.tenant_id {
                return Err(StoreError::Conflict("domain_bindings_one_primary".to_string()));
            }
        }
        if inner
            .bindings
            .values()
            .any(|b| b.verification_token == binding.verification_token)
        {
            return Err(StoreError::Conflict("domain_bindings_token".to_string()));
        }

        inner.bindings.insert(binding.id, binding.clone());
        Ok(())
    }

    async fn update_if_version(
        &self,
        binding: &DomainBinding,
        expected_version: i64,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        let stored = inner.bindings.get_mut(&binding.id).ok_or(StoreError::NotFound)?;
        if stored.version != expected_version {
            return Ok(false);
        }
        *stored = binding.clone();
        Ok(true)
    }

    async fn set_primary(&self, tenant_id: TenantId, binding_id: BindingId) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let eligible = inner
            .bindings
            .get(&binding_id)
            .is_some_and(|b| b.tenant_id == tenant_id && is_live(b));
        if !eligible {
            return Err(StoreError::NotFound);
        }

        let now = OffsetDateTime::now_utc();
        for binding in inner.bindings.values_mut().filter(|b| b.tenant_id == tenant_id) {
            let primary = binding.id == binding_id;
            if binding.is_primary != primary {
                binding.is_primary = primary;
                binding.version += 1;
                binding.updated_at = now;
            }
        }
        Ok(())
    }
}
