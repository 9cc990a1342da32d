//! Postgres-backed binding store

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use nextslot_shared::{BindingId, DomainBinding, Tenant, TenantId};

use super::store::BindingStore;
use super::StoreError;

const BINDING_COLUMNS: &str = r#"
    id, tenant_id, hostname, kind, verification_token, txt_record_name, cname_target,
    state, is_primary, verification_attempts, last_messages, version,
    added_at, pending_since, verified_at, last_checked_at, ssl_activated_at, removed_at, updated_at
"#;

const ROUTABLE: &str =
    "(state IN ('verified', 'ssl_active') OR (kind = 'subdomain' AND state IN ('pending', 'dns_partial')))";

pub struct PgBindingStore {
    pool: PgPool,
}

impl PgBindingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl BindingStore for PgBindingStore {
    async fn get_tenant(&self, id: TenantId) -> Result<Option<Tenant>, StoreError> {
        let tenant = sqlx::query_as::<_, Tenant>(
            "SELECT id, slug, business_name, is_active FROM tenants WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(tenant)
    }

    async fn upsert_tenant(&self, tenant: &Tenant) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO tenants (id, slug, business_name, is_active)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE
            SET slug = EXCLUDED.slug,
                business_name = EXCLUDED.business_name,
                is_active = EXCLUDED.is_active
            "#,
        )
        .bind(tenant.id)
        .bind(&tenant.slug)
        .bind(&tenant.business_name)
        .bind(tenant.is_active)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_binding(&self, id: BindingId) -> Result<Option<DomainBinding>, StoreError> {
        let binding = sqlx::query_as::<_, DomainBinding>(&format!(
            "SELECT {} FROM domain_bindings WHERE id = $1",
            BINDING_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(binding)
    }

    async fn find_live_binding(&self, hostname: &str) -> Result<Option<DomainBinding>, StoreError> {
        let binding = sqlx::query_as::<_, DomainBinding>(&format!(
            "SELECT {} FROM domain_bindings WHERE lower(hostname) = lower($1) AND state <> 'removed'",
            BINDING_COLUMNS
        ))
        .bind(hostname)
        .fetch_optional(&self.pool)
        .await?;
        Ok(binding)
    }

    async fn list_tenant_bindings(&self, tenant_id: TenantId) -> Result<Vec<DomainBinding>, StoreError> {
        let bindings = sqlx::query_as::<_, DomainBinding>(&format!(
            "SELECT {} FROM domain_bindings WHERE tenant_id = $1 ORDER BY added_at ASC, hostname ASC",
            BINDING_COLUMNS
        ))
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(bindings)
    }

    async fn list_awaiting_verification(
        &self,
        started_before: OffsetDateTime,
    ) -> Result<Vec<DomainBinding>, StoreError> {
        let bindings = sqlx::query_as::<_, DomainBinding>(&format!(
            r#"
            SELECT {} FROM domain_bindings
            WHERE state IN ('pending', 'dns_partial') AND pending_since <= $1
            ORDER BY pending_since ASC
            "#,
            BINDING_COLUMNS
        ))
        .bind(started_before)
        .fetch_all(&self.pool)
        .await?;
        Ok(bindings)
    }

    async fn list_verified(&self) -> Result<Vec<DomainBinding>, StoreError> {
        let bindings = sqlx::query_as::<_, DomainBinding>(&format!(
            r#"
            SELECT {} FROM domain_bindings
            WHERE state IN ('verified', 'ssl_active') AND kind = 'custom_domain'
            ORDER BY last_checked_at ASC NULLS FIRST
            "#,
            BINDING_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(bindings)
    }

    async fn list_routable(&self) -> Result<Vec<(Tenant, DomainBinding)>, StoreError> {
        let bindings = sqlx::query_as::<_, DomainBinding>(&format!(
            "SELECT {} FROM domain_bindings WHERE {}",
            BINDING_COLUMNS, ROUTABLE
        ))
        .fetch_all(&self.pool)
        .await?;

        let tenant_ids: Vec<Uuid> = bindings.iter().map(|b| b.tenant_id.0).collect();
        let tenants: HashMap<TenantId, Tenant> = sqlx::query_as::<_, Tenant>(
            "SELECT id, slug, business_name, is_active FROM tenants WHERE id = ANY($1)",
        )
        .bind(&tenant_ids)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|t| (t.id, t))
        .collect();

        Ok(bindings
            .into_iter()
            .filter_map(|b| tenants.get(&b.tenant_id).map(|t| (t.clone(), b)))
            .collect())
    }

    async fn insert_binding(&self, binding: &DomainBinding) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO domain_bindings (
                id, tenant_id, hostname, kind, verification_token, txt_record_name, cname_target,
                state, is_primary, verification_attempts, last_messages, version,
                added_at, pending_since, verified_at, last_checked_at, ssl_activated_at, removed_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
            "#,
        )
        .bind(binding.id)
        .bind(binding.tenant_id)
        .bind(&binding.hostname)
        .bind(binding.kind)
        .bind(&binding.verification_token)
        .bind(&binding.txt_record_name)
        .bind(&binding.cname_target)
        .bind(binding.state)
        .bind(binding.is_primary)
        .bind(binding.verification_attempts)
        .bind(&binding.last_messages)
        .bind(binding.version)
        .bind(binding.added_at)
        .bind(binding.pending_since)
        .bind(binding.verified_at)
        .bind(binding.last_checked_at)
        .bind(binding.ssl_activated_at)
        .bind(binding.removed_at)
        .bind(binding.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_if_version(
        &self,
        binding: &DomainBinding,
        expected_version: i64,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE domain_bindings
            SET verification_token = $3,
                txt_record_name = $4,
                cname_target = $5,
                state = $6,
                is_primary = $7,
                verification_attempts = $8,
                last_messages = $9,
                version = $10,
                pending_since = $11,
                verified_at = $12,
                last_checked_at = $13,
                ssl_activated_at = $14,
                removed_at = $15,
                updated_at = $16
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(binding.id)
        .bind(expected_version)
        .bind(&binding.verification_token)
        .bind(&binding.txt_record_name)
        .bind(&binding.cname_target)
        .bind(binding.state)
        .bind(binding.is_primary)
        .bind(binding.verification_attempts)
        .bind(&binding.last_messages)
        .bind(binding.version)
        .bind(binding.pending_since)
        .bind(binding.verified_at)
        .bind(binding.last_checked_at)
        .bind(binding.ssl_activated_at)
        .bind(binding.removed_at)
        .bind(binding.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }

        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM domain_bindings WHERE id = $1)")
                .bind(binding.id)
                .fetch_one(&self.pool)
                .await?;
        if exists {
            Ok(false)
        } else {
            Err(StoreError::NotFound)
        }
    }

    async fn set_primary(&self, tenant_id: TenantId, binding_id: BindingId) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        let target: Option<bool> = sqlx::query_scalar(
            r#"
            SELECT is_primary FROM domain_bindings
            WHERE id = $1 AND tenant_id = $2 AND state <> 'removed'
            FOR UPDATE
            "#,
        )
        .bind(binding_id)
        .bind(tenant_id)
        .fetch_optional(&mut *tx)
        .await?;

        match target {
            None => return Err(StoreError::NotFound),
            Some(true) => return Ok(()),
            Some(false) => {}
        }

        // Clear first so the one-primary index never sees two flags
        sqlx::query(
            r#"
            UPDATE domain_bindings
            SET is_primary = FALSE, version = version + 1, updated_at = NOW()
            WHERE tenant_id = $1 AND is_primary AND id <> $2
            "#,
        )
        .bind(tenant_id)
        .bind(binding_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE domain_bindings
            SET is_primary = TRUE, version = version + 1, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(binding_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}
