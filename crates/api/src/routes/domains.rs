//! Custom domain routes
//!
//! Tenant-facing control surface for binding hostnames to a booking site.
//! The calling tenant is identified by the `X-Tenant-Id` header.

use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Path, State},
    http::{request::Parts, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use uuid::Uuid;

use nextslot_shared::{BindingId, BindingKind, DomainBinding, TenantId};

use crate::{
    domains::{BindingWithInstructions, CheckReport},
    error::{ApiError, ApiResult},
    state::AppState,
};

// ============================================================================
// Types
// ============================================================================

pub const TENANT_HEADER: &str = "x-tenant-id";

/// Tenant on whose behalf the request is made
#[derive(Debug, Clone, Copy)]
pub struct TenantHeader(pub TenantId);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for TenantHeader {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(TENANT_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or(ApiError::Unauthorized)?;
        let id = Uuid::parse_str(raw.trim())
            .map_err(|_| ApiError::BadRequest(format!("{} must be a UUID", TENANT_HEADER)))?;
        Ok(Self(TenantId(id)))
    }
}

pub const INTERNAL_TOKEN_HEADER: &str = "x-internal-token";

/// Caller holding the internal API token (certificate issuer and other
/// in-cluster services)
#[derive(Debug, Clone, Copy)]
pub struct InternalCaller;

#[async_trait]
impl FromRequestParts<AppState> for InternalCaller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let expected = state.internal_token.as_deref().ok_or(ApiError::Forbidden)?;
        let presented = parts
            .headers
            .get(INTERNAL_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or(ApiError::Forbidden)?;
        if tokens_match(presented, expected) {
            Ok(Self)
        } else {
            tracing::warn!(path = %parts.uri.path(), "Rejected internal call with a bad token");
            Err(ApiError::Forbidden)
        }
    }
}

/// Constant-time token comparison
fn tokens_match(presented: &str, expected: &str) -> bool {
    if presented.len() != expected.len() {
        let dummy = vec![0u8; presented.len()];
        let _ = presented.as_bytes().ct_eq(&dummy);
        return false;
    }
    presented.as_bytes().ct_eq(expected.as_bytes()).into()
}

#[derive(Debug, Deserialize)]
pub struct CreateDomainRequest {
    pub hostname: String,
    /// `subdomain` or `custom_domain` (default)
    #[serde(default)]
    pub kind: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ListDomainsResponse {
    pub domains: Vec<DomainBinding>,
}

// ============================================================================
// Route handlers
// ============================================================================

/// List the tenant's domains, including removed ones
pub async fn list_domains(
    State(state): State<AppState>,
    TenantHeader(tenant_id): TenantHeader,
) -> ApiResult<Json<ListDomainsResponse>> {
    let domains = state.domains.list_bindings(tenant_id).await?;
    Ok(Json(ListDomainsResponse { domains }))
}

/// Add a domain and return the DNS records the tenant must create
pub async fn create_domain(
    State(state): State<AppState>,
    TenantHeader(tenant_id): TenantHeader,
    Json(req): Json<CreateDomainRequest>,
) -> ApiResult<(StatusCode, Json<BindingWithInstructions>)> {
    let kind = match req.kind.as_deref() {
        Some(kind) => kind.parse::<BindingKind>()?,
        None => BindingKind::CustomDomain,
    };

    let added = state.domains.add_domain(tenant_id, &req.hostname, kind).await?;
    Ok((StatusCode::CREATED, Json(added)))
}

/// Current state, attempts and last diagnostics of a domain
pub async fn get_domain(
    State(state): State<AppState>,
    TenantHeader(tenant_id): TenantHeader,
    Path(domain_id): Path<Uuid>,
) -> ApiResult<Json<BindingWithInstructions>> {
    let binding = state
        .domains
        .get_binding(tenant_id, BindingId::from(domain_id))
        .await?;
    Ok(Json(binding.into()))
}

/// Trigger DNS verification for a domain
pub async fn verify_domain(
    State(state): State<AppState>,
    TenantHeader(tenant_id): TenantHeader,
    Path(domain_id): Path<Uuid>,
) -> ApiResult<Json<CheckReport>> {
    let report = state
        .domains
        .check_verification(tenant_id, BindingId::from(domain_id))
        .await?;
    Ok(Json(report))
}

pub async fn set_primary(
    State(state): State<AppState>,
    TenantHeader(tenant_id): TenantHeader,
    Path(domain_id): Path<Uuid>,
) -> ApiResult<Json<DomainBinding>> {
    let binding = state
        .domains
        .set_primary(tenant_id, BindingId::from(domain_id))
        .await?;
    Ok(Json(binding))
}

/// New verification code and a fresh verification cycle
pub async fn resubmit_domain(
    State(state): State<AppState>,
    TenantHeader(tenant_id): TenantHeader,
    Path(domain_id): Path<Uuid>,
) -> ApiResult<Json<BindingWithInstructions>> {
    let binding = state
        .domains
        .resubmit(tenant_id, BindingId::from(domain_id))
        .await?;
    Ok(Json(binding))
}

/// Remove a domain. The record is kept for audit.
pub async fn delete_domain(
    State(state): State<AppState>,
    TenantHeader(tenant_id): TenantHeader,
    Path(domain_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state
        .domains
        .remove_domain(tenant_id, BindingId::from(domain_id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Called by the TLS issuance side once a certificate is live
pub async fn mark_ssl_active(
    _caller: InternalCaller,
    State(state): State<AppState>,
    Path(domain_id): Path<Uuid>,
) -> ApiResult<Json<DomainBinding>> {
    let binding = state.domains.mark_ssl_active(BindingId::from(domain_id)).await?;
    Ok(Json(binding))
}
