//! Common types used across NextSlot

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::SharedError;

// =============================================================================
// ID Wrappers
// =============================================================================

/// Tenant (service provider) ID wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct TenantId(pub Uuid);

impl TenantId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TenantId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for TenantId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for TenantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Domain binding ID wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct BindingId(pub Uuid);

impl BindingId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for BindingId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for BindingId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for BindingId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

// =============================================================================
// Enums
// =============================================================================

/// How a hostname is owned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BindingKind {
    /// `<label>.<base domain>`, platform owned and trusted without DNS checks
    Subdomain,
    /// Externally owned hostname that must pass DNS ownership verification
    CustomDomain,
}

impl BindingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Subdomain => "subdomain",
            Self::CustomDomain => "custom_domain",
        }
    }
}

impl std::fmt::Display for BindingKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BindingKind {
    type Err = SharedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "subdomain" => Ok(Self::Subdomain),
            "custom_domain" | "custom" | "domain" => Ok(Self::CustomDomain),
            _ => Err(SharedError::Validation(format!("Invalid binding kind: {}", s))),
        }
    }
}

/// Lifecycle state of a domain binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DomainState {
    Pending,
    DnsPartial,
    Verified,
    SslActive,
    Failed,
    Removed,
}

impl Default for DomainState {
    fn default() -> Self {
        Self::Pending
    }
}

impl DomainState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::DnsPartial => "dns_partial",
            Self::Verified => "verified",
            Self::SslActive => "ssl_active",
            Self::Failed => "failed",
            Self::Removed => "removed",
        }
    }

    /// Verified states are the only ones allowed to route traffic
    pub fn is_routable(&self) -> bool {
        matches!(self, Self::Verified | Self::SslActive)
    }

    /// Still waiting on the tenant's DNS changes
    pub fn is_awaiting_dns(&self) -> bool {
        matches!(self, Self::Pending | Self::DnsPartial)
    }
}

impl std::fmt::Display for DomainState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DomainState {
    type Err = SharedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "dns_partial" => Ok(Self::DnsPartial),
            "verified" => Ok(Self::Verified),
            "ssl_active" => Ok(Self::SslActive),
            "failed" => Ok(Self::Failed),
            "removed" => Ok(Self::Removed),
            _ => Err(SharedError::Validation(format!("Invalid domain state: {}", s))),
        }
    }
}

// =============================================================================
// Database Models
// =============================================================================

const FALLBACK_KEY_PREFIX: &str = "provider-";

/// Service provider account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Tenant {
    pub id: TenantId,
    /// Unique public booking slug (the `booking_url`)
    pub slug: String,
    pub business_name: String,
    pub is_active: bool,
}

impl Tenant {
    pub fn new(slug: impl Into<String>, business_name: impl Into<String>) -> Self {
        Self {
            id: TenantId::new(),
            slug: slug.into(),
            business_name: business_name.into(),
            is_active: true,
        }
    }

    /// DNS-safe key unique to this tenant.
    ///
    /// Uses the slug only when it already is a lowercase DNS label, byte for
    /// byte. Anything else (whitespace, case, punctuation, or a slug that looks
    /// like a fallback key) maps to an id-derived value, so two distinct slugs
    /// never share a key.
    pub fn dns_key(&self) -> String {
        let slug: String = self
            .slug
            .to_ascii_lowercase()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
            .collect();
        let slug = slug.trim_matches('-');

        if slug.is_empty()
            || slug.len() > 48
            || slug != self.slug
            || slug.starts_with(FALLBACK_KEY_PREFIX)
        {
            format!("{}{}", FALLBACK_KEY_PREFIX, self.id.0.simple())
        } else {
            slug.to_string()
        }
    }
}

/// Association of one hostname with one tenant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct DomainBinding {
    pub id: BindingId,
    pub tenant_id: TenantId,
    /// Lowercase FQDN without trailing dot
    pub hostname: String,
    pub kind: BindingKind,
    pub verification_token: String,
    /// Label prefix of the TXT record, e.g. `_bv-ramesh-salon`
    pub txt_record_name: String,
    pub cname_target: String,
    pub state: DomainState,
    pub is_primary: bool,
    pub verification_attempts: i32,
    /// Diagnostics from the most recent verification pass
    pub last_messages: Vec<String>,
    /// Bumped on every write; used for compare-and-swap updates
    pub version: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub added_at: OffsetDateTime,
    /// Start of the current verification cycle; bounds how long a binding may stay pending
    #[serde(with = "time::serde::rfc3339")]
    pub pending_since: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub verified_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_checked_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub ssl_activated_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub removed_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl DomainBinding {
    /// Whether this binding may resolve requests to its tenant
    pub fn is_routable(&self) -> bool {
        match self.state {
            DomainState::Verified | DomainState::SslActive => true,
            DomainState::Removed | DomainState::Failed => false,
            DomainState::Pending | DomainState::DnsPartial => self.kind == BindingKind::Subdomain,
        }
    }

    /// Hostname with a leading `www.` removed
    pub fn apex(&self) -> &str {
        self.hostname.strip_prefix("www.").unwrap_or(&self.hostname)
    }

    /// Fully-qualified name the verification TXT record must be published under
    pub fn txt_lookup_name(&self) -> String {
        format!("{}.{}", self.txt_record_name, self.apex())
    }
}
