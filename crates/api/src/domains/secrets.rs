//! Verification secrets for new bindings

use rand::{distributions::Alphanumeric, rngs::OsRng, Rng};
use serde::Serialize;

use nextslot_shared::Tenant;

use crate::config::PlatformConfig;

/// Label prefix of the per-tenant verification TXT record
pub const TXT_RECORD_PREFIX: &str = "_bv-";

/// Length of the alphanumeric verification token (~190 bits of entropy)
pub const TOKEN_LENGTH: usize = 32;

/// Values a tenant must publish in DNS to prove control of a hostname
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BindingSecrets {
    pub verification_token: String,
    pub txt_record_name: String,
    pub cname_target: String,
}

/// Generate fresh secrets for a binding attempt.
///
/// The token is new on every call; the TXT record name and CNAME target are
/// deterministic for a tenant.
pub fn new_binding_secrets(tenant: &Tenant, platform: &PlatformConfig) -> BindingSecrets {
    BindingSecrets {
        verification_token: generate_verification_token(),
        txt_record_name: txt_record_name(tenant),
        cname_target: platform.ingress_host.clone(),
    }
}

/// Generate a secure verification token from the OS random source
pub fn generate_verification_token() -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

/// Tenant-unique TXT record label, e.g. `_bv-ramesh-salon`
pub fn txt_record_name(tenant: &Tenant) -> String {
    format!("{}{}", TXT_RECORD_PREFIX, tenant.dns_key())
}
