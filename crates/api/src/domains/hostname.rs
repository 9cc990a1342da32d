//! Hostname validation for new bindings

use nextslot_shared::BindingKind;

use crate::config::{PlatformConfig, RESERVED_LABELS};

use super::{DomainError, DomainResult};

/// Validate a requested hostname and return its normalized form.
///
/// Subdomains must be `<label>.<base_domain>`; custom domains must be a
/// well-formed FQDN outside the platform's own namespace.
pub fn validate_hostname(
    raw: &str,
    kind: BindingKind,
    platform: &PlatformConfig,
) -> DomainResult<String> {
    let hostname = raw.trim().trim_end_matches('.').to_lowercase();
    check_fqdn(&hostname)?;

    if platform.is_platform_host(&hostname) {
        return Err(DomainError::ReservedHostname(hostname));
    }

    match kind {
        BindingKind::Subdomain => {
            let label = platform.subdomain_label(&hostname).ok_or_else(|| {
                DomainError::InvalidSubdomainLabel(
                    hostname.clone(),
                    "must be a single label directly under the platform domain",
                )
            })?;
            validate_subdomain_label(label)?;
        }
        BindingKind::CustomDomain => {
            if platform.is_under_base_domain(&hostname) {
                return Err(DomainError::ReservedHostname(hostname));
            }
        }
    }

    Ok(hostname)
}

/// Validate a platform subdomain label
pub fn validate_subdomain_label(label: &str) -> DomainResult<()> {
    let invalid = |reason| Err(DomainError::InvalidSubdomainLabel(label.to_string(), reason));

    if label.len() < 3 || label.len() > 63 {
        return invalid("must be 3-63 characters");
    }
    if !label.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-') {
        return invalid("only lowercase letters, digits and hyphens are allowed");
    }
    if label.starts_with('-') || label.ends_with('-') {
        return invalid("must not start or end with a hyphen");
    }
    if RESERVED_LABELS.contains(&label) {
        return invalid("is reserved");
    }
    Ok(())
}

fn check_fqdn(hostname: &str) -> DomainResult<()> {
    let invalid = |reason| Err(DomainError::InvalidHostname(hostname.to_string(), reason));

    if hostname.is_empty() || hostname.len() > 253 {
        return invalid("must be 1-253 characters");
    }

    let labels: Vec<&str> = hostname.split('.').collect();
    if labels.len() < 2 {
        return invalid("must contain at least one dot");
    }

    for label in labels {
        if label.is_empty() || label.len() > 63 {
            return invalid("each label must be 1-63 characters");
        }
        if label.starts_with('-') || label.ends_with('-') {
            return invalid("labels must not start or end with a hyphen");
        }
        if !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return invalid("only letters, digits and hyphens are allowed");
        }
    }
    Ok(())
}
