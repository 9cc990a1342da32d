//! Host-to-Tenant Resolution
//!
//! Turns an inbound request's Host header into a [`RoutingDecision`]:
//! - Platform hosts (base domain, ingress host, IPs, localhost) pass through untouched
//! - Tenant subdomains: ramesh-salon.nextslot.in -> tenant by subdomain binding
//! - Custom domains: okmentor.in -> tenant by verified custom domain binding
//!
//! Resolution is synchronous and only consults the in-memory directory.

use std::sync::Arc;

use crate::config::PlatformConfig;

use super::{TenantDirectory, TenantMatch};

/// What the web layer needs to know about an inbound request
#[derive(Debug, Clone, Copy)]
pub struct RequestTarget<'a> {
    /// Raw Host header, possibly with a port
    pub host: &'a str,
    /// Request path including the query string, e.g. `/book?service=3`
    pub path_and_query: &'a str,
    /// Whether the request arrived over TLS (directly or via a terminating proxy)
    pub is_tls: bool,
}

/// Status class of a redirect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectKind {
    Permanent,
    Temporary,
}

/// How the web layer should handle the request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingAction {
    /// Continue with normal handling (tenant context attached when present)
    Passthrough,
    /// Root of a tenant host; send the visitor to the tenant's booking page
    RedirectToCanonicalSlug { location: String },
    /// Tenant host reached over plaintext; same URL over HTTPS
    RedirectToHttps { location: String },
    /// External host with no routable binding
    NoMatch,
}

impl RoutingAction {
    /// Redirect target and status class, if this action is a redirect
    pub fn redirect(&self) -> Option<(&str, RedirectKind)> {
        match self {
            Self::RedirectToHttps { location } => Some((location, RedirectKind::Permanent)),
            Self::RedirectToCanonicalSlug { location } => {
                Some((location, RedirectKind::Temporary))
            }
            Self::Passthrough | Self::NoMatch => None,
        }
    }
}

/// Result of resolving one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingDecision {
    pub tenant: Option<TenantMatch>,
    pub action: RoutingAction,
}

impl RoutingDecision {
    fn platform() -> Self {
        Self {
            tenant: None,
            action: RoutingAction::Passthrough,
        }
    }

    fn no_match() -> Self {
        Self {
            tenant: None,
            action: RoutingAction::NoMatch,
        }
    }
}

/// Host resolver over an injected directory and platform configuration
#[derive(Clone)]
pub struct HostResolver {
    directory: Arc<dyn TenantDirectory>,
    platform: Arc<PlatformConfig>,
}

impl HostResolver {
    pub fn new(directory: Arc<dyn TenantDirectory>, platform: Arc<PlatformConfig>) -> Self {
        Self {
            directory,
            platform,
        }
    }

    pub fn platform(&self) -> &PlatformConfig {
        &self.platform
    }

    /// Resolve a request to a routing decision. Unknown hosts are a normal
    /// `NoMatch` outcome, never an error.
    pub fn resolve(&self, request: &RequestTarget<'_>) -> RoutingDecision {
        let host = normalize_host(request.host);

        // Never treat the platform's own names as tenant domains
        if host.is_empty() || self.platform.is_platform_host(&host) {
            return RoutingDecision::platform();
        }

        let Some(found) = self.directory.find_by_hostname(&host) else {
            tracing::debug!(host = %host, "No tenant bound to host");
            return RoutingDecision::no_match();
        };

        let path_and_query = if request.path_and_query.is_empty() {
            "/"
        } else {
            request.path_and_query
        };

        if self.platform.force_https && found.is_https_capable() && !request.is_tls {
            return RoutingDecision {
                action: RoutingAction::RedirectToHttps {
                    location: format!("https://{}{}", host, path_and_query),
                },
                tenant: Some(found),
            };
        }

        let (path, query) = match path_and_query.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (path_and_query, None),
        };

        if path == "/" {
            let mut location = self.platform.booking_path(&found.tenant.slug);
            if let Some(query) = query {
                location.push('?');
                location.push_str(query);
            }
            return RoutingDecision {
                action: RoutingAction::RedirectToCanonicalSlug { location },
                tenant: Some(found),
            };
        }

        RoutingDecision {
            tenant: Some(found),
            action: RoutingAction::Passthrough,
        }
    }
}

/// Normalize a host header value: lowercase, no port, no trailing dot
pub fn normalize_host(host: &str) -> String {
    let host = host.trim();
    let host = if let Some(rest) = host.strip_prefix('[') {
        // IPv6 literal, keep the brackets and drop any port
        match rest.split_once(']') {
            Some((addr, _)) => format!("[{}]", addr),
            None => host.to_string(),
        }
    } else {
        host.split(':').next().unwrap_or(host).to_string()
    };
    host.trim_end_matches('.').to_lowercase()
}
