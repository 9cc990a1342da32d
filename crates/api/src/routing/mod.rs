//! Host-based routing for tenant booking sites
//!
//! This module handles resolving incoming Host headers to tenants,
//! enabling tenant-specific URLs like:
//! - Platform subdomains: ramesh-salon.nextslot.in
//! - Custom domains: okmentor.in, www.rameshsalon.com

mod cache;
mod directory;
mod host_resolver;
mod middleware;

pub use cache::{CacheStats, DomainCache};
pub use directory::{DirectoryIndex, TenantDirectory, TenantMatch};
pub use host_resolver::{
    normalize_host, HostResolver, RedirectKind, RequestTarget, RoutingAction, RoutingDecision,
};
pub use middleware::{host_routing_middleware, is_excluded_path, routing_decision};
