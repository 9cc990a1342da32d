//! In-memory hostname cache with TTL
//!
//! Memoizes directory lookups (including misses) so that repeated requests
//! for the same host skip the www/no-www probing.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use serde::Serialize;

use nextslot_shared::TenantId;

use super::TenantMatch;

/// Default cache TTL (5 minutes)
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// Cache entry with expiration
#[derive(Clone)]
struct CacheEntry {
    found: Option<TenantMatch>,
    expires_at: Instant,
}

impl CacheEntry {
    fn new(found: Option<TenantMatch>, ttl: Duration) -> Self {
        Self {
            found,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() > self.expires_at
    }
}

/// Thread-safe in-memory hostname cache
pub struct DomainCache {
    /// Maps normalized host -> match (None means host doesn't resolve to any tenant)
    cache: RwLock<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl Default for DomainCache {
    fn default() -> Self {
        Self::new()
    }
}

impl DomainCache {
    /// Create a new cache with default TTL
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_CACHE_TTL)
    }

    /// Create a new cache with custom TTL
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Get the cached result for a host
    /// Returns Some(Some(match)) if found and valid
    /// Returns Some(None) if host was cached as not resolving
    /// Returns None if not in cache or expired
    pub fn get(&self, host: &str) -> Option<Option<TenantMatch>> {
        let cache = self.cache.read().ok()?;
        let entry = cache.get(host)?;

        if entry.is_expired() {
            None
        } else {
            Some(entry.found.clone())
        }
    }

    /// Cache a host lookup result
    pub fn set(&self, host: &str, found: Option<TenantMatch>) {
        if let Ok(mut cache) = self.cache.write() {
            cache.insert(host.to_string(), CacheEntry::new(found, self.ttl));
        }
    }

    /// Invalidate a specific host
    pub fn invalidate(&self, host: &str) {
        if let Ok(mut cache) = self.cache.write() {
            cache.remove(host);
        }
    }

    /// Invalidate all entries resolving to a tenant
    pub fn invalidate_tenant(&self, tenant_id: TenantId) {
        if let Ok(mut cache) = self.cache.write() {
            cache.retain(|_, entry| {
                entry.found.as_ref().map(|m| m.tenant.id) != Some(tenant_id)
            });
        }
    }

    /// Drop everything, e.g. after a full directory reload
    pub fn clear(&self) {
        if let Ok(mut cache) = self.cache.write() {
            cache.clear();
        }
    }

    /// Clear expired entries (call periodically for memory management)
    pub fn cleanup(&self) {
        if let Ok(mut cache) = self.cache.write() {
            cache.retain(|_, entry| !entry.is_expired());
        }
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        if let Ok(cache) = self.cache.read() {
            let total = cache.len();
            let expired = cache.values().filter(|e| e.is_expired()).count();
            CacheStats {
                total_entries: total,
                expired_entries: expired,
                active_entries: total - expired,
            }
        } else {
            CacheStats::default()
        }
    }
}

/// Cache statistics
#[derive(Default, Debug, Clone, Copy, Serialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub expired_entries: usize,
    pub active_entries: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use nextslot_shared::{BindingId, BindingKind, DomainState, Tenant};
    use std::thread::sleep;

    fn tenant_match(slug: &str, hostname: &str) -> TenantMatch {
        TenantMatch {
            tenant: Tenant::new(slug, slug),
            binding_id: BindingId::new(),
            hostname: hostname.to_string(),
            kind: BindingKind::CustomDomain,
            state: DomainState::Verified,
        }
    }

    #[test]
    fn test_cache_get_set() {
        let cache = DomainCache::new();
        let found = tenant_match("ramesh-salon", "rameshsalon.com");

        assert!(cache.get("rameshsalon.com").is_none());

        cache.set("rameshsalon.com", Some(found.clone()));
        assert_eq!(cache.get("rameshsalon.com"), Some(Some(found)));
    }

    #[test]
    fn test_cache_negative() {
        let cache = DomainCache::new();

        cache.set("unknown.example.com", None);
        assert_eq!(cache.get("unknown.example.com"), Some(None));
    }

    #[test]
    fn test_cache_expiration() {
        let cache = DomainCache::with_ttl(Duration::from_millis(50));
        let found = tenant_match("ramesh-salon", "rameshsalon.com");

        cache.set("rameshsalon.com", Some(found.clone()));
        assert_eq!(cache.get("rameshsalon.com"), Some(Some(found)));

        sleep(Duration::from_millis(60));
        assert!(cache.get("rameshsalon.com").is_none());

        cache.cleanup();
        assert_eq!(cache.stats().total_entries, 0);
    }

    #[test]
    fn test_cache_invalidate_tenant() {
        let cache = DomainCache::new();
        let a = tenant_match("ramesh-salon", "rameshsalon.com");
        let mut a_www = a.clone();
        a_www.hostname = "www.rameshsalon.com".to_string();
        let other = tenant_match("okmentor", "okmentor.in");

        cache.set("rameshsalon.com", Some(a.clone()));
        cache.set("www.rameshsalon.com", Some(a_www));
        cache.set("okmentor.in", Some(other.clone()));
        cache.set("nobody.example", None);

        cache.invalidate_tenant(a.tenant.id);

        assert!(cache.get("rameshsalon.com").is_none());
        assert!(cache.get("www.rameshsalon.com").is_none());
        assert_eq!(cache.get("okmentor.in"), Some(Some(other)));
        assert_eq!(cache.get("nobody.example"), Some(None));
        assert_eq!(cache.stats().active_entries, 2);
    }
}
