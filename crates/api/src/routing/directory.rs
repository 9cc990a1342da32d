//! Tenant Directory
//!
//! Read-mostly hostname index used on the request path. The index only holds
//! routable bindings; pending or failed domains never resolve to a tenant.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use nextslot_shared::{BindingId, BindingKind, DomainBinding, DomainState, Tenant};

use super::DomainCache;

/// A hostname lookup hit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantMatch {
    pub tenant: Tenant,
    pub binding_id: BindingId,
    /// The bound hostname that matched (may differ from the request host by `www.`)
    pub hostname: String,
    pub kind: BindingKind,
    pub state: DomainState,
}

impl TenantMatch {
    /// Verified bindings are served over TLS (platform wildcard or issued certificate)
    pub fn is_https_capable(&self) -> bool {
        self.state.is_routable()
    }
}

/// Hostname to tenant lookup
pub trait TenantDirectory: Send + Sync {
    /// Case-insensitive lookup that also tries the www/no-www variants.
    /// Never touches the network.
    fn find_by_hostname(&self, hostname: &str) -> Option<TenantMatch>;
}

/// In-memory directory, rebuilt from the binding store and kept current on writes
pub struct DirectoryIndex {
    index: RwLock<Index>,
    cache: DomainCache,
}

#[derive(Default)]
struct Index {
    entries: HashMap<String, TenantMatch>,
    /// Last applied version per binding, kept for evicted bindings too
    versions: HashMap<BindingId, i64>,
}

impl Index {
    /// Record `binding`'s version unless a newer one was already applied
    fn accept(&mut self, binding: &DomainBinding) -> bool {
        match self.versions.get(&binding.id) {
            Some(&seen) if seen > binding.version => false,
            _ => {
                self.versions.insert(binding.id, binding.version);
                true
            }
        }
    }
}

impl Default for DirectoryIndex {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}

impl DirectoryIndex {
    pub fn new(cache_ttl: Duration) -> Self {
        Self {
            index: RwLock::new(Index::default()),
            cache: DomainCache::with_ttl(cache_ttl),
        }
    }

    /// Replace the whole index with a fresh snapshot
    pub fn replace_all<I>(&self, rows: I) -> usize
    where
        I: IntoIterator<Item = (Tenant, DomainBinding)>,
    {
        let mut count = 0;
        if let Ok(mut index) = self.index.write() {
            // Versions survive the rebuild; a snapshot row older than an
            // already applied change is skipped.
            let mut fresh = Index {
                entries: HashMap::new(),
                versions: std::mem::take(&mut index.versions),
            };
            for (tenant, binding) in rows {
                if fresh.accept(&binding) && tenant.is_active && binding.is_routable() {
                    let hostname = binding.hostname.to_ascii_lowercase();
                    fresh.entries.insert(hostname, to_match(tenant, &binding));
                }
            }
            count = fresh.entries.len();
            *index = fresh;
        }
        self.cache.clear();
        count
    }

    /// Apply a single binding change: routable bindings are indexed, anything
    /// else is evicted. A change older than the last one applied for the same
    /// binding is dropped, so a late write cannot bring back a removed hostname.
    pub fn apply(&self, tenant: &Tenant, binding: &DomainBinding) {
        let hostname = binding.hostname.to_ascii_lowercase();
        if let Ok(mut index) = self.index.write() {
            if !index.accept(binding) {
                tracing::debug!(
                    binding_id = %binding.id,
                    version = binding.version,
                    "Dropping out-of-order directory update"
                );
                return;
            }
            if tenant.is_active && binding.is_routable() {
                index
                    .entries
                    .insert(hostname.clone(), to_match(tenant.clone(), binding));
            } else if index.entries.get(&hostname).map(|m| m.binding_id) == Some(binding.id) {
                index.entries.remove(&hostname);
            }
        }
        for variant in hostname_variants(&hostname) {
            self.cache.invalidate(&variant);
        }
        self.cache.invalidate_tenant(tenant.id);
    }

    pub fn len(&self) -> usize {
        self.index.read().map(|i| i.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn cache(&self) -> &DomainCache {
        &self.cache
    }

    fn lookup_exact(&self, hostname: &str) -> Option<TenantMatch> {
        let index = self.index.read().ok()?;
        index
            .entries
            .get(hostname)
            .filter(|m| m.state.is_routable() || m.kind == BindingKind::Subdomain)
            .cloned()
    }
}

impl TenantDirectory for DirectoryIndex {
    fn find_by_hostname(&self, hostname: &str) -> Option<TenantMatch> {
        let host = hostname.trim().trim_end_matches('.').to_ascii_lowercase();
        if host.is_empty() {
            return None;
        }

        if let Some(cached) = self.cache.get(&host) {
            return cached;
        }

        let found = hostname_variants(&host)
            .iter()
            .find_map(|candidate| self.lookup_exact(candidate));
        self.cache.set(&host, found.clone());
        found
    }
}

/// Lookup order: exact, then without `www.`, then with `www.` added
fn hostname_variants(host: &str) -> Vec<String> {
    let mut variants = vec![host.to_string()];
    match host.strip_prefix("www.") {
        Some(bare) if !bare.is_empty() => variants.push(bare.to_string()),
        Some(_) => {}
        None => variants.push(format!("www.{}", host)),
    }
    variants
}

fn to_match(tenant: Tenant, binding: &DomainBinding) -> TenantMatch {
    TenantMatch {
        tenant,
        binding_id: binding.id,
        hostname: binding.hostname.to_ascii_lowercase(),
        kind: binding.kind,
        state: binding.state,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    fn binding(tenant: &Tenant, hostname: &str, state: DomainState) -> DomainBinding {
        let now = OffsetDateTime::now_utc();
        DomainBinding {
            id: BindingId::new(),
            tenant_id: tenant.id,
            hostname: hostname.to_string(),
            kind: BindingKind::CustomDomain,
            verification_token: "t".repeat(32),
            txt_record_name: format!("_bv-{}", tenant.slug),
            cname_target: "app.nextslot.in".to_string(),
            state,
            is_primary: true,
            verification_attempts: 0,
            last_messages: Vec::new(),
            version: 0,
            added_at: now,
            pending_since: now,
            verified_at: state.is_routable().then_some(now),
            last_checked_at: None,
            ssl_activated_at: None,
            removed_at: None,
            updated_at: now,
        }
    }

    #[test]
    fn test_hostname_variants_order() {
        assert_eq!(hostname_variants("okmentor.in"), vec!["okmentor.in", "www.okmentor.in"]);
        assert_eq!(hostname_variants("www.okmentor.in"), vec!["www.okmentor.in", "okmentor.in"]);
    }

    #[test]
    fn test_lookup_is_case_insensitive_and_tries_www_both_ways() {
        let directory = DirectoryIndex::default();
        let ramesh = Tenant::new("ramesh-salon", "Ramesh Salon");
        let okmentor = Tenant::new("okmentor", "OK Mentor");
        directory.replace_all(vec![
            (ramesh.clone(), binding(&ramesh, "www.rameshsalon.com", DomainState::Verified)),
            (okmentor.clone(), binding(&okmentor, "okmentor.in", DomainState::SslActive)),
        ]);

        let hit = |host: &str| directory.find_by_hostname(host).map(|m| m.tenant.id);
        assert_eq!(hit("WWW.RameshSalon.com"), Some(ramesh.id));
        assert_eq!(hit("rameshsalon.com"), Some(ramesh.id));
        assert_eq!(hit("okmentor.in."), Some(okmentor.id));
        assert_eq!(hit("www.okmentor.in"), Some(okmentor.id));
        assert_eq!(hit("book.okmentor.in"), None);
    }

    #[test]
    fn test_exact_match_wins_over_variant() {
        let directory = DirectoryIndex::default();
        let apex = Tenant::new("apex-owner", "Apex");
        let www = Tenant::new("www-owner", "WWW");
        directory.replace_all(vec![
            (apex.clone(), binding(&apex, "example.com", DomainState::Verified)),
            (www.clone(), binding(&www, "www.example.com", DomainState::Verified)),
        ]);

        assert_eq!(directory.find_by_hostname("example.com").unwrap().tenant.id, apex.id);
        assert_eq!(directory.find_by_hostname("www.example.com").unwrap().tenant.id, www.id);
    }

    #[test]
    fn test_unverified_bindings_are_not_indexed() {
        let directory = DirectoryIndex::default();
        let tenant = Tenant::new("okmentor", "OK Mentor");
        let count = directory.replace_all(vec![
            (tenant.clone(), binding(&tenant, "pending.example", DomainState::Pending)),
            (tenant.clone(), binding(&tenant, "partial.example", DomainState::DnsPartial)),
            (tenant.clone(), binding(&tenant, "failed.example", DomainState::Failed)),
            (tenant.clone(), binding(&tenant, "removed.example", DomainState::Removed)),
        ]);

        assert_eq!(count, 0);
        assert!(directory.find_by_hostname("pending.example").is_none());
        assert!(directory.find_by_hostname("failed.example").is_none());
    }

    #[test]
    fn test_inactive_tenant_is_not_indexed() {
        let directory = DirectoryIndex::default();
        let mut tenant = Tenant::new("closed-shop", "Closed");
        tenant.is_active = false;
        directory.replace_all(vec![(
            tenant.clone(),
            binding(&tenant, "closed.example", DomainState::Verified),
        )]);
        assert!(directory.find_by_hostname("closed.example").is_none());
    }

    #[test]
    fn test_apply_evicts_removed_binding_and_cached_hits() {
        let directory = DirectoryIndex::default();
        let tenant = Tenant::new("okmentor", "OK Mentor");
        let mut b = binding(&tenant, "okmentor.in", DomainState::Verified);
        directory.apply(&tenant, &b);

        // Warm the cache through both variants
        assert!(directory.find_by_hostname("okmentor.in").is_some());
        assert!(directory.find_by_hostname("www.okmentor.in").is_some());

        b.state = DomainState::Removed;
        directory.apply(&tenant, &b);

        assert!(directory.find_by_hostname("okmentor.in").is_none());
        assert!(directory.find_by_hostname("www.okmentor.in").is_none());
        assert!(directory.is_empty());
    }

    #[test]
    fn test_apply_does_not_evict_another_bindings_entry() {
        let directory = DirectoryIndex::default();
        let new_owner = Tenant::new("new-owner", "New");
        let live = binding(&new_owner, "shared.example", DomainState::Verified);
        directory.apply(&new_owner, &live);

        let old_owner = Tenant::new("old-owner", "Old");
        let stale = binding(&old_owner, "shared.example", DomainState::Removed);
        directory.apply(&old_owner, &stale);

        assert_eq!(
            directory.find_by_hostname("shared.example").unwrap().tenant.id,
            new_owner.id
        );
    }

    #[test]
    fn test_negative_results_are_cached_until_apply() {
        let directory = DirectoryIndex::default();
        let tenant = Tenant::new("late-bloomer", "Late");

        assert!(directory.find_by_hostname("late.example").is_none());
        assert_eq!(directory.cache().get("late.example"), Some(None));

        directory.apply(&tenant, &binding(&tenant, "late.example", DomainState::Verified));
        assert!(directory.find_by_hostname("late.example").is_some());
    }

    #[test]
    fn test_late_routable_write_cannot_resurrect_removed_binding() {
        let directory = DirectoryIndex::default();
        let tenant = Tenant::new("okmentor", "OK Mentor");
        let mut verified = binding(&tenant, "okmentor.in", DomainState::Verified);
        verified.version = 2;
        let mut removed = verified.clone();
        removed.state = DomainState::Removed;
        removed.version = 3;

        directory.apply(&tenant, &removed);
        directory.apply(&tenant, &verified);

        assert!(directory.find_by_hostname("okmentor.in").is_none());
        assert!(directory.find_by_hostname("www.okmentor.in").is_none());
        assert!(directory.is_empty());
    }

    #[test]
    fn test_older_write_is_dropped_after_newer_one() {
        let directory = DirectoryIndex::default();
        let tenant = Tenant::new("okmentor", "OK Mentor");
        let mut pending = binding(&tenant, "okmentor.in", DomainState::Pending);
        pending.version = 1;
        let mut active = pending.clone();
        active.state = DomainState::SslActive;
        active.version = 4;

        directory.apply(&tenant, &active);
        directory.apply(&tenant, &pending);

        let hit = directory.find_by_hostname("okmentor.in").unwrap();
        assert_eq!(hit.state, DomainState::SslActive);
    }

    #[test]
    fn test_rebuild_keeps_versions_of_removed_bindings() {
        let directory = DirectoryIndex::default();
        let tenant = Tenant::new("okmentor", "OK Mentor");
        let mut removed = binding(&tenant, "okmentor.in", DomainState::Removed);
        removed.version = 5;
        directory.apply(&tenant, &removed);

        // A snapshot taken before the removal, then a late write
        let mut snapshot = removed.clone();
        snapshot.state = DomainState::Verified;
        snapshot.version = 4;
        assert_eq!(directory.replace_all(vec![(tenant.clone(), snapshot)]), 0);

        let mut stale = removed.clone();
        stale.state = DomainState::Verified;
        stale.version = 4;
        directory.apply(&tenant, &stale);

        assert!(directory.find_by_hostname("okmentor.in").is_none());
    }
}
