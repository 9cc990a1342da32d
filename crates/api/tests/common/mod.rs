//! Shared fixtures for the API integration tests
//!
//! Everything runs against the in-memory binding store and scripted DNS, so
//! no database or network is needed.

#![allow(dead_code, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use nextslot_api::config::{PlatformConfig, VerificationPolicy};
use nextslot_api::domains::{BindingStore, DomainService, MemoryBindingStore, StaticDns, VerificationEngine};
use nextslot_api::routing::{DirectoryIndex, HostResolver, RequestTarget, RoutingDecision};
use nextslot_api::AppState;
use nextslot_shared::{DomainBinding, Tenant};

pub const BASE_DOMAIN: &str = "nextslot.in";
pub const INGRESS: &str = "app.nextslot.in";
pub const INTERNAL_TOKEN: &str = "cluster-secret";

pub struct Harness {
    pub service: DomainService,
    pub resolver: HostResolver,
    pub directory: Arc<DirectoryIndex>,
    pub dns: Arc<StaticDns>,
}

/// Policy with no propagation grace so scheduled passes pick up fresh bindings
pub fn test_policy() -> VerificationPolicy {
    VerificationPolicy {
        propagation_grace: time::Duration::ZERO,
        lookup_timeout: Duration::from_millis(200),
        ..VerificationPolicy::default()
    }
}

pub fn harness() -> Harness {
    harness_with_policy(test_policy())
}

pub fn harness_with_policy(policy: VerificationPolicy) -> Harness {
    let platform = Arc::new(PlatformConfig::new(BASE_DOMAIN));
    let dns = Arc::new(StaticDns::new());
    let directory = Arc::new(DirectoryIndex::default());
    let store: Arc<dyn BindingStore> = Arc::new(MemoryBindingStore::new());

    let service = DomainService::new(
        store,
        VerificationEngine::new(dns.clone()),
        directory.clone(),
        platform.clone(),
        policy,
    );
    let resolver = HostResolver::new(directory.clone(), platform);

    Harness {
        service,
        resolver,
        directory,
        dns,
    }
}

impl Harness {
    pub async fn tenant(&self, slug: &str, business_name: &str) -> Tenant {
        let tenant = Tenant::new(slug, business_name);
        self.service
            .store()
            .upsert_tenant(&tenant)
            .await
            .expect("Failed to create tenant");
        tenant
    }

    pub fn resolve(&self, host: &str, path_and_query: &str, is_tls: bool) -> RoutingDecision {
        self.resolver.resolve(&RequestTarget {
            host,
            path_and_query,
            is_tls,
        })
    }

    /// Publish the CNAME the tenant was asked to create
    pub fn publish_cname(&self, binding: &DomainBinding) {
        self.dns.set_cname(&binding.hostname, &format!("{}.", binding.cname_target));
    }

    /// Publish the verification TXT record the tenant was asked to create
    pub fn publish_txt(&self, binding: &DomainBinding) {
        self.dns
            .set_txt(&binding.txt_lookup_name(), &[binding.verification_token.as_str()]);
    }

    pub async fn reload(&self, binding: &DomainBinding) -> DomainBinding {
        self.service
            .store()
            .get_binding(binding.id)
            .await
            .expect("Store error")
            .expect("Binding disappeared")
    }

    pub fn app_state(&self) -> AppState {
        AppState {
            domains: self.service.clone(),
            resolver: self.resolver.clone(),
            pool: None,
            internal_token: Some(Arc::from(INTERNAL_TOKEN)),
        }
    }
}
