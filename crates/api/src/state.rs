//! Shared application state

use std::sync::Arc;

use sqlx::PgPool;

use crate::config::Config;
use crate::domains::{
    BindingStore, DnsLookup, DomainService, MemoryBindingStore, PgBindingStore, VerificationEngine,
};
use crate::routing::{DirectoryIndex, HostResolver};

#[derive(Clone)]
pub struct AppState {
    pub domains: DomainService,
    pub resolver: HostResolver,
    /// Present when running against Postgres
    pub pool: Option<PgPool>,
    /// Expected `X-Internal-Token` for `/internal` callbacks
    pub internal_token: Option<Arc<str>>,
}

impl AppState {
    /// Wire the store, DNS collaborator, directory and resolver together
    pub fn new(config: &Config, pool: Option<PgPool>, dns: Arc<dyn DnsLookup>) -> Self {
        let store: Arc<dyn BindingStore> = match &pool {
            Some(pool) => Arc::new(PgBindingStore::new(pool.clone())),
            None => Arc::new(MemoryBindingStore::new()),
        };
        Self::with_store(config, store, pool, dns)
    }

    pub fn with_store(
        config: &Config,
        store: Arc<dyn BindingStore>,
        pool: Option<PgPool>,
        dns: Arc<dyn DnsLookup>,
    ) -> Self {
        let platform = Arc::new(config.platform.clone());
        let directory = Arc::new(DirectoryIndex::new(config.directory_cache_ttl));
        let domains = DomainService::new(
            store,
            VerificationEngine::new(dns),
            directory.clone(),
            platform.clone(),
            config.verification.clone(),
        );
        let resolver = HostResolver::new(directory, platform);

        Self {
            domains,
            resolver,
            pool,
            internal_token: config.internal_api_token.as_deref().map(Arc::from),
        }
    }
}
