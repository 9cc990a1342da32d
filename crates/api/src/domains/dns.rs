//! DNS resolution collaborator
//!
//! The verification engine only talks to [`DnsLookup`]; production uses
//! [`TrustDnsLookup`], tests script answers with [`StaticDns`].

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
use trust_dns_resolver::error::{ResolveError, ResolveErrorKind};
use trust_dns_resolver::proto::op::ResponseCode;
use trust_dns_resolver::proto::rr::RecordType;
use trust_dns_resolver::TokioAsyncResolver;

/// Distinct, reportable outcomes of a failed DNS query
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LookupError {
    /// The name does not exist (may still be propagating)
    #[error("name does not exist")]
    NxDomain,
    /// The name exists but has no record of the requested type
    #[error("no records of the requested type")]
    NoAnswer,
    /// Nameserver failure or network error
    #[error("nameserver unavailable: {0}")]
    Unavailable(String),
    #[error("lookup timed out")]
    Timeout,
}

impl LookupError {
    /// Retrying later may give a different answer without any DNS change
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout)
    }
}

/// Standard DNS queries needed for ownership verification
#[async_trait]
pub trait DnsLookup: Send + Sync {
    /// CNAME targets of `name`, without trailing dots
    async fn lookup_cname(&self, name: &str) -> Result<Vec<String>, LookupError>;

    /// IPv4 addresses of `name`
    async fn lookup_a(&self, name: &str) -> Result<Vec<Ipv4Addr>, LookupError>;

    /// TXT strings at `name`; multi-chunk records are joined
    async fn lookup_txt(&self, name: &str) -> Result<Vec<String>, LookupError>;
}

/// Public DNS over trust-dns with a bounded timeout per query
pub struct TrustDnsLookup {
    resolver: TokioAsyncResolver,
    timeout: Duration,
}

impl TrustDnsLookup {
    /// Resolver against Cloudflare's public DNS; `timeout` bounds every query
    pub fn new(timeout: Duration) -> Self {
        let mut opts = ResolverOpts::default();
        opts.timeout = timeout;
        opts.attempts = 2;
        // Verification must observe propagation, not a cached negative answer
        opts.cache_size = 0;

        Self {
            resolver: TokioAsyncResolver::tokio(ResolverConfig::cloudflare(), opts),
            timeout,
        }
    }

    async fn lookup(
        &self,
        name: &str,
        record_type: RecordType,
    ) -> Result<trust_dns_resolver::lookup::Lookup, LookupError> {
        match tokio::time::timeout(self.timeout, self.resolver.lookup(name, record_type)).await {
            Ok(Ok(lookup)) => Ok(lookup),
            Ok(Err(err)) => {
                tracing::debug!(name = %name, ?record_type, error = %err, "DNS lookup failed");
                Err(map_resolve_error(&err))
            }
            Err(_) => {
                tracing::debug!(name = %name, ?record_type, "DNS lookup timed out");
                Err(LookupError::Timeout)
            }
        }
    }
}

#[async_trait]
impl DnsLookup for TrustDnsLookup {
    async fn lookup_cname(&self, name: &str) -> Result<Vec<String>, LookupError> {
        let response = self.lookup(name, RecordType::CNAME).await?;
        let targets: Vec<String> = response
            .iter()
            .filter_map(|record| record.as_cname())
            .map(|cname| cname.to_string().trim_end_matches('.').to_string())
            .collect();
        non_empty(targets)
    }

    async fn lookup_a(&self, name: &str) -> Result<Vec<Ipv4Addr>, LookupError> {
        let response = self.lookup(name, RecordType::A).await?;
        let addrs: Vec<Ipv4Addr> = response
            .iter()
            .filter_map(|record| record.as_a())
            .map(|a| a.0)
            .collect();
        non_empty(addrs)
    }

    async fn lookup_txt(&self, name: &str) -> Result<Vec<String>, LookupError> {
        let response = self.lookup(name, RecordType::TXT).await?;
        let values: Vec<String> = response
            .iter()
            .filter_map(|record| record.as_txt())
            .map(|txt| {
                txt.txt_data()
                    .iter()
                    .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
                    .collect::<String>()
            })
            .collect();
        non_empty(values)
    }
}

fn non_empty<T>(values: Vec<T>) -> Result<Vec<T>, LookupError> {
    if values.is_empty() {
        Err(LookupError::NoAnswer)
    } else {
        Ok(values)
    }
}

fn map_resolve_error(err: &ResolveError) -> LookupError {
    match err.kind() {
        ResolveErrorKind::NoRecordsFound { response_code, .. } => {
            if *response_code == ResponseCode::NXDomain {
                LookupError::NxDomain
            } else {
                LookupError::NoAnswer
            }
        }
        ResolveErrorKind::Timeout => LookupError::Timeout,
        _ => LookupError::Unavailable(err.to_string()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum QueryKind {
    Cname,
    A,
    Txt,
}

/// Scripted DNS answers for tests and local runs. Unknown names are NXDOMAIN.
#[derive(Default)]
pub struct StaticDns {
    cname: RwLock<HashMap<String, Result<Vec<String>, LookupError>>>,
    a: RwLock<HashMap<String, Result<Vec<Ipv4Addr>, LookupError>>>,
    txt: RwLock<HashMap<String, Result<Vec<String>, LookupError>>>,
    failures: RwLock<HashMap<(String, QueryKind), LookupError>>,
    lookups: AtomicUsize,
}

impl StaticDns {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_cname(&self, name: &str, target: &str) {
        if let Ok(mut map) = self.cname.write() {
            map.insert(key(name), Ok(vec![target.to_string()]));
        }
    }

    pub fn set_a(&self, name: &str, addrs: &[Ipv4Addr]) {
        if let Ok(mut map) = self.a.write() {
            map.insert(key(name), Ok(addrs.to_vec()));
        }
    }

    pub fn set_txt(&self, name: &str, values: &[&str]) {
        if let Ok(mut map) = self.txt.write() {
            map.insert(key(name), Ok(values.iter().map(|v| v.to_string()).collect()));
        }
    }

    /// Make every query type for `name` fail with `error`
    pub fn fail_all(&self, name: &str, error: LookupError) {
        if let Ok(mut map) = self.failures.write() {
            for kind in [QueryKind::Cname, QueryKind::A, QueryKind::Txt] {
                map.insert((key(name), kind), error.clone());
            }
        }
    }

    /// Make TXT queries for `name` fail with `error`
    pub fn fail_txt(&self, name: &str, error: LookupError) {
        if let Ok(mut map) = self.failures.write() {
            map.insert((key(name), QueryKind::Txt), error);
        }
    }

    /// Forget every record and failure for `name`
    pub fn clear(&self, name: &str) {
        let name = key(name);
        if let Ok(mut map) = self.cname.write() {
            map.remove(&name);
        }
        if let Ok(mut map) = self.a.write() {
            map.remove(&name);
        }
        if let Ok(mut map) = self.txt.write() {
            map.remove(&name);
        }
        if let Ok(mut map) = self.failures.write() {
            map.retain(|(n, _), _| *n != name);
        }
    }

    /// Number of queries answered so far
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::Relaxed)
    }

    fn answer<T: Clone>(
        &self,
        table: &RwLock<HashMap<String, Result<Vec<T>, LookupError>>>,
        name: &str,
        kind: QueryKind,
    ) -> Result<Vec<T>, LookupError> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        let name = key(name);

        if let Some(err) = self
            .failures
            .read()
            .ok()
            .and_then(|map| map.get(&(name.clone(), kind)).cloned())
        {
            return Err(err);
        }

        let table = table
            .read()
            .map_err(|_| LookupError::Unavailable("static table poisoned".to_string()))?;
        match table.get(&name) {
            Some(answer) => answer.clone(),
            None if self.name_exists(&name) => Err(LookupError::NoAnswer),
            None => Err(LookupError::NxDomain),
        }
    }

    fn name_exists(&self, name: &str) -> bool {
        let has = |present: Option<bool>| present.unwrap_or(false);
        has(self.cname.read().ok().map(|m| m.contains_key(name)))
            || has(self.a.read().ok().map(|m| m.contains_key(name)))
            || has(self.txt.read().ok().map(|m| m.contains_key(name)))
    }
}

fn key(name: &str) -> String {
    name.trim_end_matches('.').to_ascii_lowercase()
}

#[async_trait]
impl DnsLookup for StaticDns {
    async fn lookup_cname(&self, name: &str) -> Result<Vec<String>, LookupError> {
        self.answer(&self.cname, name, QueryKind::Cname)
    }

    async fn lookup_a(&self, name: &str) -> Result<Vec<Ipv4Addr>, LookupError> {
        self.answer(&self.a, name, QueryKind::A)
    }

    async fn lookup_txt(&self, name: &str) -> Result<Vec<String>, LookupError> {
        self.answer(&self.txt, name, QueryKind::Txt)
    }
}
