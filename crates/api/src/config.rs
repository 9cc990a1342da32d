//! Application configuration

use std::env;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

/// Default platform domain serving `<slug>.nextslot.in` subdomains
pub const DEFAULT_BASE_DOMAIN: &str = "nextslot.in";

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub bind_address: String,
    pub log_json: bool,

    // Database (in-memory store when unset)
    pub database_url: Option<String>,
    pub database_max_connections: u32,

    /// Shared secret for `/internal` callbacks; those routes refuse every
    /// request when unset
    pub internal_api_token: Option<String>,

    // Custom domains
    pub platform: PlatformConfig,
    pub verification: VerificationPolicy,
    pub directory_cache_ttl: Duration,
    pub directory_refresh_interval: Duration,

    // Worker schedules (cron with seconds field)
    pub verify_cron: String,
    pub health_check_cron: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let base_domain = env::var("BASE_DOMAIN")
            .map(|v| v.trim().trim_end_matches('.').to_lowercase())
            .unwrap_or_else(|_| DEFAULT_BASE_DOMAIN.to_string());
        if base_domain.is_empty() {
            return Err(ConfigError::Invalid("BASE_DOMAIN", "must not be empty".to_string()));
        }

        let mut platform = PlatformConfig::new(&base_domain);
        if let Ok(ingress) = env::var("INGRESS_HOST") {
            platform.ingress_host = ingress.trim().trim_end_matches('.').to_lowercase();
        }
        if let Ok(hosts) = env::var("PLATFORM_HOSTS") {
            platform.platform_hosts = hosts
                .split(',')
                .map(|h| h.trim().trim_end_matches('.').to_lowercase())
                .filter(|h| !h.is_empty())
                .collect();
        }
        if let Ok(prefix) = env::var("BOOKING_PATH_PREFIX") {
            platform.booking_path_prefix = prefix;
        }
        platform.force_https = parse_var("FORCE_HTTPS", true)?;

        let defaults = VerificationPolicy::default();
        let verification = VerificationPolicy {
            max_attempts: parse_var("VERIFY_MAX_ATTEMPTS", defaults.max_attempts)?,
            max_pending_age: time::Duration::hours(parse_var(
                "VERIFY_MAX_PENDING_HOURS",
                defaults.max_pending_age.whole_hours(),
            )?),
            lookup_timeout: Duration::from_secs(parse_var(
                "DNS_LOOKUP_TIMEOUT_SECS",
                defaults.lookup_timeout.as_secs(),
            )?),
            concurrency: parse_var("VERIFY_CONCURRENCY", defaults.concurrency)?,
            propagation_grace: time::Duration::seconds(parse_var(
                "VERIFY_GRACE_SECS",
                defaults.propagation_grace.whole_seconds(),
            )?),
        };
        if verification.max_attempts == 0 {
            return Err(ConfigError::Invalid("VERIFY_MAX_ATTEMPTS", "must be at least 1".to_string()));
        }
        if verification.concurrency == 0 {
            return Err(ConfigError::Invalid("VERIFY_CONCURRENCY", "must be at least 1".to_string()));
        }

        Ok(Self {
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            log_json: env::var("LOG_FORMAT").map(|v| v == "json").unwrap_or(false),

            database_url: env::var("DATABASE_URL").ok().filter(|v| !v.is_empty()),
            database_max_connections: parse_var("DATABASE_MAX_CONNECTIONS", 5)?,
            internal_api_token: env::var("INTERNAL_API_TOKEN")
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),

            platform,
            verification,
            directory_cache_ttl: Duration::from_secs(parse_var("DIRECTORY_CACHE_TTL_SECS", 300)?),
            directory_refresh_interval: Duration::from_secs(parse_var(
                "DIRECTORY_REFRESH_SECS",
                60,
            )?),

            verify_cron: env::var("VERIFY_CRON").unwrap_or_else(|_| "0 */5 * * * *".to_string()),
            health_check_cron: env::var("HEALTH_CHECK_CRON")
                .unwrap_or_else(|_| "0 0 */6 * * *".to_string()),
        })
    }
}

/// Platform-owned names and URL conventions, injected into the resolver,
/// directory and verification engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformConfig {
    /// e.g. "nextslot.in" for `<slug>.nextslot.in` subdomains
    pub base_domain: String,
    /// Platform ingress host; custom domains must CNAME to it
    pub ingress_host: String,
    /// Extra hostnames owned by the platform (load balancer names etc.)
    pub platform_hosts: Vec<String>,
    /// Public booking pages live at `<prefix><slug>/`
    pub booking_path_prefix: String,
    /// Redirect plaintext requests on verified bindings to HTTPS
    pub force_https: bool,
}

/// Subdomain labels tenants may not claim
pub const RESERVED_LABELS: &[&str] = &[
    "www", "api", "app", "admin", "mail", "smtp", "ftp", "dashboard", "console", "portal",
    "docs", "help", "support", "status", "blog", "cdn", "static", "media", "assets", "images",
    "staging", "dev", "test", "demo", "customers", "provider", "accounts",
];

impl PlatformConfig {
    pub fn new(base_domain: &str) -> Self {
        let base_domain = base_domain.trim().trim_end_matches('.').to_lowercase();
        Self {
            ingress_host: format!("app.{}", base_domain),
            base_domain,
            platform_hosts: Vec::new(),
            booking_path_prefix: "/salon/".to_string(),
            force_https: true,
        }
    }

    pub fn with_ingress_host(mut self, ingress_host: &str) -> Self {
        self.ingress_host = ingress_host.trim().trim_end_matches('.').to_lowercase();
        self
    }

    /// Hosts that always belong to the platform itself and must never be
    /// treated as tenant domains. Expects a normalized host.
    pub fn is_platform_host(&self, host: &str) -> bool {
        if host == "localhost" || host == self.base_domain || host == self.ingress_host {
            return true;
        }
        if host.strip_prefix("www.") == Some(self.base_domain.as_str()) {
            return true;
        }
        if self.platform_hosts.iter().any(|h| h == host) {
            return true;
        }
        host.trim_start_matches('[')
            .trim_end_matches(']')
            .parse::<IpAddr>()
            .is_ok()
    }

    /// Label of `<label>.<base_domain>`, if the host sits directly under the base domain
    pub fn subdomain_label<'a>(&self, host: &'a str) -> Option<&'a str> {
        host.strip_suffix(self.base_domain.as_str())
            .and_then(|rest| rest.strip_suffix('.'))
            .filter(|label| !label.is_empty() && !label.contains('.'))
    }

    /// Whether the host is the base domain or anywhere beneath it
    pub fn is_under_base_domain(&self, host: &str) -> bool {
        host == self.base_domain
            || host
                .strip_suffix(self.base_domain.as_str())
                .is_some_and(|rest| rest.ends_with('.'))
    }

    /// Path of a tenant's public booking page
    pub fn booking_path(&self, slug: &str) -> String {
        let prefix = self.booking_path_prefix.trim_end_matches('/');
        format!("{}/{}/", prefix, slug)
    }
}

/// Bounds for the DNS verification cycle
#[derive(Debug, Clone)]
pub struct VerificationPolicy {
    /// Unsuccessful passes before a pending binding is marked failed
    pub max_attempts: u32,
    /// Age after which a still-pending binding is marked failed
    pub max_pending_age: time::Duration,
    /// Timeout for each individual DNS query
    pub lookup_timeout: Duration,
    /// Bindings verified in parallel per pass
    pub concurrency: usize,
    /// Scheduled passes skip bindings younger than this
    pub propagation_grace: time::Duration,
}

impl Default for VerificationPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 288, // 24h of five-minute passes
            max_pending_age: time::Duration::hours(48),
            lookup_timeout: Duration::from_secs(10),
            concurrency: 16,
            propagation_grace: time::Duration::minutes(5),
        }
    }
}

fn parse_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid(name, format!("cannot parse '{}'", raw))),
        Err(_) => Ok(default),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    Invalid(&'static str, String),
}
