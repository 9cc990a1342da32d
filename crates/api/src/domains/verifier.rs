//! DNS Verification Engine
//!
//! A custom domain is verified only if BOTH checks pass:
//! - the hostname CNAMEs to the platform ingress host (or, when the DNS provider
//!   flattens CNAME at the apex, its A records match the ingress host's)
//! - a TXT record at `<txt_record_name>.<apex>` contains exactly the binding's token
//!
//! Each check reports a plain-language message for the tenant. Transient lookup
//! failures are reported separately from permanent mismatches.

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::Arc;

use serde::Serialize;
use time::OffsetDateTime;

use nextslot_shared::{BindingKind, DomainBinding};

use super::dns::{DnsLookup, LookupError};

/// Outcome of a single record check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckOutcome {
    Passed,
    /// Record present with the wrong value
    Mismatch,
    /// Record absent (NXDOMAIN or no answer)
    Missing,
    /// Timeout or nameserver failure; says nothing about the tenant's records
    Transient,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordCheck {
    pub outcome: CheckOutcome,
    pub message: String,
}

impl RecordCheck {
    fn new(outcome: CheckOutcome, message: impl Into<String>) -> Self {
        Self {
            outcome,
            message: message.into(),
        }
    }

    pub fn passed(&self) -> bool {
        self.outcome == CheckOutcome::Passed
    }
}

/// Result of verifying one binding
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationResult {
    pub cname_ok: bool,
    pub txt_ok: bool,
    pub messages: Vec<String>,
    pub cname: RecordCheck,
    pub txt: RecordCheck,
    #[serde(with = "time::serde::rfc3339")]
    pub checked_at: OffsetDateTime,
}

impl VerificationResult {
    fn from_checks(cname: RecordCheck, txt: RecordCheck) -> Self {
        Self {
            cname_ok: cname.passed(),
            txt_ok: txt.passed(),
            messages: vec![cname.message.clone(), txt.message.clone()],
            cname,
            txt,
            checked_at: OffsetDateTime::now_utc(),
        }
    }

    pub fn fully_verified(&self) -> bool {
        self.cname_ok && self.txt_ok
    }

    /// At least one check could not reach a conclusion
    pub fn has_transient(&self) -> bool {
        self.cname.outcome == CheckOutcome::Transient || self.txt.outcome == CheckOutcome::Transient
    }

    pub fn passed_checks(&self) -> usize {
        usize::from(self.cname_ok) + usize::from(self.txt_ok)
    }
}

/// Checks a binding's DNS records through the injected lookup collaborator
#[derive(Clone)]
pub struct VerificationEngine {
    dns: Arc<dyn DnsLookup>,
}

impl VerificationEngine {
    pub fn new(dns: Arc<dyn DnsLookup>) -> Self {
        Self { dns }
    }

    /// Verify a binding. Never fails: lookup problems become diagnostics.
    /// The CNAME is checked against the binding's own `cname_target`.
    pub async fn verify(&self, binding: &DomainBinding) -> VerificationResult {
        if binding.kind == BindingKind::Subdomain {
            let trusted = "Platform subdomain, no DNS records required";
            return VerificationResult::from_checks(
                RecordCheck::new(CheckOutcome::Passed, trusted),
                RecordCheck::new(CheckOutcome::Passed, trusted),
            );
        }

        let (cname, txt) = tokio::join!(self.check_routing(binding), self.check_txt(binding));

        tracing::debug!(
            binding_id = %binding.id,
            hostname = %binding.hostname,
            cname = ?cname.outcome,
            txt = ?txt.outcome,
            "DNS verification checked"
        );

        VerificationResult::from_checks(cname, txt)
    }

    async fn check_routing(&self, binding: &DomainBinding) -> RecordCheck {
        let host = &binding.hostname;
        let expected = &binding.cname_target;

        match self.dns.lookup_cname(host).await {
            Ok(targets) => {
                if targets.iter().any(|t| same_name(t, expected)) {
                    RecordCheck::new(
                        CheckOutcome::Passed,
                        format!("CNAME {} points to {}", host, expected),
                    )
                } else {
                    RecordCheck::new(
                        CheckOutcome::Mismatch,
                        format!(
                            "CNAME {} points to {}, expected {}",
                            host,
                            targets.join(", "),
                            expected
                        ),
                    )
                }
            }
            Err(LookupError::NxDomain) | Err(LookupError::NoAnswer) => {
                // Apex records flattened by the DNS provider show up as A records
                self.check_flattened(host, expected).await
            }
            Err(err) => transient(&format!("CNAME record for {}", host), &err),
        }
    }

    async fn check_flattened(&self, host: &str, expected: &str) -> RecordCheck {
        let host_addrs: HashSet<Ipv4Addr> = match self.dns.lookup_a(host).await {
            Ok(addrs) => addrs.into_iter().collect(),
            Err(LookupError::NxDomain) | Err(LookupError::NoAnswer) => {
                return RecordCheck::new(
                    CheckOutcome::Missing,
                    format!("No CNAME record found for {}; add a CNAME pointing to {}", host, expected),
                );
            }
            Err(err) => return transient(&format!("A record for {}", host), &err),
        };

        let target_addrs: HashSet<Ipv4Addr> = match self.dns.lookup_a(expected).await {
            Ok(addrs) => addrs.into_iter().collect(),
            Err(err) => {
                tracing::warn!(ingress = %expected, error = %err, "Ingress host did not resolve");
                return transient(&format!("A record for {}", expected), &err);
            }
        };

        if host_addrs.is_disjoint(&target_addrs) {
            let mut found: Vec<String> = host_addrs.iter().map(|a| a.to_string()).collect();
            found.sort();
            RecordCheck::new(
                CheckOutcome::Mismatch,
                format!(
                    "{} resolves to {}, which is not {}; add a CNAME pointing to {}",
                    host,
                    found.join(", "),
                    expected,
                    expected
                ),
            )
        } else {
            RecordCheck::new(
                CheckOutcome::Passed,
                format!("{} resolves to the same address as {} (flattened CNAME)", host, expected),
            )
        }
    }

    async fn check_txt(&self, binding: &DomainBinding) -> RecordCheck {
        let name = binding.txt_lookup_name();

        match self.dns.lookup_txt(&name).await {
            Ok(values) => {
                if values.iter().any(|v| v.trim_matches('"') == binding.verification_token) {
                    RecordCheck::new(
                        CheckOutcome::Passed,
                        format!("TXT record at {} contains the verification code", name),
                    )
                } else {
                    RecordCheck::new(
                        CheckOutcome::Mismatch,
                        format!(
                            "TXT record at {} contains \"{}\", expected \"{}\"",
                            name,
                            values.join("\", \""),
                            binding.verification_token
                        ),
                    )
                }
            }
            Err(LookupError::NxDomain) | Err(LookupError::NoAnswer) => RecordCheck::new(
                CheckOutcome::Missing,
                format!("TXT record not found at {}", name),
            ),
            Err(err) => transient(&format!("TXT record at {}", name), &err),
        }
    }
}

fn transient(what: &str, err: &LookupError) -> RecordCheck {
    RecordCheck::new(
        CheckOutcome::Transient,
        format!("Could not look up {} ({}); will retry", what, err),
    )
}

/// Case-insensitive DNS name comparison ignoring the trailing dot
fn same_name(a: &str, b: &str) -> bool {
    a.trim_end_matches('.').eq_ignore_ascii_case(b.trim_end_matches('.'))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::domains::dns::StaticDns;
    use nextslot_shared::{BindingId, DomainState, TenantId};

    const TOKEN: &str = "Q7rX2mPz9LkW4vB8nT1cY6hJ3dF5sG0a";

    fn binding(hostname: &str, kind: BindingKind) -> DomainBinding {
        let now = OffsetDateTime::now_utc();
        DomainBinding {
            id: BindingId::new(),
            tenant_id: TenantId::new(),
            hostname: hostname.to_string(),
            kind,
            verification_token: TOKEN.to_string(),
            txt_record_name: "_bv-okmentor".to_string(),
            cname_target: "app.nextslot.in".to_string(),
            state: DomainState::Pending,
            is_primary: true,
            verification_attempts: 0,
            last_messages: Vec::new(),
            version: 0,
            added_at: now,
            pending_since: now,
            verified_at: None,
            last_checked_at: None,
            ssl_activated_at: None,
            removed_at: None,
            updated_at: now,
        }
    }

    fn engine(dns: &Arc<StaticDns>) -> VerificationEngine {
        VerificationEngine::new(dns.clone())
    }

    #[tokio::test]
    async fn test_subdomain_skips_dns() {
        let dns = Arc::new(StaticDns::new());
        let result = engine(&dns)
            .verify(&binding("ramesh-salon.nextslot.in", BindingKind::Subdomain))
            .await;
        assert!(result.fully_verified());
        assert_eq!(dns.lookups(), 0);
    }

    #[tokio::test]
    async fn test_nothing_configured() {
        let dns = Arc::new(StaticDns::new());
        let result = engine(&dns)
            .verify(&binding("okmentor.in", BindingKind::CustomDomain))
            .await;

        assert!(!result.cname_ok);
        assert!(!result.txt_ok);
        assert_eq!(result.cname.outcome, CheckOutcome::Missing);
        assert_eq!(result.txt.outcome, CheckOutcome::Missing);
        assert_eq!(result.messages[1], "TXT record not found at _bv-okmentor.okmentor.in");
    }

    #[tokio::test]
    async fn test_cname_alone_is_not_enough() {
        let dns = Arc::new(StaticDns::new());
        dns.set_cname("okmentor.in", "APP.nextslot.in.");

        let result = engine(&dns)
            .verify(&binding("okmentor.in", BindingKind::CustomDomain))
            .await;
        assert!(result.cname_ok);
        assert!(!result.txt_ok);
        assert!(!result.fully_verified());
        assert_eq!(result.passed_checks(), 1);
    }

    #[tokio::test]
    async fn test_both_records_pass() {
        let dns = Arc::new(StaticDns::new());
        dns.set_cname("www.okmentor.in", "app.nextslot.in");
        dns.set_txt("_bv-okmentor.okmentor.in", &["unrelated", TOKEN]);

        let result = engine(&dns)
            .verify(&binding("www.okmentor.in", BindingKind::CustomDomain))
            .await;
        assert!(result.fully_verified());
    }

    #[tokio::test]
    async fn test_wrong_values_explain_expected_and_actual() {
        let dns = Arc::new(StaticDns::new());
        dns.set_cname("okmentor.in", "ghs.googlehosted.com");
        dns.set_txt("_bv-okmentor.okmentor.in", &["old-token"]);

        let result = engine(&dns)
            .verify(&binding("okmentor.in", BindingKind::CustomDomain))
            .await;
        assert_eq!(result.cname.outcome, CheckOutcome::Mismatch);
        assert_eq!(
            result.cname.message,
            "CNAME okmentor.in points to ghs.googlehosted.com, expected app.nextslot.in"
        );
        assert_eq!(result.txt.outcome, CheckOutcome::Mismatch);
        assert!(result.txt.message.contains("old-token"));
    }

    #[tokio::test]
    async fn test_token_must_match_exactly() {
        let dns = Arc::new(StaticDns::new());
        dns.set_cname("okmentor.in", "app.nextslot.in");
        let padded = format!("{}x", TOKEN);
        dns.set_txt("_bv-okmentor.okmentor.in", &[padded.as_str()]);

        let result = engine(&dns)
            .verify(&binding("okmentor.in", BindingKind::CustomDomain))
            .await;
        assert!(!result.txt_ok);
    }

    #[tokio::test]
    async fn test_flattened_apex_uses_a_records() {
        let dns = Arc::new(StaticDns::new());
        let ingress: Ipv4Addr = "203.0.113.10".parse().unwrap();
        dns.set_a("app.nextslot.in", &[ingress]);
        dns.set_a("okmentor.in", &[ingress]);
        dns.set_txt("_bv-okmentor.okmentor.in", &[TOKEN]);

        let result = engine(&dns)
            .verify(&binding("okmentor.in", BindingKind::CustomDomain))
            .await;
        assert!(result.cname_ok);
        assert!(result.fully_verified());

        dns.set_a("okmentor.in", &["198.51.100.1".parse().unwrap()]);
        let result = engine(&dns)
            .verify(&binding("okmentor.in", BindingKind::CustomDomain))
            .await;
        assert_eq!(result.cname.outcome, CheckOutcome::Mismatch);
    }

    #[tokio::test]
    async fn test_timeouts_are_transient() {
        let dns = Arc::new(StaticDns::new());
        dns.set_cname("okmentor.in", "app.nextslot.in");
        dns.fail_txt("_bv-okmentor.okmentor.in", LookupError::Timeout);

        let result = engine(&dns)
            .verify(&binding("okmentor.in", BindingKind::CustomDomain))
            .await;
        assert!(result.cname_ok);
        assert_eq!(result.txt.outcome, CheckOutcome::Transient);
        assert!(result.has_transient());
        assert!(result.txt.message.contains("will retry"));
    }
}
