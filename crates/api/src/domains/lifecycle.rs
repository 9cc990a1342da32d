//! Domain Lifecycle State Machine
//!
//! ```text
//! Pending ──one check──▶ DnsPartial ──both──▶ Verified ──TLS hook──▶ SslActive
//!    │                       │
//!    └──attempts/age exhausted──▶ Failed ──resubmit──▶ Pending
//!
//! any state ──tenant removes──▶ Removed (terminal)
//! ```
//!
//! All functions are pure: they take the current binding and return the next
//! one. Persisting the result (with a version check) is the caller's job.

use time::OffsetDateTime;

use nextslot_shared::{BindingKind, DomainBinding, DomainState};

use crate::config::VerificationPolicy;

use super::secrets::BindingSecrets;
use super::verifier::VerificationResult;
use super::{DomainError, DomainResult};

/// Who asked for a verification pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckMode {
    /// Periodic pass or health check; never downgrades a verified binding
    Scheduled,
    /// Tenant explicitly re-checking; may downgrade on a permanent failure
    TenantInitiated,
}

/// Apply a verification result to a binding
pub fn apply_verification(
    current: &DomainBinding,
    result: &VerificationResult,
    mode: CheckMode,
    policy: &VerificationPolicy,
    now: OffsetDateTime,
) -> DomainBinding {
    let mut next = current.clone();

    match current.state {
        DomainState::Pending | DomainState::DnsPartial => {
            next.verification_attempts = current.verification_attempts.saturating_add(1);
            next.last_checked_at = Some(now);
            next.last_messages = result.messages.clone();

            if result.fully_verified() {
                next.state = DomainState::Verified;
                next.verified_at = Some(now);
            } else {
                // Transient failures keep the current state
                if !result.has_transient() {
                    next.state = awaiting_state(result);
                }
                if attempts_exhausted(&next, policy, now) {
                    next.state = DomainState::Failed;
                    next.last_messages.push(format!(
                        "Verification stopped after {} attempts. Fix the DNS records above and resubmit the domain.",
                        next.verification_attempts
                    ));
                }
            }
        }
        DomainState::Verified | DomainState::SslActive => {
            next.last_checked_at = Some(now);
            next.last_messages = result.messages.clone();

            let permanent_failure = !result.fully_verified() && !result.has_transient();
            if mode == CheckMode::TenantInitiated && permanent_failure {
                next.state = awaiting_state(result);
                next.verified_at = None;
                next.ssl_activated_at = None;
                next.verification_attempts = 1;
                next.pending_since = now;
            }
        }
        DomainState::Failed | DomainState::Removed => {}
    }

    next
}

/// External TLS-issuance hook: a certificate is live for the hostname
pub fn mark_ssl_active(current: &DomainBinding, now: OffsetDateTime) -> DomainResult<DomainBinding> {
    match current.state {
        DomainState::Verified => {
            let mut next = current.clone();
            next.state = DomainState::SslActive;
            next.ssl_activated_at = Some(now);
            Ok(next)
        }
        DomainState::SslActive => Ok(current.clone()),
        from => Err(DomainError::InvalidTransition {
            from,
            action: "activate SSL for",
        }),
    }
}

/// Tenant removes the binding. Idempotent.
pub fn remove(current: &DomainBinding, now: OffsetDateTime) -> DomainBinding {
    let mut next = current.clone();
    if current.state != DomainState::Removed {
        next.state = DomainState::Removed;
        next.removed_at = Some(now);
        next.is_primary = false;
    }
    next
}

/// Tenant edits and resubmits: fresh secrets and a new verification cycle.
/// The previous token stops being accepted immediately.
///
/// The CNAME target is stored per binding and only changes here, so a
/// binding created before an ingress move keeps checking the old target
/// until it is resubmitted with secrets built from the current platform.
pub fn restart(
    current: &DomainBinding,
    secrets: BindingSecrets,
    now: OffsetDateTime,
) -> DomainResult<DomainBinding> {
    if current.state == DomainState::Removed {
        return Err(DomainError::InvalidTransition {
            from: current.state,
            action: "resubmit",
        });
    }

    let mut next = current.clone();
    next.verification_token = secrets.verification_token;
    next.txt_record_name = secrets.txt_record_name;
    next.cname_target = secrets.cname_target;
    next.verification_attempts = 0;
    next.last_messages = Vec::new();
    next.last_checked_at = None;
    next.ssl_activated_at = None;
    next.pending_since = now;

    if current.kind == BindingKind::Subdomain {
        next.state = DomainState::Verified;
        next.verified_at = Some(now);
    } else {
        next.state = DomainState::Pending;
        next.verified_at = None;
    }
    Ok(next)
}

/// Whether a still-unverified binding has used up its attempts or time
pub fn attempts_exhausted(binding: &DomainBinding, policy: &VerificationPolicy, now: OffsetDateTime) -> bool {
    let attempts = u32::try_from(binding.verification_attempts).unwrap_or(0);
    attempts >= policy.max_attempts || now - binding.pending_since >= policy.max_pending_age
}

fn awaiting_state(result: &VerificationResult) -> DomainState {
    if result.passed_checks() == 1 {
        DomainState::DnsPartial
    } else {
        DomainState::Pending
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::domains::dns::{LookupError, StaticDns};
    use crate::domains::verifier::VerificationEngine;
    use nextslot_shared::{BindingId, TenantId};
    use std::sync::Arc;

    const TOKEN: &str = "m3K8pQ1zR7tV2xW9yA4bC6dE0fG5hJ2k";

    fn pending() -> DomainBinding {
        let now = OffsetDateTime::now_utc();
        DomainBinding {
            id: BindingId::new(),
            tenant_id: TenantId::new(),
            hostname: "okmentor.in".to_string(),
            kind: BindingKind::CustomDomain,
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

    /// Verification result for a DNS setup: (cname configured, txt configured)
    async fn result_for(cname: bool, txt: bool) -> VerificationResult {
        let dns = Arc::new(StaticDns::new());
        if cname {
            dns.set_cname("okmentor.in", "app.nextslot.in");
        }
        if txt {
            dns.set_txt("_bv-okmentor.okmentor.in", &[TOKEN]);
        }
        VerificationEngine::new(dns).verify(&pending()).await
    }

    async fn transient_result() -> VerificationResult {
        let dns = Arc::new(StaticDns::new());
        dns.fail_all("okmentor.in", LookupError::Timeout);
        dns.fail_all("_bv-okmentor.okmentor.in", LookupError::Timeout);
        VerificationEngine::new(dns).verify(&pending()).await
    }

    fn policy() -> VerificationPolicy {
        VerificationPolicy::default()
    }

    fn now() -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }

    #[tokio::test]
    async fn test_pending_progression() {
        let b = pending();

        let next = apply_verification(&b, &result_for(false, false).await, CheckMode::Scheduled, &policy(), now());
        assert_eq!(next.state, DomainState::Pending);
        assert_eq!(next.verification_attempts, 1);
        assert!(next.last_checked_at.is_some());

        let next = apply_verification(&next, &result_for(true, false).await, CheckMode::Scheduled, &policy(), now());
        assert_eq!(next.state, DomainState::DnsPartial);
        assert!(next.verified_at.is_none());

        let next = apply_verification(&next, &result_for(false, true).await, CheckMode::Scheduled, &policy(), now());
        assert_eq!(next.state, DomainState::DnsPartial);

        let next = apply_verification(&next, &result_for(true, true).await, CheckMode::Scheduled, &policy(), now());
        assert_eq!(next.state, DomainState::Verified);
        assert!(next.verified_at.is_some());
    }

    #[tokio::test]
    async fn test_single_check_never_verifies() {
        for (cname, txt) in [(true, false), (false, true)] {
            let next = apply_verification(
                &pending(),
                &result_for(cname, txt).await,
                CheckMode::TenantInitiated,
                &policy(),
                now(),
            );
            assert_ne!(next.state, DomainState::Verified);
            assert_eq!(next.state, DomainState::DnsPartial);
        }
    }

    #[tokio::test]
    async fn test_transient_keeps_state() {
        let mut b = pending();
        b.state = DomainState::DnsPartial;

        let next = apply_verification(&b, &transient_result().await, CheckMode::Scheduled, &policy(), now());
        assert_eq!(next.state, DomainState::DnsPartial);
        assert_eq!(next.verification_attempts, 1);
    }

    #[tokio::test]
    async fn test_fails_after_max_attempts() {
        let mut b = pending();
        b.verification_attempts = 287;

        let next = apply_verification(&b, &result_for(true, false).await, CheckMode::Scheduled, &policy(), now());
        assert_eq!(next.state, DomainState::Failed);
        assert!(next.last_messages.last().unwrap().contains("resubmit"));

        // Failed is left alone by further passes
        let again = apply_verification(&next, &result_for(true, true).await, CheckMode::Scheduled, &policy(), now());
        assert_eq!(again, next);
    }

    #[tokio::test]
    async fn test_fails_after_max_age() {
        let mut b = pending();
        b.pending_since = now() - time::Duration::hours(49);

        let next = apply_verification(&b, &transient_result().await, CheckMode::Scheduled, &policy(), now());
        assert_eq!(next.state, DomainState::Failed);
    }

    #[tokio::test]
    async fn test_scheduled_check_never_downgrades() {
        let verified = apply_verification(&pending(), &result_for(true, true).await, CheckMode::Scheduled, &policy(), now());

        let next = apply_verification(&verified, &result_for(false, false).await, CheckMode::Scheduled, &policy(), now());
        assert_eq!(next.state, DomainState::Verified);
        assert_eq!(next.verified_at, verified.verified_at);

        // Same DNS, same state
        let next = apply_verification(&verified, &result_for(true, true).await, CheckMode::Scheduled, &policy(), now());
        assert_eq!(next.state, DomainState::Verified);
        assert_eq!(next.verification_attempts, verified.verification_attempts);
    }

    #[tokio::test]
    async fn test_tenant_check_downgrades_on_permanent_failure_only() {
        let verified = apply_verification(&pending(), &result_for(true, true).await, CheckMode::Scheduled, &policy(), now());
        let active = mark_ssl_active(&verified, now()).unwrap();

        let next = apply_verification(&active, &transient_result().await, CheckMode::TenantInitiated, &policy(), now());
        assert_eq!(next.state, DomainState::SslActive);

        let next = apply_verification(&active, &result_for(true, false).await, CheckMode::TenantInitiated, &policy(), now());
        assert_eq!(next.state, DomainState::DnsPartial);
        assert!(next.verified_at.is_none());
        assert!(next.ssl_activated_at.is_none());
    }

    #[tokio::test]
    async fn test_ssl_hook_requires_verified() {
        assert!(matches!(
            mark_ssl_active(&pending(), now()),
            Err(DomainError::InvalidTransition { from: DomainState::Pending, .. })
        ));

        let verified = apply_verification(&pending(), &result_for(true, true).await, CheckMode::Scheduled, &policy(), now());
        let active = mark_ssl_active(&verified, now()).unwrap();
        assert_eq!(active.state, DomainState::SslActive);
        assert_eq!(mark_ssl_active(&active, now()).unwrap(), active);
    }

    #[test]
    fn test_remove_is_terminal_and_idempotent() {
        let removed = remove(&pending(), now());
        assert_eq!(removed.state, DomainState::Removed);
        assert!(!removed.is_primary);
        assert!(removed.removed_at.is_some());
        assert_eq!(remove(&removed, now()), removed);

        let secrets = BindingSecrets {
            verification_token: "x".repeat(32),
            txt_record_name: "_bv-okmentor".to_string(),
            cname_target: "app.nextslot.in".to_string(),
        };
        assert!(restart(&removed, secrets, now()).is_err());
    }

    #[test]
    fn test_restart_from_failed() {
        let mut failed = pending();
        failed.state = DomainState::Failed;
        failed.verification_attempts = 288;

        let secrets = BindingSecrets {
            verification_token: "y".repeat(32),
            txt_record_name: "_bv-okmentor".to_string(),
            cname_target: "app.nextslot.in".to_string(),
        };
        let next = restart(&failed, secrets, now()).unwrap();
        assert_eq!(next.state, DomainState::Pending);
        assert_eq!(next.verification_attempts, 0);
        assert_ne!(next.verification_token, failed.verification_token);
    }

    #[tokio::test]
    async fn test_restart_follows_moved_ingress() {
        let mut failed = pending();
        failed.state = DomainState::Failed;

        // Ingress moved after the binding was created
        let dns = Arc::new(StaticDns::new());
        dns.set_cname("okmentor.in", "edge.nextslot.net");
        let engine = VerificationEngine::new(dns);
        assert!(!engine.verify(&failed).await.cname_ok);

        let tenant = nextslot_shared::Tenant::new("okmentor", "OK Mentor");
        let platform = crate::config::PlatformConfig::new("nextslot.in")
            .with_ingress_host("edge.nextslot.net");
        let next = restart(
            &failed,
            crate::domains::secrets::new_binding_secrets(&tenant, &platform),
            now(),
        )
        .unwrap();
        assert_eq!(next.cname_target, "edge.nextslot.net");
        assert!(engine.verify(&next).await.cname_ok);
    }
}
