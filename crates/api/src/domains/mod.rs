//! Custom domain ownership and verification
//!
//! - `secrets`: per-binding verification token and TXT record name
//! - `dns` / `verifier`: CNAME + TXT checks against public DNS
//! - `lifecycle`: Pending -> DnsPartial -> Verified -> SslActive, Failed, Removed
//! - `store` / `pg_store`: persistence with compare-and-swap writes
//! - `service`: the operations used by the HTTP handlers and the worker

pub mod dns;
mod error;
pub mod hostname;
pub mod lifecycle;
pub mod pg_store;
pub mod secrets;
pub mod service;
pub mod store;
pub mod verifier;

pub use dns::{DnsLookup, LookupError, StaticDns, TrustDnsLookup};
pub use error::{DomainError, DomainResult, StoreError};
pub use lifecycle::CheckMode;
pub use pg_store::PgBindingStore;
pub use secrets::{new_binding_secrets, BindingSecrets};
pub use service::{
    BindingWithInstructions, CheckReport, DnsInstructions, DnsRecord, DomainService, PassSummary,
};
pub use store::{BindingStore, MemoryBindingStore};
pub use verifier::{CheckOutcome, RecordCheck, VerificationEngine, VerificationResult};
