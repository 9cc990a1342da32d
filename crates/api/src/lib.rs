//! NextSlot API Library
//!
//! Host routing, custom domain binding and DNS verification for tenant
//! booking sites.

pub mod config;
pub mod domains;
pub mod error;
pub mod routes;
pub mod routing;
pub mod state;
pub mod telemetry;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use routing::{DirectoryIndex, DomainCache, HostResolver, TenantMatch};
pub use state::AppState;
