//! NextSlot Shared Types and Utilities
//!
//! This crate contains the tenant and domain binding types, errors, and database
//! helpers shared by the NextSlot API server and background worker.

pub mod db;
pub mod error;
pub mod types;

pub use db::*;
pub use error::*;
pub use types::*;
