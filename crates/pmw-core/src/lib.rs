//! Core types and utilities for pluginmanager-web
//!
//! # Modules
//!
//! - `audit`: Bounded in-memory audit trail of administrative actions
//! - `config`: Environment loading and the service configuration file
//! - `error`: Error taxonomy and Result alias
//! - `security`: Token verification and source IP allow-list
//! - `types`: Lifecycle states, actions and other shared types

pub mod audit;
pub mod config;
pub mod error;
pub mod security;
pub mod types;

// Re-exports
pub use audit::{AuditEntry, AuditLog};
pub use config::ServiceConfig;
pub use error::{Error, Result};
pub use security::{IpAllowList, Principal, StaticTokenVerifier, TokenVerifier, Verification};
pub use types::*;
