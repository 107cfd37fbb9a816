//! Shared data model for the Apogee proxy.
//!
//! This crate holds the types that cross crate boundaries: account records,
//! quota cache entries, runtime configuration and the unified error type.
//! It deliberately contains no I/O so that both the core engine and the
//! server binary can depend on it without pulling in the HTTP stack.

pub mod account;
pub mod catalog;
pub mod config;
pub mod error;
pub mod quota;

pub use account::{Account, AccountStatus, AddOutcome, CredentialSeed};
pub use catalog::{ModelCard, ModelFamily, MODEL_CATALOG};
pub use config::ProxyConfig;
pub use error::ProxyError;
pub use quota::{AccountQuotaSnapshot, ModelQuota, QuotaEntry, QuotaStatus};

/// Standard Result type using ProxyError.
pub type Result<T> = std::result::Result<T, ProxyError>;
