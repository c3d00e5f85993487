use serde::Serialize;
use thiserror::Error;

use crate::tables::ObjectKind;

#[derive(Error, Debug)]
pub enum TreeplexError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Persistence error: {0}")]
    Persistence(String),
    #[error("Sanitization rejected {kind}.{field}: {value_type} value ({reason})")]
    SanitizationRejected {
        kind: ObjectKind,
        field: String,
        value_type: &'static str,
        reason: String,
    },
    #[error("Tenant not found: {0}")]
    TenantNotFound(String),
    #[error("Tenant conflict: {0}")]
    TenantConflict(String),
    #[error("Invalid tenant: {0}")]
    InvalidTenant(String),
    #[error("Tenant {0} is still registered, deregister it before destroying its storage")]
    TenantStillRegistered(String),
    #[error("Capability unavailable: {0}")]
    CapabilityUnavailable(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Lock poisoned: {0}")]
    Lock(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TreeplexError>;

// Helper conversions
impl From<rusqlite::Error> for TreeplexError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Persistence(e.to_string())
    }
}
impl From<config::ConfigError> for TreeplexError {
    fn from(e: config::ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}
impl<T> From<std::sync::PoisonError<T>> for TreeplexError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        Self::Lock(e.to_string())
    }
}

/// Conditions that lower a capability tier or leave SQL text untouched.
///
/// These are recorded (provisioning reports, rewrite observers) and never
/// returned as an `Err`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "condition", rename_all = "snake_case")]
pub enum Degradation {
    RewriteAmbiguous { table: String, offset: usize },
    ExtensionUnavailable { extension: String, message: String },
    InsufficientPrivilege { extension: String, message: String },
}
