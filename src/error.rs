//! Error types for the context fixture.
//!
//! None of these are recoverable inside a test. They exist so a failure names the
//! context role and the operation that was in flight.

use crate::types::ContextRole;
use std::time::Duration;
use thiserror::Error;

/// Storage backend errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to open store at {location}: {message}")]
    Open { location: String, message: String },

    #[error("Failed to wipe store at {location}: {message}")]
    Wipe { location: String, message: String },

    #[error("Record encoding failed: {0}")]
    Encoding(String),

    #[error("Storage I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Credential backend errors
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("Credential backend error for account '{account}': {message}")]
    Backend { account: String, message: String },

    #[error("Unmet credential expectations: {}", .0.join(", "))]
    UnmetExpectations(Vec<String>),
}

/// Harness errors surfaced to tests
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("Storage could not be opened during {operation}: {source}")]
    Open {
        operation: String,
        #[source]
        source: StorageError,
    },

    #[error("Storage could not be wiped during {operation}: {source}")]
    Wipe {
        operation: String,
        #[source]
        source: StorageError,
    },

    #[error(
        "{operation} timed out after {timeout:?} with {outstanding} unit(s) outstanding (busy lanes: {})",
        format_roles(.busy)
    )]
    Timeout {
        operation: String,
        timeout: Duration,
        outstanding: usize,
        busy: Vec<ContextRole>,
    },

    #[error("Protocol violation on {role} context during {operation}: {detail}")]
    ProtocolViolation {
        role: ContextRole,
        operation: String,
        detail: String,
    },

    #[error("Unit on {role} lane panicked: {message}")]
    TaskPanicked { role: ContextRole, message: String },

    #[error("Contexts are not prepared (operation: {operation}); call prepare_for_test first")]
    NotPrepared { operation: String },

    #[error("Cache for {role} context is not set up; call set_up_caches first")]
    CacheNotSetUp { role: ContextRole },

    #[error("Cache I/O error for {role} context: {source}")]
    Cache {
        role: ContextRole,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to start {role} lane: {source}")]
    Lane {
        role: ContextRole,
        #[source]
        source: std::io::Error,
    },

    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<config::ConfigError> for HarnessError {
    fn from(err: config::ConfigError) -> Self {
        HarnessError::Config(err.to_string())
    }
}

fn format_roles(roles: &[ContextRole]) -> String {
    if roles.is_empty() {
        return "none".to_string();
    }
    roles
        .iter()
        .map(|r| r.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
