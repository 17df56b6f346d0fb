//! Error types for the core crate.

use thiserror::Error;

/// Core error type surfaced by the ledger.
///
/// Each variant maps to exactly one wire-level error code; the HTTP
/// adapter owns the status-code mapping.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Schema or bounds violation in a request payload.
    #[error("{0}")]
    Validation(String),

    /// Missing or unknown API key.
    #[error("Missing or invalid API key")]
    Unauthorized,

    /// Key belongs to a different agent, or the agent is soft-deleted.
    #[error("{0}")]
    Forbidden(String),

    /// Agent, trace, webhook, or endorsement id unknown.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// `(agent_id, trace_hash)` or `(endorser, target)` already exists.
    #[error("{0}")]
    Duplicate(String),

    /// Non-idempotent operation raced with another writer.
    #[error("{0}")]
    Conflict(String),

    /// Sliding-window rate limiter tripped.
    #[error("Rate limit exceeded: max {limit} requests per {window_secs}s")]
    RateLimited {
        /// Requests allowed per window.
        limit: u32,
        /// Window length in seconds.
        window_secs: u64,
        /// Seconds until the oldest request ages out.
        retry_after_secs: u64,
    },

    /// Malformed signing key or unusable configuration; fatal at startup.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transient storage failure mid-request.
    #[error("Storage error: {0}")]
    Storage(#[source] anyhow::Error),

    /// Webhook delivery exhausted its retries. Logged, never surfaced.
    #[error("Dispatch failed: {0}")]
    Dispatch(String),
}

impl CoreError {
    /// Short, stable code string reported to callers.
    pub const fn code(&self) -> &'static str {
        match self {
            CoreError::Validation(_) => "validation_error",
            CoreError::Unauthorized => "unauthorized",
            CoreError::Forbidden(_) => "forbidden",
            CoreError::NotFound(_) => "not_found",
            CoreError::Duplicate(_) => "duplicate",
            CoreError::Conflict(_) => "conflict",
            CoreError::RateLimited { .. } => "rate_limited",
            CoreError::Config(_) => "config_error",
            CoreError::Storage(_) => "storage_error",
            CoreError::Dispatch(_) => "dispatch_error",
        }
    }

    /// Wrap a storage-layer failure.
    pub fn storage(err: impl Into<anyhow::Error>) -> Self {
        CoreError::Storage(err.into())
    }
}

/// Result type alias for CoreError.
pub type Result<T> = std::result::Result<T, CoreError>;
