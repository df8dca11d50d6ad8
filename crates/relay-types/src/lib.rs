//! Shared error types for the Relay orchestration engine.
//!
//! This crate provides the foundational types used across all other Relay crates:
//! - `RelayError`: unified error taxonomy
//! - `FailureRecord`: one exhausted fallback candidate

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// FailureRecord
// ---------------------------------------------------------------------------

/// Why a single backend/model candidate failed during a fallback walk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub backend: String,
    pub model: String,
    pub message: String,
}

impl FailureRecord {
    pub fn new(
        backend: impl Into<String>,
        model: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            backend: backend.into(),
            model: model.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FailureRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}: {}", self.backend, self.model, self.message)
    }
}

fn format_failures(failures: &[FailureRecord]) -> String {
    let mut out = format!("All {} fallback candidates failed:", failures.len());
    for record in failures {
        out.push_str("\n  ");
        out.push_str(&record.to_string());
    }
    out
}

fn code_suffix(code: &Option<String>) -> String {
    code.as_deref()
        .map(|c| format!(" [{c}]"))
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// RelayError
// ---------------------------------------------------------------------------

/// Unified error type for all Relay subsystems.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    // === Registry / request errors ===
    #[error("Backend '{backend}' is not registered")]
    BackendNotFound { backend: String },

    #[error("Tool '{tool}' is not registered")]
    ToolNotFound { tool: String },

    #[error("No backend/model given and no fallbacks configured")]
    NoFallbacksConfigured,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    Config(String),

    // === Backend errors ===
    #[error("Provider {provider} returned HTTP {status}: {message}")]
    ProviderError {
        provider: String,
        status: u16,
        message: String,
        retryable: bool,
    },

    #[error("Rate limited by {provider}, retry after {retry_after_ms}ms")]
    RateLimited {
        provider: String,
        retry_after_ms: u64,
    },

    #[error("Authentication failed for provider {provider}")]
    AuthError { provider: String },

    #[error("Request to {provider} timed out after {timeout_ms}ms")]
    RequestTimeout {
        provider: String,
        timeout_ms: u64,
    },

    #[error("Context length exceeded for {provider}: {message}")]
    ContextLengthExceeded { provider: String, message: String },

    /// A backend reported failure through an `error` event instead of raising.
    #[error("Stream error{}: {message}", code_suffix(.code))]
    StreamError {
        message: String,
        code: Option<String>,
    },

    #[error("Event stream ended without a terminal event")]
    IncompleteStream,

    // === Orchestration errors ===
    #[error("{}", format_failures(.failures))]
    AggregateFailure { failures: Vec<FailureRecord> },

    #[error("Tool '{tool}' error: {message}")]
    ToolError { tool: String, message: String },

    #[error("Request cancelled")]
    Cancelled,

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl RelayError {
    /// Returns `true` if the error is transient and the operation may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RelayError::RateLimited { .. }
                | RelayError::RequestTimeout { .. }
                | RelayError::ProviderError { retryable: true, .. }
        )
    }

    /// Returns `true` if the call was cancelled. This is the only error that
    /// ends a fallback walk early; every other failure is recorded against
    /// its candidate.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RelayError::Cancelled)
    }

    /// The ordered failure list when every candidate of a chain failed.
    pub fn failures(&self) -> Option<&[FailureRecord]> {
        match self {
            RelayError::AggregateFailure { failures } => Some(failures),
            _ => None,
        }
    }

    /// Maps the error to an HTTP status code for the framed transport.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            RelayError::RateLimited { .. } => Some(429),
            RelayError::AuthError { .. } => Some(401),
            RelayError::ProviderError { status, .. } if *status > 0 => Some(*status),
            RelayError::RequestTimeout { .. } => Some(504),
            RelayError::BackendNotFound { .. }
            | RelayError::ToolNotFound { .. }
            | RelayError::NoFallbacksConfigured
            | RelayError::InvalidRequest(_) => Some(400),
            RelayError::ContextLengthExceeded { .. } => Some(413),
            RelayError::AggregateFailure { .. } => Some(502),
            _ => None,
        }
    }
}

/// A convenience alias for `Result<T, RelayError>`.
pub type Result<T> = std::result::Result<T, RelayError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
