//! Unified error type for proxy operations.
//!
//! Each variant corresponds to one row of the error policy table: it knows
//! its HTTP status and how to render itself in either client dialect.

use serde_json::{json, Value};
use thiserror::Error;

/// Errors surfaced by the dispatch engine and its collaborators.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProxyError {
    /// Upstream returned 429 for one account. Handled inside the dispatcher
    /// by rotating accounts; only escapes when the pool is exhausted.
    #[error("rate limited by upstream{}", retry_after_secs.map(|s| format!(", retry after {s}s")).unwrap_or_default())]
    RateLimited {
        /// Upstream retry hint in seconds, when the error body carried one.
        retry_after_secs: Option<u64>,
    },

    /// Every candidate account is cooling down or all failover attempts
    /// returned 429.
    #[error("all accounts are rate limited, retry after {retry_after_secs}s")]
    RateLimitExhausted {
        /// Seconds until the earliest cooldown expires (≥ 1).
        retry_after_secs: u64,
    },

    /// OAuth token refresh failed; the account has been marked `error`.
    #[error("token refresh failed for {email}: {message}")]
    AuthRefreshFailed { email: String, message: String },

    /// The account pool is empty.
    #[error("no accounts configured")]
    NoAccounts,

    /// Every upstream base URL failed with a network error or 5xx.
    #[error("all upstream endpoints failed: {message}")]
    BadGateway { message: String },

    /// Upstream returned a non-retryable error status; forwarded as-is.
    #[error("upstream returned {status}: {message}")]
    Upstream { status: u16, message: String },

    /// The client request could not be parsed or validated.
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    /// Unexpected internal state.
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl ProxyError {
    /// HTTP status to surface to the client.
    pub fn http_status(&self) -> u16 {
        match *self {
            Self::RateLimited { .. } | Self::RateLimitExhausted { .. } => 429,
            Self::AuthRefreshFailed { .. } => 401,
            Self::NoAccounts => 503,
            Self::BadGateway { .. } => 502,
            Self::Upstream { status, .. } => status,
            Self::InvalidRequest { .. } => 400,
            Self::Internal { .. } => 500,
        }
    }

    /// `Retry-After` value in seconds, when this error warrants the header.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match *self {
            Self::RateLimitExhausted { retry_after_secs } => Some(retry_after_secs),
            Self::RateLimited { retry_after_secs } => retry_after_secs,
            _ => None,
        }
    }

    /// Render as an OpenAI-dialect error body.
    pub fn openai_body(&self) -> Value {
        let (error_type, code) = openai_error_kind(self.http_status());
        json!({
            "error": {
                "message": self.to_string(),
                "type": error_type,
                "param": null,
                "code": code,
            }
        })
    }

    /// Render as an Anthropic-dialect error body.
    pub fn anthropic_body(&self) -> Value {
        json!({
            "type": "error",
            "error": {
                "type": anthropic_error_type(self.http_status()),
                "message": self.to_string(),
            }
        })
    }
}

/// Status → OpenAI `(type, code)` mapping.
pub fn openai_error_kind(status: u16) -> (&'static str, &'static str) {
    match status {
        400 => ("invalid_request_error", "invalid_request_error"),
        401 => ("authentication_error", "invalid_api_key"),
        403 => ("permission_error", "permission_denied"),
        404 => ("invalid_request_error", "not_found"),
        429 => ("rate_limit_error", "rate_limit_exceeded"),
        _ => ("server_error", "server_error"),
    }
}

/// Status → Anthropic error type mapping.
pub fn anthropic_error_type(status: u16) -> &'static str {
    match status {
        400 => "invalid_request_error",
        401 => "authentication_error",
        403 => "permission_error",
        404 => "not_found_error",
        429 => "rate_limit_error",
        529 => "overloaded_error",
        500 | 502 | 503 => "api_error",
        _ => "api_error",
    }
}
