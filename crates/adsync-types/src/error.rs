//! Structured error model shared by every stage of the ETL core.
//!
//! [`EtlError`] carries classification and retry metadata so the
//! orchestrator's retry loop and the per-table failure policy can react
//! without string matching. Construct via the category-specific factory
//! methods.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Broad classification of an ETL error.
///
/// Determines default retry behavior and how the failure is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Malformed configuration: bad YAML, unknown step, unknown load mode,
    /// circular dependency. Detected at startup, never retryable.
    Config,
    /// Token missing or refresh failure.
    Auth,
    /// Rate limit exceeded (retryable, slow backoff, may carry Retry-After).
    RateLimit,
    /// Transient network error: timeout, reset, HTTP 5xx (retryable).
    TransientNetwork,
    /// Transient warehouse error (retryable).
    TransientDb,
    /// Invalid payload: un-coercible types, constraint violation, missing pk.
    Data,
    /// A driver-key query came back empty or an upstream platform failed.
    Dependency,
    /// Orchestrator-internal invariant violation.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Config => "config",
            Self::Auth => "auth",
            Self::RateLimit => "rate_limit",
            Self::TransientNetwork => "transient_network",
            Self::TransientDb => "transient_db",
            Self::Data => "data",
            Self::Dependency => "dependency",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Retry backoff scale hint attached to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffClass {
    /// Second-scale retry.
    Normal,
    /// Minute-scale retry (rate limits).
    Slow,
}

/// Structured error from any ETL stage.
///
/// Carries classification and retry metadata. Construct via the
/// category-specific factory methods (e.g. [`EtlError::config`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("[{category}] {code}: {message}")]
pub struct EtlError {
    pub category: ErrorCategory,
    pub code: String,
    pub message: String,
    pub retryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
    pub backoff_class: BackoffClass,
}

impl EtlError {
    fn new(
        category: ErrorCategory,
        retryable: bool,
        backoff_class: BackoffClass,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
            retryable,
            retry_after_ms: None,
            backoff_class,
        }
    }

    /// Configuration error (not retryable).
    #[must_use]
    pub fn config(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Config, false, BackoffClass::Normal, code, message)
    }

    /// Authentication error. Not retryable by itself, but it counts against
    /// the owning platform's retry budget.
    #[must_use]
    pub fn auth(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Auth, false, BackoffClass::Normal, code, message)
    }

    /// Rate-limit error (retryable, slow backoff, optional Retry-After).
    #[must_use]
    pub fn rate_limit(
        code: impl Into<String>,
        message: impl Into<String>,
        retry_after_ms: Option<u64>,
    ) -> Self {
        let mut err = Self::new(ErrorCategory::RateLimit, true, BackoffClass::Slow, code, message);
        err.retry_after_ms = retry_after_ms;
        err
    }

    /// Transient network error (retryable).
    #[must_use]
    pub fn transient_network(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::TransientNetwork, true, BackoffClass::Normal, code, message)
    }

    /// Transient warehouse error (retryable).
    #[must_use]
    pub fn transient_db(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::TransientDb, true, BackoffClass::Normal, code, message)
    }

    /// Data error (not retryable; fails the current table load).
    #[must_use]
    pub fn data(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Data, false, BackoffClass::Normal, code, message)
    }

    /// Dependency error: the dependent table or platform is skipped.
    #[must_use]
    pub fn dependency(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Dependency, false, BackoffClass::Normal, code, message)
    }

    /// Internal invariant violation (aborts the run).
    #[must_use]
    pub fn internal(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Internal, false, BackoffClass::Normal, code, message)
    }

    /// First line of the message, for platform-level summaries.
    #[must_use]
    pub fn first_line(&self) -> &str {
        self.message.lines().next().unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_is_terminal() {
        let err = EtlError::config("UNKNOWN_STEP", "no such processing step: frobnicate");
        assert_eq!(err.category, ErrorCategory::Config);
        assert!(!err.retryable);
    }

    #[test]
    fn transient_errors_are_retryable() {
        assert!(EtlError::transient_network("TIMEOUT", "timed out").retryable);
        assert!(EtlError::transient_db("DEADLOCK", "deadlock detected").retryable);
        assert!(!EtlError::data("BAD_TYPE", "cannot coerce").retryable);
    }

    #[test]
    fn rate_limit_carries_retry_after() {
        let err = EtlError::rate_limit("THROTTLED", "HTTP 429", Some(30_000));
        assert!(err.retryable);
        assert_eq!(err.retry_after_ms, Some(30_000));
        assert_eq!(err.backoff_class, BackoffClass::Slow);
    }

    #[test]
    fn display_format() {
        let err = EtlError::auth("TOKEN_EXPIRED", "refresh failed");
        assert_eq!(err.to_string(), "[auth] TOKEN_EXPIRED: refresh failed");
    }

    #[test]
    fn first_line_truncates_multiline_messages() {
        let err = EtlError::data("SHAPE", "bad shape\ncolumn detail\nmore");
        assert_eq!(err.first_line(), "bad shape");
    }

    #[test]
    fn serde_roundtrip() {
        let err = EtlError::rate_limit("THROTTLED", "slow down", Some(5000));
        let json = serde_json::to_string(&err).unwrap();
        let back: EtlError = serde_json::from_str(&json).unwrap();
        assert_eq!(err, back);
    }
}
