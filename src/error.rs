//! Error types for Tabmate
//!
//! This module defines all error types used throughout the library,
//! using `thiserror` for ergonomic error handling, plus the closed
//! UI-facing error taxonomy and the classifier that maps any internal
//! failure into it.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for Tabmate operations
///
/// This enum encompasses all possible errors that can occur during
/// configuration loading, backend calls, session persistence, and
/// secret encryption.
#[derive(Error, Debug)]
pub enum TabmateError {
    /// Configuration-related errors (invalid or disabled configuration)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transport-level network failures (connect, timeout, DNS)
    #[error("Network error: {0}")]
    Network(String),

    /// Backend rejected a call with an HTTP-equivalent status
    #[error("Backend error: status={status}, {message}")]
    Backend {
        /// HTTP-equivalent status code reported by the backend
        status: u16,
        /// Additional message from the backend response body
        message: String,
    },

    /// Authentication failures (invalid or expired credential)
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Session storage errors (substrate operations, quota, serialization)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Authenticated decryption failed (tampered or wrong-key data)
    #[error("Decryption failed: authentication tag did not verify")]
    Decryption,

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type alias for Tabmate operations
///
/// This is a convenience alias that uses `anyhow::Error` as the error type,
/// allowing for rich error context and easy error propagation.
pub type Result<T> = anyhow::Result<T>;

/// Closed UI-facing error taxonomy
///
/// Every failure from the gateway or store is mapped into exactly one of
/// these kinds before reaching the observable state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Transport failed to reach the backend
    Network,
    /// Credentials were rejected (401/403)
    Authentication,
    /// The request was malformed (400)
    Validation,
    /// The backend rate limit was hit (429)
    ApiLimit,
    /// The local configuration is missing, invalid, or disabled
    Configuration,
    /// Anything that does not match a more specific kind
    Unknown,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Network => "network",
            Self::Authentication => "authentication",
            Self::Validation => "validation",
            Self::ApiLimit => "api_limit",
            Self::Configuration => "configuration",
            Self::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

impl ErrorKind {
    /// Classifies an `anyhow` error by downcasting to [`TabmateError`].
    ///
    /// Errors that are not a `TabmateError` classify as `Unknown`.
    pub fn of(error: &anyhow::Error) -> Self {
        error
            .downcast_ref::<TabmateError>()
            .map(classify)
            .unwrap_or(ErrorKind::Unknown)
    }
}

/// Maps a [`TabmateError`] into the closed [`ErrorKind`] taxonomy.
///
/// The classification is pure and deterministic: a network-style failure
/// always yields `Network`; HTTP-equivalent 401/403 yields `Authentication`;
/// 429 yields `ApiLimit`; 400 yields `Validation`; configuration failures
/// yield `Configuration`; everything else yields `Unknown`.
///
/// # Examples
///
/// ```
/// use tabmate::error::{classify, ErrorKind, TabmateError};
///
/// let err = TabmateError::Backend { status: 429, message: "slow down".into() };
/// assert_eq!(classify(&err), ErrorKind::ApiLimit);
/// ```
pub fn classify(error: &TabmateError) -> ErrorKind {
    match error {
        TabmateError::Network(_) => ErrorKind::Network,
        TabmateError::Http(e) if e.is_connect() || e.is_timeout() => ErrorKind::Network,
        TabmateError::Http(e) => match e.status().map(|s| s.as_u16()) {
            Some(401) | Some(403) => ErrorKind::Authentication,
            Some(429) => ErrorKind::ApiLimit,
            Some(400) => ErrorKind::Validation,
            _ => ErrorKind::Unknown,
        },
        TabmateError::Backend { status, .. } => match status {
            401 | 403 => ErrorKind::Authentication,
            429 => ErrorKind::ApiLimit,
            400 => ErrorKind::Validation,
            _ => ErrorKind::Unknown,
        },
        TabmateError::Authentication(_) => ErrorKind::Authentication,
        TabmateError::Config(_) => ErrorKind::Configuration,
        _ => ErrorKind::Unknown,
    }
}
