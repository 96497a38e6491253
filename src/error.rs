//! Error types for the OAuth proxy

use std::io;

use axum::http::StatusCode;
use thiserror::Error;

/// Result type alias for the OAuth proxy
pub type Result<T> = std::result::Result<T, Error>;

/// OAuth proxy errors
#[derive(Error, Debug)]
pub enum Error {
    /// Unknown, expired, already consumed, or owned by another client.
    ///
    /// These cases are deliberately indistinguishable.
    #[error("Not found")]
    NotFound,

    /// Requested scopes exceed the scopes originally granted
    #[error("Invalid scope: {0}")]
    InvalidScope(String),

    /// Upstream token endpoint rejected the exchange or answered garbage.
    ///
    /// Carries no upstream detail; the upstream body is only logged.
    #[error("Failed to exchange authorization code with upstream provider")]
    UpstreamExchange,

    /// Persisted snapshot could not be decrypted or parsed
    #[error("Corrupt token store: {0}")]
    CorruptStore(String),

    /// Snapshot could not be durably written
    #[error("Persistence failure: {0}")]
    Persistence(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// RFC 6749 error code for token endpoint responses
    #[must_use]
    pub fn oauth_error_code(&self) -> &'static str {
        match self {
            Self::NotFound => oauth_codes::INVALID_GRANT,
            Self::InvalidScope(_) => oauth_codes::INVALID_SCOPE,
            Self::UpstreamExchange | Self::Http(_) => oauth_codes::TEMPORARILY_UNAVAILABLE,
            _ => oauth_codes::SERVER_ERROR,
        }
    }

    /// HTTP status an outer router should answer with
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound | Self::InvalidScope(_) => StatusCode::BAD_REQUEST,
            Self::UpstreamExchange | Self::Http(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Standard OAuth 2.0 error codes (RFC 6749 §5.2)
pub mod oauth_codes {
    /// Grant is invalid, expired, revoked, or issued to another client
    pub const INVALID_GRANT: &str = "invalid_grant";
    /// Requested scope exceeds what was granted
    pub const INVALID_SCOPE: &str = "invalid_scope";
    /// Bearer token missing or not resolvable
    pub const INVALID_TOKEN: &str = "invalid_token";
    /// Unexpected condition on the server
    pub const SERVER_ERROR: &str = "server_error";
    /// Upstream dependency unavailable
    pub const TEMPORARILY_UNAVAILABLE: &str = "temporarily_unavailable";
}
