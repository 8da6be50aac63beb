// Authentication errors

use std::path::PathBuf;
use thiserror::Error;

/// Why a call to the token endpoint did not yield a usable token
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EndpointFailure {
    /// The server answered with a non-success status
    #[error("server rejected request: {status} - {body}")]
    Rejected { status: u16, body: String },

    #[error("request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    /// Success status but the body is not a usable token response
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl EndpointFailure {
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            EndpointFailure::Timeout
        } else {
            EndpointFailure::Network(err.to_string())
        }
    }
}

/// Failures of the authorization handshake and token lifecycle
#[derive(Debug, Error)]
pub enum AuthError {
    /// Token file exists but cannot be read or parsed
    #[error("Failed to read token store {path}: {message}")]
    StoreRead { path: PathBuf, message: String },

    #[error("Failed to write token store {path}: {message}")]
    StoreWrite { path: PathBuf, message: String },

    /// Authorization code exchange failed; the user must retry the login
    #[error("Authorization code exchange failed: {0}")]
    Exchange(EndpointFailure),

    /// Refresh failed; full re-authorization is required
    #[error("Token refresh failed: {0}")]
    Refresh(EndpointFailure),

    #[error("No refresh token available")]
    MissingRefreshToken,

    /// Callback state absent, nothing stored to compare against, or mismatch
    #[error("Invalid state parameter. Possible CSRF attack.")]
    CsrfMismatch,

    #[error("No authorization code received")]
    MissingCode,

    /// The authorization server redirected back with an `error` parameter
    #[error("Authorization server returned error: {0}")]
    Provider(String),
}

pub type Result<T> = std::result::Result<T, AuthError>;
