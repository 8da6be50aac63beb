// Authentication types

use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Subtracted from every server-reported lifetime so a token is never used
/// within the last minute before it really expires
pub const SAFETY_MARGIN_MS: i64 = 60_000;

/// Lifetime assumed when the token endpoint omits `expires_in`
pub const DEFAULT_EXPIRES_IN_SECS: u64 = 3600;

/// Scheme label assumed when the token endpoint omits `token_type`
pub const DEFAULT_TOKEN_TYPE: &str = "Bearer";

/// Current wall-clock time in epoch milliseconds
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Render an epoch-millisecond expiry as RFC 3339 for logs and status output
pub fn format_expiry(expires_at: i64) -> String {
    Utc.timestamp_millis_opt(expires_at)
        .single()
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| expires_at.to_string())
}

/// The single persisted credential
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub access_token: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// Epoch milliseconds after which `access_token` is treated as invalid
    pub expires_at: i64,

    #[serde(default = "default_token_type")]
    pub token_type: String,
}

fn default_token_type() -> String {
    DEFAULT_TOKEN_TYPE.to_string()
}

impl TokenRecord {
    /// Build a complete record from a token endpoint response.
    ///
    /// `issued_at` is the instant the response was received. When the server
    /// does not rotate the refresh token, `previous_refresh_token` is carried
    /// forward unchanged; a new one always replaces the old.
    pub fn from_response(
        response: TokenResponse,
        issued_at: i64,
        previous_refresh_token: Option<&str>,
    ) -> Self {
        let expires_in = response.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS);
        let refresh_token = response
            .refresh_token
            .filter(|t| !t.is_empty())
            .or_else(|| previous_refresh_token.map(str::to_string));

        Self {
            access_token: response.access_token,
            refresh_token,
            expires_at: expires_at_from(issued_at, expires_in),
            token_type: response
                .token_type
                .filter(|t| !t.is_empty())
                .unwrap_or_else(default_token_type),
        }
    }

    /// Whether the access token may still be used at `now` (epoch ms)
    pub fn is_fresh_at(&self, now: i64) -> bool {
        now < self.expires_at
    }

    pub fn is_fresh(&self) -> bool {
        self.is_fresh_at(now_millis())
    }

    /// Refresh token, if one is present and non-empty
    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref().filter(|t| !t.is_empty())
    }
}

/// Expiry instant for a token issued at `issued_at` with a lifetime of `expires_in` seconds
pub fn expires_at_from(issued_at: i64, expires_in: u64) -> i64 {
    let lifetime_ms = i64::try_from(expires_in)
        .unwrap_or(i64::MAX / 1000)
        .saturating_mul(1000);
    issued_at
        .saturating_add(lifetime_ms)
        .saturating_sub(SAFETY_MARGIN_MS)
}

/// Token endpoint response (both grants)
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<u64>,
    pub token_type: Option<String>,
}

/// Remote authorization server endpoints
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthEndpoints {
    pub login_url: String,
    pub token_url: String,
}

impl OAuthEndpoints {
    /// Derive the login and token endpoints from an API base URL
    pub fn from_base_url(base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            login_url: format!("{}/v2/oauth2/login", base),
            token_url: format!("{}/v2/oauth2/token", base),
        }
    }
}

/// Client registration used against the token endpoint
#[derive(Debug, Clone)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub scope: String,
}

/// Mask a token for logging, keeping only a short prefix and suffix
pub fn mask_token(token: &str) -> String {
    const PREFIX: usize = 6;
    const SUFFIX: usize = 4;

    let trimmed = token.trim();
    let len = trimmed.chars().count();
    if len <= PREFIX + SUFFIX {
        return "*".repeat(len.min(8));
    }

    let prefix: String = trimmed.chars().take(PREFIX).collect();
    let suffix: String = trimmed.chars().skip(len - SUFFIX).collect();
    format!("{}...{}", prefix, suffix)
}
