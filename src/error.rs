// Error handling module
// Defines HTTP-facing errors for the /auth routes and their page rendering

use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use thiserror::Error;

use crate::auth::AuthError;

/// Errors surfaced by the /auth routes
#[derive(Error, Debug)]
pub enum ApiError {
    /// Authorization server redirected back with an error
    #[error("Error: {0}")]
    ProviderError(String),

    /// Callback state did not match the one issued at login
    #[error("Invalid state parameter. Possible CSRF attack.")]
    InvalidState,

    #[error("No authorization code received.")]
    MissingCode,

    /// Code exchange rejected or failed
    #[error("Error exchanging code for token: {0}")]
    ExchangeFailed(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::CsrfMismatch => ApiError::InvalidState,
            AuthError::MissingCode => ApiError::MissingCode,
            AuthError::Provider(msg) => ApiError::ProviderError(msg),
            AuthError::Exchange(failure) => ApiError::ExchangeFailed(failure.to_string()),
            other => ApiError::Internal(anyhow::Error::new(other)),
        }
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::ProviderError(_) | ApiError::MissingCode => StatusCode::BAD_REQUEST,
            ApiError::InvalidState => StatusCode::FORBIDDEN,
            ApiError::ExchangeFailed(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ApiError::InvalidState => {
                tracing::warn!("Rejected OAuth callback: state mismatch");
                self.to_string()
            }
            ApiError::Internal(err) => {
                // Log internal errors
                tracing::error!("Internal error: {:?}", err);
                "Internal server error".to_string()
            }
            other => {
                tracing::error!("Authentication error: {}", other);
                other.to_string()
            }
        };

        (status, auth_page("Authentication Error", &message)).into_response()
    }
}

/// Minimal HTML page for the browser-facing auth routes
pub fn auth_page(title: &str, message: &str) -> Html<String> {
    Html(format!(
        "<html>\n  <head><title>{title}</title></head>\n  <body>\n    <h1>{title}</h1>\n    <p>{}</p>\n    <p><a href=\"/\">Return to home</a></p>\n  </body>\n</html>\n",
        escape_html(message),
        title = escape_html(title),
    ))
}

/// Escape text for inclusion in HTML
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}
