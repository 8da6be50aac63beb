use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::auth::{generate_state, validate_state, AuthManager};
use crate::error::{auth_page, ApiError};

/// Application version from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Cookie carrying the CSRF state between /auth/login and /auth/callback
pub const STATE_COOKIE: &str = "oauth_state";

/// Lifetime of the state cookie in seconds
const STATE_COOKIE_MAX_AGE: u32 = 600;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub auth_manager: Arc<AuthManager>,
}

/// Query parameters the authorization server appends to the redirect URI
#[derive(Debug, Default, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Health check routes
pub fn health_routes() -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
}

/// OAuth routes
pub fn auth_routes(state: AppState) -> Router {
    Router::new()
        .route("/auth/login", get(login_handler))
        .route("/auth/callback", get(callback_handler))
        .route("/auth/status", get(status_handler))
        .route("/auth/logout", get(logout_handler))
        .with_state(state)
}

/// GET / - Simple health check
async fn root_handler() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "message": "OAuth Keeper is running",
        "version": VERSION
    }))
}

/// GET /health - Detailed health check
///
/// Returns detailed health information including timestamp.
async fn health_handler() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
        "version": VERSION
    }))
}

/// GET /auth/login - Start the authorization-code flow
///
/// Stores a fresh state in an HttpOnly cookie and redirects to the
/// authorization server.
async fn login_handler(State(state): State<AppState>) -> Response {
    let csrf_state = generate_state();
    let url = state.auth_manager.client().authorization_url(&csrf_state);

    tracing::info!("Redirecting to authorization server");
    tracing::debug!("Authorization URL: {}", url);

    (
        StatusCode::FOUND,
        [
            (header::LOCATION, url.to_string()),
            (header::SET_COOKIE, state_cookie(&csrf_state)),
        ],
    )
        .into_response()
}

/// GET /auth/callback - Complete the flow
///
/// The state cookie is cleared whatever the outcome.
async fn callback_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<CallbackQuery>,
) -> Response {
    let stored_state = cookie_value(&headers, STATE_COOKIE);
    let outcome = complete_authorization(&state, query, stored_state.as_deref()).await;

    ([(header::SET_COOKIE, clear_state_cookie())], outcome).into_response()
}

async fn complete_authorization(
    state: &AppState,
    query: CallbackQuery,
    stored_state: Option<&str>,
) -> Result<Html<String>, ApiError> {
    if let Some(error) = query.error {
        let detail = match query.error_description {
            Some(desc) => format!("{} ({})", error, desc),
            None => error,
        };
        return Err(ApiError::ProviderError(detail));
    }

    validate_state(query.state.as_deref(), stored_state)?;

    let code = query.code.ok_or(ApiError::MissingCode)?;

    let record = state.auth_manager.handle_authorization_code(&code).await?;
    tracing::info!(
        "Authorization complete, token valid until {}",
        crate::auth::format_expiry(record.expires_at)
    );

    Ok(auth_page(
        "Authentication Successful",
        "Authentication successful. You can close this window now.",
    ))
}

/// GET /auth/status - Whether a valid access token is available
async fn status_handler(State(state): State<AppState>) -> Json<Value> {
    let authenticated = state.auth_manager.is_authenticated().await;
    Json(json!({ "authenticated": authenticated }))
}

/// GET /auth/logout - Forget the stored token
async fn logout_handler(State(state): State<AppState>) -> Result<Response, ApiError> {
    state.auth_manager.logout().await?;
    tracing::info!("Logged out");

    Ok((StatusCode::FOUND, [(header::LOCATION, "/")]).into_response())
}

fn state_cookie(value: &str) -> String {
    format!(
        "{}={}; HttpOnly; Path=/; Max-Age={}; SameSite=Lax",
        STATE_COOKIE, value, STATE_COOKIE_MAX_AGE
    )
}

fn clear_state_cookie() -> String {
    format!("{}=; HttpOnly; Path=/; Max-Age=0; SameSite=Lax", STATE_COOKIE)
}

/// Find a cookie by name across all Cookie headers
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
}
