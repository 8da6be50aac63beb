// Interactive CLI login: authorization redirect + local callback listener

use anyhow::{Context, Result};
use std::time::Duration;
use url::Url;

use crate::auth::{generate_state, validate_state, AuthError, AuthManager, TokenRecord};
use crate::callback::{CallbackListener, CallbackPayload};

/// Run the authorization-code flow end to end and persist the token.
///
/// `announce` receives the authorization URL the user has to open.
pub async fn run_login_flow<F>(
    manager: &AuthManager,
    callback_port: u16,
    callback_timeout: Duration,
    announce: F,
) -> Result<TokenRecord>
where
    F: FnOnce(&Url),
{
    let redirect_uri = &manager.client().credentials().redirect_uri;
    let callback_path = Url::parse(redirect_uri)
        .with_context(|| format!("Invalid redirect URI: {}", redirect_uri))?
        .path()
        .to_string();

    // Bind before announcing the URL so a fast redirect cannot miss the listener
    let listener = CallbackListener::bind(callback_port, &callback_path).await?;

    let state = generate_state();
    announce(&manager.client().authorization_url(&state));

    tracing::info!("Waiting for authentication...");
    let payload = listener.wait_for_callback(callback_timeout).await?;
    let code = authorization_code(&payload, &state)?;

    tracing::info!("Authorization code received, exchanging for token...");
    let record = manager
        .handle_authorization_code(&code)
        .await
        .context("Authentication failed")?;

    Ok(record)
}

/// Check a callback payload and extract the authorization code.
///
/// State is validated before anything else is trusted.
fn authorization_code(payload: &CallbackPayload, expected_state: &str) -> Result<String, AuthError> {
    validate_state(payload.state.as_deref(), Some(expected_state))?;

    if let Some(error) = &payload.error {
        let detail = match &payload.error_description {
            Some(desc) => format!("{} ({})", error, desc),
            None => error.clone(),
        };
        return Err(AuthError::Provider(detail));
    }

    payload.code.clone().ok_or(AuthError::MissingCode)
}
