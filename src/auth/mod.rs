// Authentication module
// OAuth2 authorization-code handshake and token lifecycle

mod client;
pub mod csrf;
mod error;
mod manager;
mod store;
mod types;

pub use client::{build_authorization_url, OAuthClient};
pub use csrf::{generate_state, validate_state};
pub use error::{AuthError, EndpointFailure};
pub use manager::AuthManager;
pub use store::TokenStore;
pub use types::{
    expires_at_from, format_expiry, mask_token, now_millis, ClientCredentials, OAuthEndpoints,
    TokenRecord, TokenResponse, SAFETY_MARGIN_MS,
};
