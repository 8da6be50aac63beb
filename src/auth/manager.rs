use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

use super::client::OAuthClient;
use super::error::AuthError;
use super::store::TokenStore;
use super::types::{format_expiry, mask_token, TokenRecord};

/// Authentication manager
/// Hands out a currently-valid access token, refreshing the stored credential
/// when it has expired. At most one refresh is in flight at a time.
pub struct AuthManager {
    /// Persisted token record
    store: TokenStore,

    /// Token endpoint client
    client: OAuthClient,

    /// Serializes load-check-refresh-save and keeps the last refresh outcome
    /// for callers that queued behind it
    last_refresh: Mutex<Option<TokenRecord>>,

    /// Incremented every time a refresh attempt completes
    refresh_generation: AtomicU64,
}

impl AuthManager {
    pub fn new(store: TokenStore, client: OAuthClient) -> Self {
        Self {
            store,
            client,
            last_refresh: Mutex::new(None),
            refresh_generation: AtomicU64::new(0),
        }
    }

    pub fn client(&self) -> &OAuthClient {
        &self.client
    }

    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    /// Get a valid access token, refreshing if necessary.
    ///
    /// Returns `None` when no credential is stored, when the stored token is
    /// expired without a refresh token, or when the refresh fails. A failed
    /// refresh leaves the stored record in place.
    pub async fn get_valid_access_token(&self) -> Option<String> {
        let observed = self.refresh_generation.load(Ordering::Acquire);

        let Some(record) = self.store.load() else {
            tracing::debug!("No token found in storage");
            return None;
        };

        if record.is_fresh() {
            return Some(record.access_token);
        }

        tracing::info!(
            "Token expired at {}, attempting to refresh",
            format_expiry(record.expires_at)
        );

        if record.refresh_token().is_none() {
            tracing::warn!("No refresh token available; re-authorization required");
            return None;
        }

        self.refresh_serialized(observed).await
    }

    /// Whether a valid access token can currently be obtained
    pub async fn is_authenticated(&self) -> bool {
        self.get_valid_access_token().await.is_some()
    }

    /// Exchange an authorization code and persist the resulting record.
    ///
    /// Nothing is written when the exchange fails. A failed write is logged
    /// and the record is still returned to the caller.
    pub async fn handle_authorization_code(&self, code: &str) -> Result<TokenRecord, AuthError> {
        let record = self.client.exchange_code(code).await?;

        // Wait out any in-flight refresh so its older record cannot overwrite this one
        let mut last = self.last_refresh.lock().await;
        if let Err(e) = self.store.save(&record) {
            tracing::error!("{}; token is only available in memory", e);
        }
        *last = Some(record.clone());
        self.refresh_generation.fetch_add(1, Ordering::AcqRel);

        Ok(record)
    }

    /// Remove the stored credential
    pub async fn logout(&self) -> Result<(), AuthError> {
        // Hold the refresh lock so an in-flight refresh cannot re-create the file
        let mut last = self.last_refresh.lock().await;
        *last = None;
        self.store.clear()
    }

    async fn refresh_serialized(&self, observed: u64) -> Option<String> {
        let mut last = self.last_refresh.lock().await;

        if self.refresh_generation.load(Ordering::Acquire) != observed {
            tracing::debug!("Refresh completed while waiting, reusing its outcome");
            return last
                .as_ref()
                .filter(|r| r.is_fresh())
                .map(|r| r.access_token.clone());
        }

        // Re-read under the lock; the record may have changed since the fast path
        let record = self.store.load()?;
        if record.is_fresh() {
            return Some(record.access_token);
        }

        let outcome = match self.client.refresh(&record).await {
            Ok(refreshed) => {
                if let Err(e) = self.store.save(&refreshed) {
                    tracing::warn!("{}; refreshed token kept in memory only", e);
                }
                tracing::info!(
                    "✅ Access token refreshed ({})",
                    mask_token(&refreshed.access_token)
                );
                Some(refreshed)
            }
            Err(e) => {
                tracing::error!("{}; re-authorization required", e);
                None
            }
        };

        let token = outcome.as_ref().map(|r| r.access_token.clone());
        *last = outcome;
        self.refresh_generation.fetch_add(1, Ordering::AcqRel);
        token
    }
}
