// Authorization redirect construction and token endpoint calls

use anyhow::{Context, Result};
use reqwest::Client;
use std::time::Duration;
use url::Url;

use super::error::{AuthError, EndpointFailure};
use super::types::{
    format_expiry, mask_token, now_millis, ClientCredentials, OAuthEndpoints, TokenRecord,
    TokenResponse,
};

/// Build the remote login URL the user is redirected to.
///
/// Pure construction, no network access.
pub fn build_authorization_url(
    login_url: &Url,
    client_id: &str,
    redirect_uri: &str,
    scope: &str,
    state: &str,
) -> Url {
    let mut url = login_url.clone();
    url.query_pairs_mut()
        .append_pair("client_id", client_id)
        .append_pair("redirect_uri", redirect_uri)
        .append_pair("response_type", "code")
        .append_pair("scope", scope)
        .append_pair("state", state);
    url
}

/// OAuth2 client for the authorization-code and refresh-token grants
#[derive(Debug, Clone)]
pub struct OAuthClient {
    /// HTTP client with request timeout applied to every token call
    http: Client,

    login_url: Url,
    token_url: String,
    credentials: ClientCredentials,
}

impl OAuthClient {
    pub fn new(
        endpoints: OAuthEndpoints,
        credentials: ClientCredentials,
        request_timeout: Duration,
        connect_timeout: Duration,
    ) -> Result<Self> {
        let login_url = Url::parse(&endpoints.login_url)
            .with_context(|| format!("Invalid login URL: {}", endpoints.login_url))?;

        let http = Client::builder()
            .timeout(request_timeout)
            .connect_timeout(connect_timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            login_url,
            token_url: endpoints.token_url,
            credentials,
        })
    }

    pub fn credentials(&self) -> &ClientCredentials {
        &self.credentials
    }

    /// Login URL for this client carrying the given CSRF state
    pub fn authorization_url(&self, state: &str) -> Url {
        build_authorization_url(
            &self.login_url,
            &self.credentials.client_id,
            &self.credentials.redirect_uri,
            &self.credentials.scope,
            state,
        )
    }

    /// Exchange an authorization code for an initial token record
    pub async fn exchange_code(&self, code: &str) -> Result<TokenRecord, AuthError> {
        tracing::info!("Exchanging authorization code for token...");

        let form = [
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
            ("code", code),
            ("grant_type", "authorization_code"),
            ("redirect_uri", self.credentials.redirect_uri.as_str()),
        ];

        let data = self
            .request_token(&form, "authorization code exchange")
            .await
            .map_err(AuthError::Exchange)?;
        let record = TokenRecord::from_response(data, now_millis(), None);

        tracing::info!(
            "Authorization code exchanged (token: {}), expires at {}",
            mask_token(&record.access_token),
            format_expiry(record.expires_at)
        );
        Ok(record)
    }

    /// Obtain a new access token with the record's refresh token.
    ///
    /// The returned record keeps the old refresh token unless the server
    /// issued a new one.
    pub async fn refresh(&self, record: &TokenRecord) -> Result<TokenRecord, AuthError> {
        let refresh_token = record
            .refresh_token()
            .ok_or(AuthError::MissingRefreshToken)?;

        tracing::info!("Refreshing access token...");

        let form = [
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];

        let data = self
            .request_token(&form, "refresh")
            .await
            .map_err(AuthError::Refresh)?;
        let rotated = data.refresh_token.as_deref().is_some_and(|t| !t.is_empty());
        let refreshed = TokenRecord::from_response(data, now_millis(), Some(refresh_token));

        tracing::info!(
            "Token refreshed (refresh token {}), expires at {}",
            if rotated { "rotated" } else { "kept" },
            format_expiry(refreshed.expires_at)
        );
        Ok(refreshed)
    }

    /// POST a form to the token endpoint and parse the token response
    async fn request_token(
        &self,
        form: &[(&str, &str)],
        operation: &str,
    ) -> Result<TokenResponse, EndpointFailure> {
        tracing::debug!(
            "Token {} request: url={}, client_id={}...",
            operation,
            self.token_url,
            self.credentials.client_id.chars().take(8).collect::<String>()
        );

        let response = self
            .http
            .post(&self.token_url)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .form(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Token {} request failed: {}", operation, e);
                EndpointFailure::from_reqwest(&e)
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!("Token {} failed: status={}, body={}", operation, status, body);

            if let Ok(error_json) = serde_json::from_str::<serde_json::Value>(&body) {
                if let Some(error_code) = error_json.get("error").and_then(|v| v.as_str()) {
                    tracing::error!(
                        "Token {} error details: error={}, description={}",
                        operation,
                        error_code,
                        error_json
                            .get("error_description")
                            .and_then(|v| v.as_str())
                            .unwrap_or("-")
                    );
                }
            }

            return Err(EndpointFailure::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let data: TokenResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                EndpointFailure::Timeout
            } else {
                EndpointFailure::InvalidResponse(e.to_string())
            }
        })?;

        if data.access_token.is_empty() {
            return Err(EndpointFailure::InvalidResponse(
                "response does not contain access_token".to_string(),
            ));
        }

        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn credentials() -> ClientCredentials {
        ClientCredentials {
            client_id: "client-123".to_string(),
            client_secret: "secret-456".to_string(),
            redirect_uri: "http://localhost:3000/auth/callback".to_string(),
            scope: "offline_access".to_string(),
        }
    }

    fn client_for(base_url: &str) -> OAuthClient {
        OAuthClient::new(
            OAuthEndpoints::from_base_url(base_url),
            credentials(),
            Duration::from_secs(5),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn stored(refresh_token: Option<&str>) -> TokenRecord {
        TokenRecord {
            access_token: "AT1".to_string(),
            refresh_token: refresh_token.map(str::to_string),
            expires_at: now_millis() - 1000,
            token_type: "Bearer".to_string(),
        }
    }

    #[test]
    fn test_authorization_url_has_required_params() {
        let login = Url::parse("https://sandbox-api.dexcom.com/v2/oauth2/login").unwrap();
        let url = build_authorization_url(
            &login,
            "client-123",
            "http://localhost:3000/auth/callback",
            "offline_access",
            "state-xyz",
        );

        assert_eq!(
            url.as_str(),
            "https://sandbox-api.dexcom.com/v2/oauth2/login?client_id=client-123\
             &redirect_uri=http%3A%2F%2Flocalhost%3A3000%2Fauth%2Fcallback\
             &response_type=code&scope=offline_access&state=state-xyz"
        );
    }

    #[test]
    fn test_authorization_url_is_deterministic() {
        let client = client_for("https://sandbox-api.dexcom.com");
        assert_eq!(client.authorization_url("s1"), client.authorization_url("s1"));
        assert_ne!(client.authorization_url("s1"), client.authorization_url("s2"));
    }

    #[test]
    fn test_invalid_login_url_is_rejected() {
        let result = OAuthClient::new(
            OAuthEndpoints {
                login_url: "not a url".to_string(),
                token_url: "http://localhost/token".to_string(),
            },
            credentials(),
            Duration::from_secs(5),
            Duration::from_secs(5),
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_exchange_code_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v2/oauth2/token")
            .match_header("content-type", "application/x-www-form-urlencoded")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()),
                Matcher::UrlEncoded("code".into(), "auth-code".into()),
                Matcher::UrlEncoded("client_id".into(), "client-123".into()),
                Matcher::UrlEncoded("client_secret".into(), "secret-456".into()),
                Matcher::UrlEncoded(
                    "redirect_uri".into(),
                    "http://localhost:3000/auth/callback".into(),
                ),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"access_token":"AT1","refresh_token":"RT1","expires_in":7200,"token_type":"Bearer"}"#,
            )
            .expect(1)
            .create_async()
            .await;

        let client = client_for(&server.url());
        let before = now_millis();
        let record = client.exchange_code("auth-code").await.unwrap();
        let after = now_millis();

        mock.assert_async().await;
        assert_eq!(record.access_token, "AT1");
        assert_eq!(record.refresh_token.as_deref(), Some("RT1"));
        assert_eq!(record.token_type, "Bearer");
        assert!(record.expires_at >= before + 7_200_000 - 60_000);
        assert!(record.expires_at <= after + 7_200_000 - 60_000);
    }

    #[tokio::test]
    async fn test_exchange_code_rejected() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v2/oauth2/token")
            .with_status(400)
            .with_body(r#"{"error":"invalid_grant","error_description":"code already used"}"#)
            .create_async()
            .await;

        let client = client_for(&server.url());
        let err = client.exchange_code("used-code").await.unwrap_err();

        match err {
            AuthError::Exchange(EndpointFailure::Rejected { status, body }) => {
                assert_eq!(status, 400);
                assert!(body.contains("invalid_grant"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_exchange_code_empty_access_token() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v2/oauth2/token")
            .with_status(200)
            .with_body(r#"{"access_token":"","expires_in":3600}"#)
            .create_async()
            .await;

        let client = client_for(&server.url());
        let err = client.exchange_code("code").await.unwrap_err();
        assert!(matches!(
            err,
            AuthError::Exchange(EndpointFailure::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_exchange_code_malformed_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v2/oauth2/token")
            .with_status(200)
            .with_body("<html>oops</html>")
            .create_async()
            .await;

        let client = client_for(&server.url());
        let err = client.exchange_code("code").await.unwrap_err();
        assert!(matches!(
            err,
            AuthError::Exchange(EndpointFailure::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_exchange_code_network_error() {
        // Nothing listens on port 1
        let client = client_for("http://127.0.0.1:1");
        let err = client.exchange_code("code").await.unwrap_err();
        assert!(matches!(
            err,
            AuthError::Exchange(EndpointFailure::Network(_)) | AuthError::Exchange(EndpointFailure::Timeout)
        ));
    }

    #[tokio::test]
    async fn test_refresh_keeps_refresh_token_when_not_rotated() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v2/oauth2/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
                Matcher::UrlEncoded("refresh_token".into(), "RT1".into()),
                Matcher::UrlEncoded("client_id".into(), "client-123".into()),
                Matcher::UrlEncoded("client_secret".into(), "secret-456".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"access_token":"AT2","expires_in":3600,"token_type":"Bearer"}"#)
            .expect(1)
            .create_async()
            .await;

        let client = client_for(&server.url());
        let before = now_millis();
        let refreshed = client.refresh(&stored(Some("RT1"))).await.unwrap();
        let after = now_millis();

        mock.assert_async().await;
        assert_eq!(refreshed.access_token, "AT2");
        assert_eq!(refreshed.refresh_token.as_deref(), Some("RT1"));
        assert!(refreshed.expires_at >= before + 3_600_000 - 60_000);
        assert!(refreshed.expires_at <= after + 3_600_000 - 60_000);
    }

    #[tokio::test]
    async fn test_refresh_replaces_rotated_refresh_token() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v2/oauth2/token")
            .with_status(200)
            .with_body(
                r#"{"access_token":"AT2","refresh_token":"RT2","expires_in":3600,"token_type":"Bearer"}"#,
            )
            .create_async()
            .await;

        let client = client_for(&server.url());
        let refreshed = client.refresh(&stored(Some("RT1"))).await.unwrap();
        assert_eq!(refreshed.refresh_token.as_deref(), Some("RT2"));
    }

    #[tokio::test]
    async fn test_refresh_rejected_is_refresh_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v2/oauth2/token")
            .with_status(401)
            .with_body(r#"{"error":"invalid_grant"}"#)
            .create_async()
            .await;

        let client = client_for(&server.url());
        let err = client.refresh(&stored(Some("revoked"))).await.unwrap_err();
        assert!(matches!(
            err,
            AuthError::Refresh(EndpointFailure::Rejected { status: 401, .. })
        ));
    }

    #[tokio::test]
    async fn test_refresh_without_refresh_token_makes_no_call() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v2/oauth2/token")
            .expect(0)
            .create_async()
            .await;

        let client = client_for(&server.url());
        let err = client.refresh(&stored(None)).await.unwrap_err();

        mock.assert_async().await;
        assert!(matches!(err, AuthError::MissingRefreshToken));
    }
}
