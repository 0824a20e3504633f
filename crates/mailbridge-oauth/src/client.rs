//! Token endpoint client.

use crate::error::{Error, Result};
use crate::provider::Provider;
use crate::token::{ErrorResponse, Token, TokenResponse};
use chrono::Utc;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// Default timeout for token endpoint requests.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// `OAuth2` client for one registered application at one provider.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    /// Client ID from provider.
    pub client_id: String,
    /// Client secret (optional for public clients).
    pub client_secret: Option<String>,
    /// Provider configuration.
    pub provider: Provider,
    http_client: Client,
}

impl OAuthClient {
    /// Creates a new OAuth client with a default HTTP client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built (TLS backend).
    pub fn new(client_id: impl Into<String>, provider: Provider) -> Result<Self> {
        let http_client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self::with_http_client(client_id, provider, http_client))
    }

    /// Creates a new OAuth client sharing an existing HTTP client.
    #[must_use]
    pub fn with_http_client(
        client_id: impl Into<String>,
        provider: Provider,
        http_client: Client,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: None,
            provider,
            http_client,
        }
    }

    /// Sets the client secret.
    #[must_use]
    pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(secret.into());
        self
    }

    /// Refreshes an access token using its refresh token.
    ///
    /// The scope sent is the token's own scope, else the provider default.
    /// If the server omits a new refresh token the old one is kept.
    ///
    /// # Errors
    ///
    /// Returns an error if the token has no refresh token, the request
    /// fails, or the server rejects the grant.
    pub async fn refresh_token(&self, token: &Token) -> Result<Token> {
        let refresh_token = token.refresh_token()?;
        let scope = token
            .scope
            .clone()
            .filter(|s| !s.is_empty())
            .or_else(|| self.provider.scope_string());

        let mut params: Vec<(&str, &str)> = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.client_id.as_str()),
        ];
        if let Some(secret) = &self.client_secret {
            params.push(("client_secret", secret.as_str()));
        }
        if let Some(scope) = &scope {
            params.push(("scope", scope.as_str()));
        }

        debug!(provider = %self.provider.name, "Refreshing OAuth2 access token");

        let response = self
            .http_client
            .post(self.provider.token_url.clone())
            .form(&params)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(serde_json::from_str::<ErrorResponse>(&body).map_or_else(
                |_| Error::InvalidResponse(format!("HTTP {status}")),
                ErrorResponse::into_error,
            ));
        }

        let token_response: TokenResponse = serde_json::from_str(&body)?;
        let mut new_token = Token::from_response(token_response, Utc::now())?;

        if new_token.refresh_token.is_none() {
            new_token.refresh_token.clone_from(&token.refresh_token);
        }
        if new_token.scope.is_none() {
            new_token.scope = scope;
        }

        Ok(new_token)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_oauth_client_creation() {
        let client = OAuthClient::new("test_client_id", Provider::google().unwrap())
            .unwrap()
            .with_client_secret("secret");
        assert_eq!(client.client_id, "test_client_id");
        assert_eq!(client.client_secret.as_deref(), Some("secret"));
    }

    #[test]
    fn test_refresh_without_refresh_token_fails_fast() {
        let client = OAuthClient::new("id", Provider::google().unwrap()).unwrap();
        let result = tokio_test::block_on(client.refresh_token(&Token::bearer("a")));
        assert!(matches!(result, Err(Error::NoRefreshToken)));
    }
}
