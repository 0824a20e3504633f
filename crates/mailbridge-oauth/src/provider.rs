//! `OAuth2` token endpoint configurations.

use crate::error::{Error, Result};
use url::Url;

/// `OAuth2` provider configuration.
///
/// Only the token endpoint is needed: authorization happens elsewhere and
/// this crate only refreshes tokens that were already granted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provider {
    /// Provider name (e.g., "Google").
    pub name: String,
    /// Token endpoint URL.
    pub token_url: Url,
    /// Scopes requested when the stored token carries none.
    pub default_scopes: Vec<String>,
}

impl Provider {
    /// Creates a new provider configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or not HTTP(S).
    pub fn new(name: impl Into<String>, token_url: impl AsRef<str>) -> Result<Self> {
        let token_url = Url::parse(token_url.as_ref())?;
        if !matches!(token_url.scheme(), "https" | "http") {
            return Err(Error::InvalidConfig(format!(
                "token_url must be http(s): {token_url}"
            )));
        }
        Ok(Self {
            name: name.into(),
            token_url,
            default_scopes: Vec::new(),
        })
    }

    /// Sets the default scopes.
    #[must_use]
    pub fn with_default_scopes(mut self, scopes: Vec<String>) -> Self {
        self.default_scopes = scopes;
        self
    }

    /// Google token endpoint.
    ///
    /// Scope `https://mail.google.com/` grants IMAP and SMTP access.
    ///
    /// # Errors
    ///
    /// Returns an error if URL parsing fails.
    pub fn google() -> Result<Self> {
        Ok(Self::new("Google", "https://oauth2.googleapis.com/token")?
            .with_default_scopes(vec!["https://mail.google.com/".to_string()]))
    }

    /// Microsoft (Outlook, Hotmail, Microsoft 365) token endpoint.
    ///
    /// Microsoft requires the scopes to be repeated on refresh, and
    /// `offline_access` keeps a refresh token coming back.
    ///
    /// # Errors
    ///
    /// Returns an error if URL parsing fails.
    pub fn microsoft() -> Result<Self> {
        Ok(Self::new(
            "Microsoft",
            "https://login.microsoftonline.com/common/oauth2/v2.0/token",
        )?
        .with_default_scopes(vec![
            "https://outlook.office.com/IMAP.AccessAsUser.All".to_string(),
            "https://outlook.office.com/SMTP.Send".to_string(),
            "offline_access".to_string(),
        ]))
    }

    /// Returns the default scopes as a space-separated string.
    #[must_use]
    pub fn scope_string(&self) -> Option<String> {
        (!self.default_scopes.is_empty()).then(|| self.default_scopes.join(" "))
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[test]
    fn test_google_provider() {
        let provider = Provider::google().unwrap();
        assert_eq!(provider.name, "Google");
        assert_eq!(provider.token_url.host_str(), Some("oauth2.googleapis.com"));
        assert_eq!(
            provider.scope_string().as_deref(),
            Some("https://mail.google.com/")
        );
    }

    #[test]
    fn test_microsoft_provider() {
        let provider = Provider::microsoft().unwrap();
        assert_eq!(provider.default_scopes.len(), 3);
        assert!(provider.scope_string().unwrap().ends_with("offline_access"));
    }

    #[test]
    fn test_custom_provider() {
        let provider = Provider::new("Custom", "https://auth.example.com/token").unwrap();
        assert!(provider.scope_string().is_none());
    }

    #[test]
    fn test_rejects_non_http_url() {
        assert!(matches!(
            Provider::new("Bad", "ftp://auth.example.com/token"),
            Err(Error::InvalidConfig(_))
        ));
        assert!(Provider::new("Bad", "not a url").is_err());
    }
}
